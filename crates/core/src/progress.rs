//! Progress reporting for opening a publication.

/// Event emitted while an engine is being opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub operation: String,
    pub current: u64,
    pub total: Option<u64>,
    pub message: Option<String>,
}

/// Receives progress updates. Implement this to drive a progress bar or a
/// status line.
pub trait ProgressHandler: Send {
    fn on_progress(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct NoopProgress;

impl ProgressHandler for NoopProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Stages of [`crate::engine::Engine::open_with_options`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStage {
    Container,
    Package,
    Encryption,
    Navigation,
}

impl OpenStage {
    pub const COUNT: u64 = 4;

    pub fn label(self) -> &'static str {
        match self {
            OpenStage::Container => "Reading container",
            OpenStage::Package => "Parsing package document",
            OpenStage::Encryption => "Classifying protection",
            OpenStage::Navigation => "Building navigation",
        }
    }

    fn position(self) -> u64 {
        match self {
            OpenStage::Container => 0,
            OpenStage::Package => 1,
            OpenStage::Encryption => 2,
            OpenStage::Navigation => 3,
        }
    }
}

/// Emit an event if a handler is provided.
pub fn emit_progress(
    handler: Option<&dyn ProgressHandler>,
    operation: &str,
    current: u64,
    total: Option<u64>,
    message: Option<&str>,
) {
    if let Some(h) = handler {
        h.on_progress(ProgressEvent {
            operation: operation.to_string(),
            current,
            total,
            message: message.map(|s| s.to_string()),
        });
    }
}

pub(crate) fn emit_stage(handler: Option<&dyn ProgressHandler>, stage: OpenStage) {
    emit_progress(
        handler,
        "Opening EPUB",
        stage.position(),
        Some(OpenStage::COUNT),
        Some(stage.label()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressHandler for Recorder {
        fn on_progress(&self, event: ProgressEvent) {
            self.0.lock().push(event);
        }
    }

    #[test]
    fn stages_report_position_and_total() {
        let recorder = Recorder::default();
        emit_stage(Some(&recorder), OpenStage::Encryption);
        emit_stage(None, OpenStage::Navigation);
        let events = recorder.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].current, 2);
        assert_eq!(events[0].total, Some(4));
        assert_eq!(events[0].message.as_deref(), Some("Classifying protection"));
    }
}
