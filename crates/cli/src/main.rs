use clap::{Parser, Subcommand};
use std::cmp::Ordering;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use epub_engine_core::cfi::{self, PositionAddress};
use epub_engine_core::config::{
    config_path, load_config, open_options_from_config, sanitize_options_from_config, set_value,
    EngineConfig,
};
use epub_engine_core::document::TocEntry;
use epub_engine_core::engine::Engine;
use epub_engine_core::progress::{ProgressEvent, ProgressHandler};
use epub_engine_core::sanitize::sanitize;

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "epub-engine")]
#[command(about = "Inspect EPUB publications: metadata, navigation, chapters and positions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Passphrase for LCP-protected publications
    #[arg(long, global = true)]
    passphrase: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show metadata, spine and protection summary
    Info {
        /// Input file
        #[arg(required = true)]
        input: String,
    },

    /// Print the table of contents
    Toc {
        /// Input file
        #[arg(required = true)]
        input: String,
    },

    /// Print one chapter's markup
    Chapter {
        /// Input file
        #[arg(required = true)]
        input: String,

        /// Spine index (0-based)
        #[arg(long, conflicts_with_all = ["href", "id"])]
        index: Option<usize>,

        /// Container path of the chapter
        #[arg(long, conflicts_with = "id")]
        href: Option<String>,

        /// Manifest id of the chapter
        #[arg(long)]
        id: Option<String>,

        /// Pass the markup through the sanitizer
        #[arg(long)]
        sanitize: bool,

        /// Print the markup as stored instead of with rewritten references
        #[arg(long, conflicts_with = "sanitize")]
        raw: bool,
    },

    /// Extract the cover image
    Cover {
        /// Input file
        #[arg(required = true)]
        input: String,

        /// Output image path
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Show the media overlay clips of a chapter
    Overlay {
        /// Input file
        #[arg(required = true)]
        input: String,

        /// Spine index (0-based)
        index: usize,
    },

    /// Describe how the publication is protected
    Protection {
        /// Input file
        #[arg(required = true)]
        input: String,
    },

    /// Work with position addresses (EPUB CFI)
    Address {
        #[command(subcommand)]
        action: AddressAction,
    },

    /// Sanitize an HTML file and print the result
    Sanitize {
        /// HTML file
        #[arg(required = true)]
        input: String,

        /// Drop style attributes, <style> and stylesheet links
        #[arg(long)]
        no_styles: bool,

        /// Drop data: image URIs
        #[arg(long)]
        no_data_images: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum AddressAction {
    /// Parse an address and show its parts
    Parse {
        address: String,
    },
    /// Build an address from a spine index and optional element path
    FromSpine {
        /// Spine index (0-based)
        index: usize,

        /// Steps inside the content document, e.g. 4/2/1
        #[arg(long)]
        path: Option<String>,

        /// Character offset
        #[arg(long)]
        offset: Option<u32>,

        /// Id of the target element
        #[arg(long)]
        id: Option<String>,
    },
    /// Compare two addresses by reading order
    Compare {
        first: String,
        second: String,
    },
    /// Sort addresses by reading order; invalid ones go last
    Sort {
        #[arg(required = true)]
        addresses: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Initialize default config file
    Init,
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Key (dot-separated path)
        key: String,
        /// Value
        value: String,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let passphrase = cli.passphrase.as_deref();
    let result = match &cli.command {
        Commands::Info { input } => run_info(input, passphrase, cli.json),
        Commands::Toc { input } => run_toc(input, passphrase, cli.json),
        Commands::Chapter {
            input,
            index,
            href,
            id,
            sanitize,
            raw,
        } => {
            let selector = match (index, href, id) {
                (_, Some(href), _) => ChapterSelector::Href(href),
                (_, _, Some(id)) => ChapterSelector::Id(id),
                (index, _, _) => ChapterSelector::Index(index.unwrap_or(0)),
            };
            run_chapter(input, selector, *sanitize, *raw, passphrase, cli.json)
        }
        Commands::Cover { input, output } => run_cover(input, output.as_deref(), passphrase, cli.json),
        Commands::Overlay { input, index } => run_overlay(input, *index, passphrase, cli.json),
        Commands::Protection { input } => run_protection(input, passphrase, cli.json),
        Commands::Address { action } => run_address(action, cli.json),
        Commands::Sanitize {
            input,
            no_styles,
            no_data_images,
        } => run_sanitize(input, *no_styles, *no_data_images),
        Commands::Config { action } => run_config(action, cli.json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

struct LogProgress;

impl ProgressHandler for LogProgress {
    fn on_progress(&self, event: ProgressEvent) {
        tracing::debug!(
            "{} [{}/{}] {}",
            event.operation,
            event.current + 1,
            event.total.unwrap_or(0),
            event.message.unwrap_or_default()
        );
    }
}

fn open_engine(
    input: &str,
    passphrase: Option<&str>,
) -> Result<Engine, Box<dyn std::error::Error + Send + Sync>> {
    let cfg = load_config();
    let options = open_options_from_config(&cfg, passphrase);
    let file = File::open(Path::new(input))?;
    Ok(Engine::open_with_options(
        BufReader::new(file),
        &options,
        Some(&LogProgress),
    )?)
}

fn run_info(input: &str, passphrase: Option<&str>, json: bool) -> CliResult {
    let engine = open_engine(input, passphrase)?;
    let package = engine.package();
    let metadata = engine.metadata();

    if json {
        let info = serde_json::json!({
            "metadata": metadata,
            "version": package.version,
            "unique_identifier": package.unique_identifier,
            "spine_items": engine.spine().len(),
            "manifest_items": engine.manifest().len(),
            "fixed_layout": package.rendition.is_fixed_layout(),
            "navigation_source": engine.navigation().source,
            "protection": engine.protection_description(),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        if let Some(t) = metadata.title() {
            println!("Title: {}", t);
        }
        let authors = metadata.authors();
        if !authors.is_empty() {
            println!("Authors: {}", authors.join(", "));
        }
        if let Some(lang) = metadata.language() {
            println!("Language: {}", lang);
        }
        if let Some(series) = &metadata.series {
            match series.position {
                Some(pos) => println!("Series: {} #{}", series.name, pos),
                None => println!("Series: {}", series.name),
            }
        }
        if let Some(version) = package.version {
            println!("Version: {:?}", version);
        }
        println!("Identifier: {}", package.unique_identifier);
        println!("Spine items: {}", engine.spine().len());
        println!("Manifest items: {}", engine.manifest().len());
        println!("Layout: {:?}", package.rendition.layout);
        println!("Navigation: {:?}", engine.navigation().source);
        println!("Protection: {}", engine.protection_description());
    }
    Ok(())
}

fn run_toc(input: &str, passphrase: Option<&str>, json: bool) -> CliResult {
    let engine = open_engine(input, passphrase)?;
    let navigation = engine.navigation();

    if json {
        println!("{}", serde_json::to_string_pretty(navigation)?);
    } else {
        fn print_entries(entries: &[TocEntry]) {
            for entry in entries {
                let indent = "  ".repeat(entry.level as usize);
                println!("{}{} -> {}", indent, entry.title, entry.target());
                print_entries(&entry.children);
            }
        }
        print_entries(&navigation.toc);
        if !navigation.landmarks.is_empty() {
            println!();
            println!("Landmarks:");
            for landmark in &navigation.landmarks {
                println!("  {} ({}) -> {}", landmark.title, landmark.kind, landmark.href);
            }
        }
    }
    Ok(())
}

enum ChapterSelector<'a> {
    Index(usize),
    Href(&'a str),
    Id(&'a str),
}

fn run_chapter(
    input: &str,
    selector: ChapterSelector<'_>,
    sanitized: bool,
    raw: bool,
    passphrase: Option<&str>,
    json: bool,
) -> CliResult {
    let engine = open_engine(input, passphrase)?;
    let chapter = match selector {
        ChapterSelector::Index(index) => engine.get_chapter(index)?,
        ChapterSelector::Href(href) => engine.get_chapter_by_href(href)?,
        ChapterSelector::Id(id) => engine.get_chapter_by_id(id)?,
    };

    let markup = if sanitized {
        let options = sanitize_options_from_config(&load_config());
        engine.sanitized_chapter(chapter.spine_index, &options)?
    } else if raw {
        chapter.raw_content.clone()
    } else {
        chapter.content.clone()
    };

    if json {
        let out = serde_json::json!({
            "id": chapter.id,
            "href": chapter.href,
            "title": chapter.title,
            "spine_index": chapter.spine_index,
            "linear": chapter.linear,
            "media_type": chapter.media_type,
            "resolved_refs": chapter.resolved_refs,
            "content": markup,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", markup);
    }
    Ok(())
}

fn run_cover(input: &str, output: Option<&str>, passphrase: Option<&str>, json: bool) -> CliResult {
    let path = Path::new(input);
    let engine = open_engine(input, passphrase)?;
    let cover = engine.get_cover()?.ok_or("No cover image found")?;

    let ext = match cover.media_type.as_str() {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "image/webp" => "webp",
        _ => "jpg",
    };
    let out_path = output
        .map(|s| Path::new(s).to_path_buf())
        .unwrap_or_else(|| {
            path.parent()
                .unwrap_or(Path::new("."))
                .join(format!("cover.{}", ext))
        });
    std::fs::write(&out_path, &cover.data)?;

    if json {
        let out = serde_json::json!({ "cover": cover, "output": out_path });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "Extracted cover {} ({:?}) to {}",
            cover.href,
            cover.strategy,
            out_path.display()
        );
        if let Some((w, h)) = cover.dimensions {
            println!("Dimensions: {}x{}", w, h);
        }
    }
    Ok(())
}

fn run_overlay(input: &str, index: usize, passphrase: Option<&str>, json: bool) -> CliResult {
    let engine = open_engine(input, passphrase)?;
    let overlay = engine.get_media_overlay(index)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&overlay)?);
    } else if overlay.is_empty() {
        println!("No media overlay for spine item {}", index);
    } else {
        println!("Overlay: {}", overlay.smil_path);
        for clip in &overlay.clips {
            let fragment = clip.fragment.as_deref().unwrap_or("");
            println!(
                "  {}#{} {} [{} - {}]",
                clip.text_path,
                fragment,
                clip.audio_path,
                format_seconds(clip.clip_begin),
                format_seconds(clip.clip_end)
            );
        }
        println!("Duration: {:.3}s", overlay.duration());
    }
    Ok(())
}

fn format_seconds(value: Option<f64>) -> String {
    value.map(|s| format!("{:.3}s", s)).unwrap_or_else(|| "?".to_string())
}

fn run_protection(input: &str, passphrase: Option<&str>, json: bool) -> CliResult {
    let engine = open_engine(input, passphrase)?;
    if json {
        let out = serde_json::json!({
            "scheme": engine.protection_scheme(),
            "requires_credentials": engine.requires_credentials(),
            "can_decrypt": engine.can_decrypt(),
            "description": engine.protection_description(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", engine.protection_description());
        println!("Requires credentials: {}", engine.requires_credentials());
        println!("Can decrypt: {}", engine.can_decrypt());
    }
    Ok(())
}

fn run_address(action: &AddressAction, json: bool) -> CliResult {
    match action {
        AddressAction::Parse { address } => {
            let parsed = PositionAddress::parse(address)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&parsed)?);
            } else {
                println!("Spine index: {}", parsed.spine_index);
                println!("Steps: {:?}", parsed.step_indices());
                if let Some(offset) = &parsed.offset {
                    println!("Offset: {}", offset.offset);
                }
                if let Some(id) = parsed.target_id() {
                    println!("Target id: {}", id);
                }
                println!("Canonical: {}", parsed);
            }
        }
        AddressAction::FromSpine {
            index,
            path,
            offset,
            id,
        } => {
            let steps = match path {
                Some(p) => parse_steps(p)?,
                None => Vec::new(),
            };
            let address = if steps.is_empty() && offset.is_none() {
                PositionAddress::from_spine_index(*index)
            } else {
                PositionAddress::from_element_path(*index, &steps, *offset, id.as_deref())
            };
            print_line(&address.to_string(), json)?;
        }
        AddressAction::Compare { first, second } => {
            let ordering = cfi::compare_address_strings(first, second)
                .ok_or("Both arguments must be valid addresses")?;
            let word = match ordering {
                Ordering::Less => "before",
                Ordering::Equal => "equal",
                Ordering::Greater => "after",
            };
            print_line(word, json)?;
        }
        AddressAction::Sort { addresses } => {
            let sorted = cfi::sort_addresses(addresses.as_slice());
            if json {
                println!("{}", serde_json::to_string_pretty(&sorted)?);
            } else {
                for address in sorted {
                    println!("{}", address);
                }
            }
        }
    }
    Ok(())
}

fn parse_steps(path: &str) -> Result<Vec<u32>, Box<dyn std::error::Error + Send + Sync>> {
    let mut steps = Vec::new();
    for step in path.split('/').filter(|s| !s.is_empty()) {
        let index = step
            .parse::<u32>()
            .map_err(|_| format!("Invalid step '{}' in path {}", step, path))?;
        steps.push(index);
    }
    Ok(steps)
}

fn print_line(value: &str, json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", value);
    }
    Ok(())
}

fn run_sanitize(input: &str, no_styles: bool, no_data_images: bool) -> CliResult {
    let html = std::fs::read_to_string(input)?;
    let mut options = sanitize_options_from_config(&load_config());
    if no_styles {
        options.allow_styles = false;
    }
    if no_data_images {
        options.allow_data_images = false;
    }
    println!("{}", sanitize(&html, &options));
    Ok(())
}

fn run_config(action: &ConfigAction, json: bool) -> CliResult {
    match action {
        ConfigAction::Init => {
            let path = config_path().ok_or("Could not determine config directory")?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml = toml::to_string_pretty(&EngineConfig::default())?;
            std::fs::write(&path, toml)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let cfg = load_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        }
        ConfigAction::Set { key, value } => {
            let path = config_path().ok_or("Could not determine config directory")?;
            let cfg: EngineConfig = if path.exists() {
                let s = std::fs::read_to_string(&path)?;
                toml::from_str(&s).unwrap_or_default()
            } else {
                EngineConfig::default()
            };

            let cfg = set_value(&cfg, key, value)?;

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, toml::to_string_pretty(&cfg)?)?;
            if !json {
                println!("Updated {}", key);
            }
        }
    }
    Ok(())
}
