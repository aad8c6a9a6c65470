//! Small helpers shared by the quick-xml event loops.

use std::collections::HashMap;

use quick_xml::events::BytesStart;

/// Local (unprefixed) element name.
pub(crate) fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

/// Attributes keyed by local name, values unescaped.
pub(crate) fn attributes(e: &BytesStart<'_>) -> HashMap<String, String> {
    e.attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).to_string());
            (key, value)
        })
        .collect()
}

/// Strip a UTF-8 byte order mark.
pub(crate) fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

/// Collapse runs of whitespace to single spaces and trim.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of a text event, unescaped when possible, raw otherwise (unknown
/// entities such as `&nbsp;` are left as written).
pub(crate) fn text(e: &quick_xml::events::BytesText<'_>) -> String {
    e.unescape()
        .map(|t| t.into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(e).into_owned())
}

/// Decode a stored text resource as strict UTF-8, BOM stripped.
pub(crate) fn decode_text(data: &[u8], path: &str) -> Result<String, crate::error::ParseError> {
    std::str::from_utf8(strip_bom(data))
        .map(str::to_string)
        .map_err(|e| crate::error::ParseError::InvalidUtf8 {
            path: path.to_string(),
            detail: e.to_string(),
        })
}
