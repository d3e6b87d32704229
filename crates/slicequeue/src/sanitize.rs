//! Span-safe labels for stored uploads.
//!
//! Stored names end with the customer's own file name, which stays out of
//! traces. Spans get the material and color prefix, the first block of the
//! upload id and the extension, plus a fingerprint of the full path for
//! joining log lines about the same file.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static STORED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<prefix>.+?)-(?P<id>[0-9a-f]{8})-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}-.",
    )
    .unwrap()
});

/// `PLA-RED-1b4e28ba-...-benchy.stl` becomes `PLA-RED-1b4e28ba.stl`.
/// Names that don't follow the stored layout become `upload` plus extension.
pub fn upload_label(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    match STORED_NAME.captures(name) {
        Some(caps) => format!("{}-{}{}", &caps["prefix"], &caps["id"], ext),
        None => format!("upload{ext}"),
    }
}

/// Twelve hex digits, stable for a given path.
pub fn path_fingerprint(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{:012x}", hasher.finish() >> 16)
}
