//! Content checksums and deterministic ordering.

use std::path::Path;

use sha2::{Digest, Sha256};

/// SHA-256 of the rendered text, hex encoded.
pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// History key for a path: relative to `root`, `/`-separated.
///
/// Paths outside `root` keep their full form.
pub fn path_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let key = relative.to_string_lossy().replace('\\', "/");
    key.trim_start_matches("./").to_string()
}

/// Sort keys lexically and drop duplicates.
///
/// Lexical order is the run order; numeric prefixes (`001_`, `20240101_`)
/// are how callers encode dependencies.
pub fn sort_keys<T, F>(items: &mut Vec<T>, key: F)
where
    F: Fn(&T) -> &str,
{
    items.sort_by(|a, b| key(a).cmp(key(b)));
    items.dedup_by(|a, b| key(a) == key(b));
}
