use crate::ChangeRequest;

/// Collapses whitespace runs and lowercases so cosmetic edits do not change
/// the fingerprint.
pub fn normalize_for_fingerprint(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

pub fn content_hash(content: &str) -> String {
    blake3::hash(normalize_for_fingerprint(content).as_bytes())
        .to_hex()
        .to_string()
}

/// Stable cache key for one change request: identity, normalized title, line
/// counts, and the sorted per-file change records. The diff byte length is
/// included so force-pushed rewrites of the same PR miss the cache.
pub fn change_fingerprint(request: &ChangeRequest) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(request.id.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize_for_fingerprint(&request.title).as_bytes());
    hasher.update(b"\n");
    hasher.update(request.additions.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(request.deletions.to_string().as_bytes());
    hasher.update(b"\n");

    let mut file_lines: Vec<String> = request
        .files
        .iter()
        .map(|file| {
            format!(
                "{}:{}:{}",
                file.path.replace('\\', "/"),
                file.lines_added,
                file.lines_removed
            )
        })
        .collect();
    file_lines.sort();
    for line in &file_lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    hasher.update(request.diff_text.len().to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}
