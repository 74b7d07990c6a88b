//! Utility functions for string and path manipulation

use std::sync::OnceLock;

use crate::config::PathConversionConfig;

/// Strip a surrounding markdown code fence from AI response content.
///
/// Models occasionally wrap JSON in ```` ```json ```` fences despite the
/// strict response format; the payload inside is still valid.
pub fn strip_markdown_fences(content: &str) -> &str {
    let mut cleaned = content.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim()
}

/// Extract a 40-hex torrent info-hash from a magnet link or torrent URL.
pub fn extract_info_hash(source: &str) -> Option<String> {
    static HASH_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = HASH_RE.get_or_init(|| {
        regex::Regex::new(r"(?i)\b([0-9a-f]{40})\b").unwrap_or_else(|_| unreachable!())
    });
    re.captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Translate a downloader-reported path into this process's mount.
///
/// The rule is prefix-match only: the configured source prefix is replaced
/// when (and only when) it matches at position 0. A mid-string occurrence is
/// left alone. Backslashes are normalised to forward slashes on output and
/// doubled slashes are collapsed.
pub fn convert_path(config: &PathConversionConfig, path: &str) -> String {
    let normalised = path.replace('\\', "/");
    if !config.enabled || config.source_base_path.is_empty() {
        return collapse_slashes(&normalised);
    }

    let source = config.source_base_path.replace('\\', "/");
    let target = config.target_base_path.replace('\\', "/");

    let converted = match normalised.strip_prefix(&source) {
        Some(rest) => format!("{target}{rest}"),
        None => normalised,
    };

    collapse_slashes(&converted)
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if !last_was_slash {
                out.push(ch);
            }
            last_was_slash = true;
        } else {
            out.push(ch);
            last_was_slash = false;
        }
    }
    out
}

/// Replace characters that are invalid in file names on common filesystems.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
