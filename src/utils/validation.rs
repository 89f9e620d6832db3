use std::collections::BTreeSet;

/// Characters replaced with `_` when a client filename is sanitized
const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Returns the lower-cased text after the last `.`, or `None` when there is no dot.
pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
}

/// Checks the filename extension against the allow-list.
///
/// This only looks at the name the client sent, never at the content, so it
/// is advisory: a renamed file with any payload passes.
pub fn is_allowed(filename: &str, allowed: &BTreeSet<String>) -> bool {
    match file_extension(filename) {
        Some(ext) if !ext.is_empty() => allowed.contains(&ext),
        _ => false,
    }
}

/// Human readable list used in the "invalid file type" message, e.g.
/// `AAC, M4A, MP3, or WAV`.
pub fn describe_extensions(allowed: &BTreeSet<String>) -> String {
    let upper: Vec<String> = allowed.iter().map(|e| e.to_uppercase()).collect();
    match upper.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [a, b] => format!("{} or {}", a, b),
        [rest @ .., last] => format!("{}, or {}", rest.join(", "), last),
    }
}

/// Reduces an untrusted client filename to something safe to embed in a
/// staging path and destination key.
///
/// Directory components are dropped, `..` sequences removed, and reserved or
/// control characters replaced with `_`. The extension is kept even when the
/// base ends up empty. An empty result is an error.
pub fn sanitize_filename(filename: &str) -> Result<String, ValidationError> {
    // Browsers on Windows may still send a full path
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    if name.len() != filename.len() {
        tracing::warn!("Path components stripped from client filename: {:?}", filename);
    }

    let mut sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control() || RESERVED_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", ".");
    }

    // Leading dots come off the base only: `.mp3` is an empty base plus `mp3`.
    let sanitized = match sanitized.trim().rsplit_once('.') {
        Some((base, ext)) if !ext.is_empty() => {
            format!("{}.{}", base.trim_start_matches('.'), ext)
        }
        _ => sanitized.trim().trim_start_matches('.').to_string(),
    };

    if sanitized.is_empty() {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        });
    }

    // Keep the name well inside common filesystem limits (255 bytes) once the
    // timestamp and random prefix are added.
    Ok(truncate_preserving_extension(&sanitized, 200))
}

fn truncate_preserving_extension(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }

    let (base, ext) = match name.rsplit_once('.') {
        Some((base, ext)) if ext.len() < 16 => (base, Some(ext)),
        _ => (name, None),
    };

    let budget = max_bytes - ext.map(|e| e.len() + 1).unwrap_or(0);
    let mut cut = budget.min(base.len());
    while !base.is_char_boundary(cut) {
        cut -= 1;
    }

    match ext {
        Some(ext) => format!("{}.{}", &base[..cut], ext),
        None => base[..cut].to_string(),
    }
}
