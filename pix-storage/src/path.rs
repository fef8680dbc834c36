//! Identifier rules shared by every provider.
//!
//! An identifier is a relative, `/`-separated key. Before any I/O each
//! provider runs [`validate_identifier`], which first normalizes the input
//! (percent-decoding until stable, backslashes to slashes) and only then
//! applies the rules, so `%2e%2e/` and `..\\` are caught the same way as `../`.

use crate::{StorageError, StorageResult};

/// Upper bound on identifier length
pub const MAX_IDENTIFIER_LEN: usize = 1024;

const MAX_DECODE_ROUNDS: usize = 4;

/// Normalize and validate an identifier, returning the form to use for I/O
pub fn validate_identifier(raw: &str) -> StorageResult<String> {
    let normalized = normalize(raw)?;

    if normalized.is_empty() {
        return Err(StorageError::invalid_path(raw, "identifier is empty"));
    }
    if normalized.len() > MAX_IDENTIFIER_LEN {
        return Err(StorageError::invalid_path(raw, "identifier is too long"));
    }
    if normalized.starts_with('/') {
        return Err(StorageError::invalid_path(raw, "absolute paths are not allowed"));
    }
    if let Some(bad) = normalized.chars().find(|c| !is_allowed(*c)) {
        return Err(StorageError::invalid_path(
            raw,
            format!("character {bad:?} is not allowed"),
        ));
    }

    for segment in normalized.split('/') {
        match segment {
            ".." => {
                return Err(StorageError::invalid_path(raw, "parent segments are not allowed"))
            }
            "." => return Err(StorageError::invalid_path(raw, "dot segments are not allowed")),
            "" => return Err(StorageError::invalid_path(raw, "empty path segment")),
            _ => {}
        }
    }

    Ok(normalized)
}

/// Split a validated identifier into its parent segments, outermost first
pub fn parent_segments(identifier: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = identifier.split('/').collect();
    segments.pop();
    segments
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')
}

fn normalize(raw: &str) -> StorageResult<String> {
    let mut current = raw.to_string();
    for _ in 0..MAX_DECODE_ROUNDS {
        if !current.contains('%') {
            break;
        }
        let decoded = urlencoding::decode(&current)
            .map_err(|_| StorageError::invalid_path(raw, "invalid percent-encoding"))?
            .into_owned();
        if decoded == current {
            break;
        }
        current = decoded;
    }
    Ok(current.replace('\\', "/"))
}
