//! Utility functions and helpers.

pub mod http;
pub mod logfile;

use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

/// Truncate `text` to at most `max` grapheme clusters, appending `...` when cut.
pub fn truncate_graphemes(text: &str, max: usize) -> String {
    let mut graphemes = text.grapheme_indices(true);
    match graphemes.nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Hex-encoded SHA-256 of a piece of extracted content.
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
