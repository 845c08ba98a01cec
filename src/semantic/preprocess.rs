//! Content preprocessing for embedding generation.
//!
//! Prepares the textual fields of a bookmark for embedding:
//! 1. Trim whitespace
//! 2. Skip empty parts
//! 3. Concatenate with separator
//! 4. Truncate to max length with ellipsis

use crate::bookmarks::Bookmark;

/// Maximum content length for embedding input (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 512;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

const SEPARATOR: &str = " - ";

fn text_parts(bmark: &Bookmark) -> [&str; 3] {
    [
        bmark.title.as_deref().unwrap_or_default(),
        bmark.description.as_deref().unwrap_or_default(),
        bmark.summary.as_deref().unwrap_or_default(),
    ]
}

/// Embedding input for a bookmark.
///
/// Returns `None` if title, description and summary are all empty after
/// trimming. Otherwise joins the non-empty parts and truncates to
/// `MAX_CONTENT_LENGTH`.
pub fn preprocess_bookmark(bmark: &Bookmark) -> Option<String> {
    preprocess_parts(&text_parts(bmark))
}

/// Embedding input for a free-text query.
pub fn preprocess_query(query: &str) -> Option<String> {
    preprocess_parts(&[query])
}

fn preprocess_parts(parts: &[&str]) -> Option<String> {
    let content = parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(SEPARATOR);

    if content.is_empty() {
        return None;
    }

    Some(truncate_content(&content))
}

/// Truncate content to MAX_CONTENT_LENGTH, adding ellipsis if truncated.
fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }

    // count chars, not bytes, so UTF-8 sequences stay intact
    let max_chars = MAX_CONTENT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}

/// Hash of the embedded fields, used to detect stale embeddings.
pub fn content_hash(bmark: &Bookmark) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for part in text_parts(bmark) {
        part.trim().hash(&mut hasher);
    }
    hasher.finish()
}
