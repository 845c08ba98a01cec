//! Bearer token authentication.
//!
//! Each configured token maps to the owner whose bookmarks it may search.

use crate::config::TokenEntry;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid bearer token")]
    InvalidToken,
}

/// Resolves the `Authorization` header value to an owner.
///
/// Every configured token is compared, so the time taken doesn't depend on
/// which entry matched.
pub fn resolve_owner<'a>(
    tokens: &'a [TokenEntry],
    header: Option<&str>,
) -> Result<&'a str, AuthError> {
    let provided = header
        .and_then(extract_bearer_token)
        .ok_or(AuthError::MissingToken)?;

    let mut owner = None;
    for entry in tokens {
        if validate_token(provided, &entry.token) && owner.is_none() {
            owner = Some(entry.owner.as_str());
        }
    }

    owner.ok_or(AuthError::InvalidToken)
}

/// Constant-time token comparison.
///
/// Returns `false` if either token is empty.
pub fn validate_token(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    if provided.is_empty() || expected.is_empty() {
        return false;
    }

    let len_match = provided.len() == expected.len();

    let mut diff: u8 = 0;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }

    len_match && diff == 0
}

/// Extracts the token from "Bearer <token>" (scheme is case-insensitive).
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    if header.len() < 7 || !header.is_char_boundary(7) {
        return None;
    }

    let (prefix, token) = header.split_at(7);
    if !prefix.eq_ignore_ascii_case("Bearer ") {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
