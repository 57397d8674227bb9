//! Shared utility functions for HTTP adapters.

use va_domain::error::Error;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Shorten an error body for inclusion in an error message.
pub(crate) fn truncate_body(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_owned();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_body_untouched() {
        assert_eq!(truncate_body("  bad key \n", 50), "bad key");
    }

    #[test]
    fn long_body_truncated_on_char_boundary() {
        let body = "模型不存在".repeat(10);
        let out = truncate_body(&body, 3);
        assert_eq!(out, "模型不…");
    }
}
