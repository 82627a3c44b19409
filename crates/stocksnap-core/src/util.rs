//! Shared utility functions used across multiple modules.

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Heuristic check for an HTML body where JSON was expected.
///
/// Reverse proxies and captive portals answer with error pages; those must be
/// classified as server rejections, not JSON parse failures.
pub fn looks_like_html(body: &str) -> bool {
    let trimmed = body.trim_start();
    let head: String = trimmed.chars().take(64).collect::<String>().to_ascii_lowercase();
    trimmed.starts_with('<') && (head.contains("<html") || head.starts_with("<!doctype"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
        assert_eq!(
            normalize_text_option(Some(" Acme ".to_string())),
            Some("Acme".to_string())
        );
    }

    #[test]
    fn is_http_url_accepts_both_schemes() {
        assert!(is_http_url("http://example.com"));
        assert!(is_http_url("https://example.com"));
        assert!(!is_http_url("ftp://example.com"));
    }

    #[test]
    fn looks_like_html_detects_error_pages() {
        assert!(looks_like_html("<!DOCTYPE html><html><body>502</body></html>"));
        assert!(looks_like_html("  <html><head></head></html>"));
        assert!(!looks_like_html("{\"success\": true}"));
        assert!(!looks_like_html("<not really html but xmlish/>"));
    }
}
