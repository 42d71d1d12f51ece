//! Utility functions and helpers.

pub mod http;
pub mod log;
pub mod message;

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Post id inside a permalink path.
static STATUS_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"status(?:es)?/(\d+)").expect("status id regex should compile"));

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Extract the numeric post id from a permalink (`.../status/123`).
pub fn extract_status_id(url: &str) -> Option<String> {
    STATUS_ID_REGEX
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

/// Path component of a URL, for relative or absolute input.
pub fn url_path(href: &str) -> String {
    match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.split(['?', '#']).next().unwrap_or(href).to_string(),
    }
}
