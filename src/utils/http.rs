// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use rand::seq::IndexedRandom;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, HeaderMap, HeaderName, HeaderValue,
    REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};

use crate::error::Result;
use crate::models::ScraperConfig;

/// Create the asynchronous HTTP client used for mirror requests.
pub fn create_client(config: &ScraperConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Browser-like request headers with a user agent picked at random.
pub fn browser_headers(user_agents: &[String]) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let agent = user_agents.choose(&mut rand::rng());
    if let Some(value) = agent.and_then(|ua| HeaderValue::from_str(ua).ok()) {
        headers.insert(USER_AGENT, value);
    }

    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));
    headers.insert(HeaderName::from_static("dnt"), HeaderValue::from_static("1"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers
}

/// Parse a `Retry-After` header given in seconds.
pub fn retry_after_secs(headers: &HeaderMap, default_secs: u64) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default_secs)
}
