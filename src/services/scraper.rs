// src/services/scraper.rs

//! Timeline scraper with mirror failover.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::PostSource;
use super::extract::Extractor;
use super::mirrors::MirrorPool;
use crate::error::Result;
use crate::models::{CandidatePost, ScraperConfig, Source};
use crate::utils::http::{browser_headers, create_client, retry_after_secs};

/// Penalty applied when a 429 response has no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// What one request against one mirror produced.
enum Attempt {
    Posts(Vec<CandidatePost>),
    Empty,
    RateLimited(u64),
    Failed(String),
}

/// Fetches timelines through a pool of mirrors.
pub struct PostScraper {
    client: Client,
    pool: MirrorPool,
    extractor: Extractor,
    user_agents: Vec<String>,
    retry_count: u32,
    backoff_base: Duration,
}

impl PostScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
            pool: MirrorPool::new(
                &config.mirrors,
                Duration::from_secs(config.max_rate_limit_wait_secs),
            ),
            extractor: Extractor::new()?,
            user_agents: config.user_agents.clone(),
            retry_count: config.retry_count,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        })
    }

    pub fn pool(&self) -> &MirrorPool {
        &self.pool
    }

    async fn attempt(&self, mirror: &str, handle: &str) -> Attempt {
        let url = format!("{}/{}", mirror, handle);

        let response = match self
            .client
            .get(&url)
            .headers(browser_headers(&self.user_agents))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Attempt::Failed(e.to_string()),
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Attempt::RateLimited(retry_after_secs(
                response.headers(),
                DEFAULT_RETRY_AFTER_SECS,
            ));
        }
        if status != StatusCode::OK {
            return Attempt::Failed(format!("HTTP {}", status));
        }

        match response.text().await {
            Ok(body) => {
                let posts = self.extractor.parse_page(&body, mirror, handle);
                if posts.is_empty() {
                    Attempt::Empty
                } else {
                    Attempt::Posts(posts)
                }
            }
            Err(e) => Attempt::Failed(e.to_string()),
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base, ...
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}

#[async_trait]
impl PostSource for PostScraper {
    async fn fetch_posts(&mut self, handle: &str) -> Vec<CandidatePost> {
        let handle = match Source::normalize_handle(handle) {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Cannot fetch posts: {}", e);
                return Vec::new();
            }
        };

        let mut backoff_attempt = 0;
        for attempt in 1..=self.retry_count {
            let mirror = match self.pool.select().await {
                Ok(mirror) => mirror,
                Err(e) => {
                    log::error!("Cannot fetch posts for @{}: {}", handle, e);
                    return Vec::new();
                }
            };

            log::info!(
                "Fetching @{} from {} (attempt {}/{})",
                handle,
                mirror,
                attempt,
                self.retry_count
            );

            match self.attempt(&mirror, &handle).await {
                Attempt::Posts(posts) => {
                    log::info!("Scraped {} posts from {}", posts.len(), mirror);
                    return posts;
                }
                Attempt::RateLimited(secs) => {
                    self.pool.mark_rate_limited(&mirror, secs);
                    continue;
                }
                Attempt::Empty => {
                    // The account may simply have no posts; keep the mirror.
                    log::warn!("No posts found on {} for @{}", mirror, handle);
                }
                Attempt::Failed(reason) => {
                    log::warn!("Failed to fetch from {}: {}", mirror, reason);
                    self.pool.remove(&mirror);
                }
            }

            if attempt < self.retry_count {
                backoff_attempt += 1;
                let delay = self.backoff(backoff_attempt);
                if !delay.is_zero() {
                    log::debug!("Backing off for {:.1}s", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                }
            }
        }

        log::error!(
            "Failed to fetch posts for @{} after {} attempts",
            handle,
            self.retry_count
        );
        Vec::new()
    }
}
