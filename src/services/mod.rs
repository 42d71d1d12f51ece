//! Service layer for the forwarding application.
//!
//! This module contains the collaborators driven by the pipeline:
//! - Post fetching through rotating mirrors (`PostScraper`, `MirrorPool`, `Extractor`)
//! - Post analysis with a language model (`OllamaAnalyzer`, `ClaudeAnalyzer`)
//! - Delivery to a chat (`TelegramNotifier`)

mod analyzer;
mod extract;
mod mirrors;
mod scraper;
mod telegram;

use async_trait::async_trait;

use crate::models::CandidatePost;

pub use analyzer::{
    ClaudeAnalyzer, DisabledAnalyzer, OllamaAnalyzer, build_analyzer, strip_thinking,
};
pub use extract::{Extractor, normalize_timestamp};
pub use mirrors::{MirrorPool, PoolState};
pub use scraper::PostScraper;
pub use telegram::TelegramNotifier;

/// Source of recent posts for a handle.
#[async_trait]
pub trait PostSource: Send {
    /// Fetch the latest posts of `handle`, newest first when known.
    ///
    /// Never fails: upstream problems are logged and yield an empty list.
    async fn fetch_posts(&mut self, handle: &str) -> Vec<CandidatePost>;
}

/// Scores post text.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze `text`. Failures are reported inside the returned string.
    async fn analyze(&self, text: &str) -> String;
}

/// Outcome of a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub ok: bool,
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn delivered() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Hands formatted messages to a chat.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, message: &str) -> DeliveryReport;
}
