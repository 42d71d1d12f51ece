//! Post records: scraped candidates and cached items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The content-bearing part of a post, as stored and read back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    /// Upstream post id (unique across the store)
    pub external_id: String,

    /// Absolute URL to the post
    pub url: String,

    /// Visible text
    pub content: String,

    /// Optional image URI
    pub image: Option<String>,

    /// Publication timestamp, RFC 3339 when it could be normalized
    pub created_at: String,
}

impl Post {
    /// A post is usable when it has an id, a URL and some text.
    pub fn is_valid(&self) -> bool {
        !self.external_id.is_empty() && !self.url.is_empty() && !self.content.is_empty()
    }
}

/// A post extracted from a mirror page, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePost {
    pub external_id: String,
    pub url: String,
    pub content: String,
    pub published: String,
    /// Display name found on the page, or the queried handle
    pub author: String,
    pub image_url: Option<String>,
}

impl CandidatePost {
    /// Convert into the record persisted by the store.
    pub fn into_post(self) -> Post {
        Post {
            external_id: self.external_id,
            url: self.url,
            content: self.content,
            image: self.image_url,
            created_at: self.published,
        }
    }
}

/// A post retained in the store with its processing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedItem {
    /// Store-assigned row id
    pub id: i64,

    /// Owning source
    pub source_id: i64,

    pub post: Post,

    pub inserted_at: DateTime<Utc>,

    pub is_analyzed: bool,
    pub analysis_result: Option<String>,

    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
}
