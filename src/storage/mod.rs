//! Persistence for followed sources and cached items.
//!
//! ## Layout
//!
//! ```text
//! sources(id, handle UNIQUE, enabled)
//! items(id, source_id -> sources.id ON DELETE CASCADE, external_id UNIQUE,
//!       url, content, image, created_at, inserted_at,
//!       is_analyzed, analysis_result, is_delivered, delivered_at)
//! ```
//!
//! Each public store operation is a single statement, so it commits
//! atomically before returning.

pub mod schema;
mod store;

pub use store::RetentionStore;
