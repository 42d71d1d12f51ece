// src/models/mod.rs

//! Domain models for the forwarding service.

mod config;
mod post;
mod source;

pub use config::{
    AnalyzerConfig, Config, LoggingConfig, PROVIDERS, ProcessingConfig, ScraperConfig,
    TelegramConfig,
};
pub use post::{CachedItem, CandidatePost, Post};
pub use source::Source;
