// src/lib.rs

//! x2telegram: relay posts from X accounts to a Telegram chat through Nitter mirrors.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod test_support;
