//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Known analysis providers.
pub const PROVIDERS: &[&str] = &["ollama", "claude", "none"];

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file
    #[serde(default = "defaults::database_path")]
    pub database_path: PathBuf,

    /// Mirror access and page scraping
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Pipeline limits and retention
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Language-model analysis
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Telegram delivery
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| AppError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = var("DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(raw) = var("NITTER_MIRRORS") {
            match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(mirrors) if !mirrors.is_empty() => {
                    log::info!("Using {} custom mirrors from environment", mirrors.len());
                    self.scraper.mirrors = mirrors;
                }
                Ok(_) => log::warn!("NITTER_MIRRORS is empty, keeping configured mirrors"),
                Err(e) => log::warn!("Failed to parse NITTER_MIRRORS: {}", e),
            }
        }
        if let Some(raw) = var("MAX_TWEETS_PER_USER") {
            match raw.trim().parse() {
                Ok(n) => self.processing.max_items_per_source = n,
                Err(e) => log::warn!("Invalid MAX_TWEETS_PER_USER {:?}: {}", raw, e),
            }
        }
        if let Some(token) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(chat_id) = var("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = chat_id;
        }
        if let Some(provider) = var("AI_PROVIDER") {
            self.analyzer.provider = provider.to_lowercase();
        }
        if let Some(prompt) = var("AI_PROMPT") {
            self.analyzer.prompt = prompt;
        }
        if let Some(url) = var("OLLAMA_URL") {
            self.analyzer.ollama_url = url;
        }
        if let Some(model) = var("OLLAMA_MODEL") {
            self.analyzer.ollama_model = model;
        }
        if let Some(key) = var("CLAUDE_API_KEY") {
            self.analyzer.claude_api_key = Some(key);
        }
        if let Some(model) = var("CLAUDE_MODEL") {
            self.analyzer.claude_model = model;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.scraper.mirrors.is_empty() {
            return Err(AppError::validation("scraper.mirrors is empty"));
        }
        for mirror in &self.scraper.mirrors {
            let parsed = url::Url::parse(mirror)
                .map_err(|e| AppError::validation(format!("invalid mirror {mirror:?}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::validation(format!(
                    "mirror {mirror:?} must be http(s)"
                )));
            }
        }
        if self.scraper.user_agents.is_empty() {
            return Err(AppError::validation("scraper.user_agents is empty"));
        }
        if self.scraper.timeout_secs == 0 {
            return Err(AppError::validation("scraper.timeout_secs must be > 0"));
        }
        if self.scraper.retry_count == 0 {
            return Err(AppError::validation("scraper.retry_count must be > 0"));
        }
        if self.processing.keep_count == 0 {
            return Err(AppError::validation("processing.keep_count must be > 0"));
        }
        if self.processing.max_items_per_source == 0 {
            return Err(AppError::validation(
                "processing.max_items_per_source must be > 0",
            ));
        }
        if !PROVIDERS.contains(&self.analyzer.provider.as_str()) {
            return Err(AppError::validation(format!(
                "analyzer.provider must be one of {:?}, got {:?}",
                PROVIDERS, self.analyzer.provider
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: defaults::database_path(),
            scraper: ScraperConfig::default(),
            processing: ProcessingConfig::default(),
            analyzer: AnalyzerConfig::default(),
            telegram: TelegramConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Mirror access and scraping behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Interchangeable Nitter mirrors
    #[serde(default = "defaults::mirrors")]
    pub mirrors: Vec<String>,

    /// User agents rotated per request
    #[serde(default = "defaults::user_agents")]
    pub user_agents: Vec<String>,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Attempts per handle before giving up
    #[serde(default = "defaults::retry_count")]
    pub retry_count: u32,

    /// First backoff delay; doubles after every failed attempt
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_ms: u64,

    /// Longest wait for a rate-limited mirror before the pool is reset
    #[serde(default = "defaults::max_rate_limit_wait")]
    pub max_rate_limit_wait_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            mirrors: defaults::mirrors(),
            user_agents: defaults::user_agents(),
            timeout_secs: defaults::timeout(),
            retry_count: defaults::retry_count(),
            backoff_base_ms: defaults::backoff_base(),
            max_rate_limit_wait_secs: defaults::max_rate_limit_wait(),
        }
    }
}

/// Pipeline limits and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Candidates considered per source and run
    #[serde(default = "defaults::max_items")]
    pub max_items_per_source: usize,

    /// Non-delivered items retained per source
    #[serde(default = "defaults::keep_count")]
    pub keep_count: usize,

    /// Analyzed-but-undelivered items retried per run
    #[serde(default = "defaults::pending_limit")]
    pub pending_limit: usize,

    /// Unanalyzed leftovers analyzed per run
    #[serde(default = "defaults::unanalyzed_limit")]
    pub unanalyzed_limit: usize,

    /// Pause between sources in milliseconds
    #[serde(default = "defaults::source_pause")]
    pub source_pause_ms: u64,

    /// Advisory lock held for the duration of a run
    #[serde(default = "defaults::lock_file")]
    pub lock_file: PathBuf,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_items_per_source: defaults::max_items(),
            keep_count: defaults::keep_count(),
            pending_limit: defaults::pending_limit(),
            unanalyzed_limit: defaults::unanalyzed_limit(),
            source_pause_ms: defaults::source_pause(),
            lock_file: defaults::lock_file(),
        }
    }
}

/// Language-model analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// "ollama", "claude" or "none"
    #[serde(default = "defaults::provider")]
    pub provider: String,

    #[serde(default = "defaults::prompt")]
    pub prompt: String,

    #[serde(default = "defaults::ollama_url")]
    pub ollama_url: String,

    #[serde(default = "defaults::ollama_model")]
    pub ollama_model: String,

    #[serde(default = "defaults::claude_model")]
    pub claude_model: String,

    /// Usually supplied through `CLAUDE_API_KEY`
    #[serde(default)]
    pub claude_api_key: Option<String>,

    #[serde(default = "defaults::analyzer_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::analyzer_retries")]
    pub max_retries: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            provider: defaults::provider(),
            prompt: defaults::prompt(),
            ollama_url: defaults::ollama_url(),
            ollama_model: defaults::ollama_model(),
            claude_model: defaults::claude_model(),
            claude_api_key: None,
            timeout_secs: defaults::analyzer_timeout(),
            max_retries: defaults::analyzer_retries(),
        }
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,

    #[serde(default)]
    pub chat_id: String,

    #[serde(default = "defaults::telegram_api")]
    pub api_base: String,

    #[serde(default = "defaults::telegram_retries")]
    pub retry_count: u32,

    #[serde(default = "defaults::telegram_retry_delay")]
    pub retry_delay_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: defaults::telegram_api(),
            retry_count: defaults::telegram_retries(),
            retry_delay_secs: defaults::telegram_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn database_path() -> PathBuf {
        PathBuf::from("data/tweets.db")
    }

    // Scraper defaults
    pub fn mirrors() -> Vec<String> {
        vec!["https://nitter.net".into()]
    }
    pub fn user_agents() -> Vec<String> {
        [
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/115.0",
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
    pub fn timeout() -> u64 {
        60
    }
    pub fn retry_count() -> u32 {
        10
    }
    pub fn backoff_base() -> u64 {
        1000
    }
    pub fn max_rate_limit_wait() -> u64 {
        60
    }

    // Processing defaults
    pub fn max_items() -> usize {
        10
    }
    pub fn keep_count() -> usize {
        10
    }
    pub fn pending_limit() -> usize {
        10
    }
    pub fn unanalyzed_limit() -> usize {
        50
    }
    pub fn source_pause() -> u64 {
        1000
    }
    pub fn lock_file() -> PathBuf {
        PathBuf::from("data/x2telegram.lock")
    }

    // Analyzer defaults
    pub fn provider() -> String {
        "ollama".into()
    }
    pub fn prompt() -> String {
        "Analyze the following tweet and determine if it contains important or interesting \
         information. The tweet should be relevant if it contains news, announcements, \
         or significant insights. Respond with a JSON object with two fields: \
         'is_relevant' (boolean) and 'reason' (string explanation)."
            .into()
    }
    pub fn ollama_url() -> String {
        "http://localhost:11434".into()
    }
    pub fn ollama_model() -> String {
        "deepseek-r1".into()
    }
    pub fn claude_model() -> String {
        "claude-3-haiku-20240307".into()
    }
    pub fn analyzer_timeout() -> u64 {
        30
    }
    pub fn analyzer_retries() -> u32 {
        3
    }

    // Telegram defaults
    pub fn telegram_api() -> String {
        "https://api.telegram.org".into()
    }
    pub fn telegram_retries() -> u32 {
        3
    }
    pub fn telegram_retry_delay() -> u64 {
        2
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
