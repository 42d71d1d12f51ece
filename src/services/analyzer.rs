// src/services/analyzer.rs

//! Language-model analysis of post text.
//!
//! Analyzers never fail: every error is turned into a short `Error: ...`
//! string that is stored and delivered like a regular analysis.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::Analyzer;
use crate::error::Result;
use crate::models::AnalyzerConfig;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CLAUDE_MAX_TOKENS: u32 = 300;
const CLAUDE_TEMPERATURE: f64 = 0.3;

const OLLAMA_SYSTEM_PROMPT: &str = "You are an analyzer that evaluates content.";
const OLLAMA_RETRY_DELAY: Duration = Duration::from_secs(2);

static THINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think regex should compile"));

static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag regex should compile"));

/// Result returned when analysis is turned off.
pub const NO_ANALYSIS: &str = "No AI analysis performed";

/// Pick the analyzer named by `config.provider`.
pub fn build_analyzer(config: &AnalyzerConfig) -> Result<Box<dyn Analyzer>> {
    let analyzer: Box<dyn Analyzer> = match config.provider.to_lowercase().as_str() {
        "none" => Box::new(DisabledAnalyzer),
        "claude" => Box::new(ClaudeAnalyzer::new(config)?),
        "ollama" => Box::new(OllamaAnalyzer::new(config)?),
        other => {
            log::warn!("Unknown analyzer provider '{}', using ollama", other);
            Box::new(OllamaAnalyzer::new(config)?)
        }
    };
    Ok(analyzer)
}

/// Remove `<think>` sections and any other tags, then collapse whitespace.
pub fn strip_thinking(text: &str) -> String {
    let without_thinking = THINK_REGEX.replace_all(text, "");
    let cleaned = TAG_REGEX.replace_all(&without_thinking, "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn user_message(prompt: &str, text: &str) -> String {
    format!("{}\n\nTweet: {}", prompt, text)
}

/// Analysis disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAnalyzer;

#[async_trait]
impl Analyzer for DisabledAnalyzer {
    async fn analyze(&self, _text: &str) -> String {
        NO_ANALYSIS.to_string()
    }
}

// --- Ollama ---

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

/// Analyzer backed by a local Ollama server.
pub struct OllamaAnalyzer {
    client: Client,
    url: String,
    model: String,
    prompt: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl OllamaAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.ollama_model.clone(),
            prompt: config.prompt.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            retry_delay: OLLAMA_RETRY_DELAY,
        })
    }

    /// Override the initial delay between retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let jitter: f64 = rand::rng().random_range(0.9..1.1);
        let delay = delay.mul_f64(jitter);
        log::debug!("Waiting {:.2}s before retrying Ollama", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl Analyzer for OllamaAnalyzer {
    async fn analyze(&self, text: &str) -> String {
        let endpoint = format!("{}/api/chat", self.url);
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": OLLAMA_SYSTEM_PROMPT },
                { "role": "user", "content": user_message(&self.prompt, text) },
            ],
            "stream": false,
        });

        let mut delay = self.retry_delay;
        let mut timeout = self.timeout;

        for attempt in 0..=self.max_retries {
            let last = attempt == self.max_retries;
            log::info!("Analyzing post with Ollama model {}", self.model);
            log::debug!("Attempt {} of {}", attempt + 1, self.max_retries + 1);

            let result = self
                .client
                .post(&endpoint)
                .timeout(timeout)
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(response) if response.status() == StatusCode::OK => {
                    return match response.json::<OllamaResponse>().await {
                        Ok(body) => strip_thinking(
                            &body.message.map(|m| m.content).unwrap_or_default(),
                        ),
                        Err(e) => {
                            log::error!("Invalid Ollama response: {}", e);
                            format!("Error: {}", e)
                        }
                    };
                }
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    log::error!("Model {} not found in Ollama", self.model);
                    return "Error: Model not found".to_string();
                }
                Ok(response) if response.status().is_server_error() => {
                    log::error!("Ollama server error (status {})", response.status());
                    if last {
                        return "Error: Server error".to_string();
                    }
                }
                Ok(response) => {
                    log::error!("Ollama request failed with status {}", response.status());
                    return "Error: Request failed".to_string();
                }
                Err(e) if e.is_timeout() => {
                    log::error!("Ollama request timed out after {:?}", timeout);
                    if last {
                        return "Error: Request timed out".to_string();
                    }
                    timeout = timeout.mul_f64(1.5);
                }
                Err(e) if e.is_connect() => {
                    log::error!("Connection error to Ollama at {}: {}", self.url, e);
                    if last {
                        return "Error: Connection failed".to_string();
                    }
                }
                Err(e) => {
                    log::error!("Error in Ollama analysis: {}", e);
                    if last {
                        return format!("Error: {}", e);
                    }
                }
            }

            self.pause(delay).await;
            delay = delay.mul_f64(1.5);
        }

        "Error: Server error".to_string()
    }
}

// --- Claude ---

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    content: Vec<ClaudeBlock>,
}

#[derive(Debug, Deserialize)]
struct ClaudeBlock {
    #[serde(default)]
    text: String,
}

/// Analyzer backed by the Anthropic Messages API.
pub struct ClaudeAnalyzer {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    prompt: String,
}

impl ClaudeAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            api_url: CLAUDE_API_URL.to_string(),
            api_key: config.claude_api_key.clone().filter(|k| !k.is_empty()),
            model: config.claude_model.clone(),
            prompt: config.prompt.clone(),
        })
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    async fn request(&self, api_key: &str, text: &str) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": user_message(&self.prompt, text) }],
            }],
            "max_tokens": CLAUDE_MAX_TOKENS,
            "temperature": CLAUDE_TEMPERATURE,
        });

        let body: ClaudeResponse = self
            .client
            .post(&self.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = body
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .unwrap_or_default();
        Ok(strip_thinking(&text))
    }
}

#[async_trait]
impl Analyzer for ClaudeAnalyzer {
    async fn analyze(&self, text: &str) -> String {
        let Some(api_key) = self.api_key.as_deref() else {
            log::error!("No Claude API key configured");
            return "Error: No API key configured".to_string();
        };

        log::info!("Analyzing post with Claude model {}", self.model);
        match self.request(api_key, text).await {
            Ok(analysis) => {
                log::debug!("Claude analysis: {}", analysis);
                analysis
            }
            Err(e) => {
                log::error!("Error in Claude analysis: {}", e);
                format!("Error: {}", e)
            }
        }
    }
}
