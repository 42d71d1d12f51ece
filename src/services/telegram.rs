//! Telegram Bot API delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{Deliverer, DeliveryReport};
use crate::error::Result;
use crate::models::TelegramConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends messages through a bot to one chat.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    retry_count: u32,
    retry_delay: Duration,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            retry_count: config.retry_count.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        })
    }

    async fn send_once(&self, message: &str) -> std::result::Result<(), String> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let form = [
            ("chat_id", self.chat_id.as_str()),
            ("text", message),
            ("parse_mode", "HTML"),
            ("disable_web_page_preview", "false"),
        ];

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;
        if status != StatusCode::OK {
            return Err(format!("HTTP {}: {}", status, body));
        }

        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(api) if api.ok => Ok(()),
            Ok(api) => Err(api
                .description
                .unwrap_or_else(|| "Telegram returned ok=false".to_string())),
            Err(e) => Err(format!("Invalid Telegram response: {}", e)),
        }
    }
}

#[async_trait]
impl Deliverer for TelegramNotifier {
    async fn deliver(&self, message: &str) -> DeliveryReport {
        if self.chat_id.trim().is_empty() {
            log::error!("No chat ID provided and no default chat ID set");
            return DeliveryReport::failed("No chat ID provided");
        }

        for attempt in 1..=self.retry_count {
            log::info!(
                "Sending message to Telegram chat {} (attempt {}/{})",
                self.chat_id,
                attempt,
                self.retry_count
            );

            match self.send_once(message).await {
                Ok(()) => {
                    log::info!("Message sent successfully");
                    return DeliveryReport::delivered();
                }
                Err(e) => log::error!("Failed to send message: {}", e),
            }

            if attempt < self.retry_count && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        DeliveryReport::failed("Failed to send message after retries")
    }
}
