//! Outbound notifications. Telegram is the only wired transport; failures
//! are logged and never propagate into the trading pipeline.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::{EngineError, EngineResult};
use crate::settings::Telegram;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> EngineResult<()>;
}

/// Sends messages through the Telegram bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Returns `None` unless both the token and chat id are configured.
    pub fn from_settings(settings: &Telegram) -> Option<Self> {
        let bot_token = settings.bot_token.clone()?;
        let chat_id = settings.chat_id.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> EngineResult<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": message,
            "disable_web_page_preview": true,
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Rpc(format!("telegram send failed: {}", e)))?;
        if !response.status().is_success() {
            warn!("telegram rejected notification: {}", response.status());
            return Err(EngineError::Rpc(format!(
                "telegram status {}",
                response.status()
            )));
        }
        debug!("telegram notification delivered");
        Ok(())
    }
}

/// No-op sink used when Telegram is not configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _message: &str) -> EngineResult<()> {
        Ok(())
    }
}
