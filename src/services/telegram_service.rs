use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};

use crate::dto::telegram_dto::{ApiResponse, InlineKeyboardMarkup, SentMessage, WebhookInfo};
use crate::error::{Error, Result};

/// Outbound chat transport used by the handlers and the bot.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<SentMessage>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    /// Removes the inline keyboard of an already delivered message.
    async fn edit_message_reply_markup(&self, chat_id: i64, message_id: i64) -> Result<()>;
}

#[derive(Clone)]
pub struct TelegramGateway {
    client: Client,
    bot_token: String,
}

impl TelegramGateway {
    pub fn new(client: Client, bot_token: String) -> Self {
        Self { client, bot_token }
    }

    fn method_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &JsonValue) -> Result<T> {
        let res = self
            .client
            .post(self.method_url(method))
            .json(body)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;
        let status = res.status();
        let parsed: ApiResponse<T> = res.json().await?;
        if !parsed.ok {
            return Err(Error::Messaging(format!(
                "{} failed ({}): {}",
                method,
                status,
                parsed.description.unwrap_or_default()
            )));
        }
        parsed
            .result
            .ok_or_else(|| Error::Messaging(format!("{} returned no result", method)))
    }

    /// Points the bot at `target_url` unless it already is.
    pub async fn ensure_webhook(&self, target_url: &str, secret: Option<&str>) -> Result<()> {
        let info: WebhookInfo = self.call("getWebhookInfo", &json!({})).await?;
        if info.url == target_url && secret.is_none() {
            tracing::info!("Telegram webhook is already up to date: {}", info.url);
            return Ok(());
        }

        let mut body = json!({
            "url": target_url,
            "allowed_updates": ["message", "callback_query"]
        });
        if let Some(secret) = secret {
            body["secret_token"] = json!(secret);
        }
        let _: bool = self.call("setWebhook", &body).await?;
        tracing::info!("Telegram webhook registered: {} -> {}", info.url, target_url);
        Ok(())
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<SentMessage> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = serde_json::to_value(keyboard)?;
        }
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        tracing::info!(chat_id, message_id = sent.message_id, "Telegram message sent");
        Ok(sent)
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }

    async fn edit_message_reply_markup(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": { "inline_keyboard": [] }
        });
        // Telegram answers with the edited Message object here.
        let _: JsonValue = self.call("editMessageReplyMarkup", &body).await?;
        Ok(())
    }
}
