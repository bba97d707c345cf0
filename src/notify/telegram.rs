//! Telegram sink.
//!
//! Posts a plain-text alert to a chat through the Bot API
//! (`POST {base}/bot{token}/sendMessage`). The token never appears in logs.
//! No `parse_mode`: names and URLs go out verbatim.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, info};

use super::{format_alert, NotificationSink};
use crate::types::Opportunity;

const BASE_URL: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
}

pub struct TelegramSink {
    http: Client,
    bot_token: SecretString,
    chat_id: String,
    base_url: String,
}

impl TelegramSink {
    pub fn new(bot_token: SecretString, chat_id: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("FLOORSCOUT/0.1.0 (alerts)")
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        Ok(Self {
            http,
            bot_token,
            chat_id,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point at a different Bot API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build from the env vars named in config. `None` when either is unset
    /// or empty, which disables the sink.
    pub fn from_env(token_env: &str, chat_id_env: &str) -> Result<Option<Self>> {
        let token = std::env::var(token_env).ok().filter(|v| !v.is_empty());
        let chat_id = std::env::var(chat_id_env).ok().filter(|v| !v.is_empty());
        match (token, chat_id) {
            (Some(token), Some(chat_id)) => {
                info!(chat_id = %chat_id, "Telegram alerts enabled");
                Ok(Some(Self::new(SecretString::new(token), chat_id)?))
            }
            _ => {
                debug!(token_env, chat_id_env, "Telegram alerts disabled");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    fn name(&self) -> String {
        "telegram".to_string()
    }

    async fn deliver(&self, opportunity: &Opportunity) -> Result<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.base_url,
            self.bot_token.expose_secret()
        );
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: format!("Arbitrage opportunity\n\n{}", format_alert(opportunity)),
        };

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            // reqwest errors embed the URL, which carries the token.
            .map_err(|e| anyhow::anyhow!("Telegram request failed: {}", e.without_url()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error {status}: {text}");
        }

        debug!(listing_ref = %opportunity.listing_ref, "Telegram message sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemIdentity;
    use axum::{extract::Path, http::StatusCode, routing::post, Json, Router};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    fn opportunity() -> Opportunity {
        let now = Utc::now();
        Opportunity {
            id: Some(1),
            identity: ItemIdentity::new("Rayquaza Gold Star", "EN", Some("PSA 8".into())),
            listing_ref: "L42".into(),
            listing_url: Some("https://example.com/L42".into()),
            listing_total_cost: dec!(900),
            floor_price: dec!(1400),
            sample_size: 6,
            discount_pct: dec!(35.7),
            gross_profit: dec!(500),
            marketplace_fees: dec!(182),
            net_profit: dec!(313),
            margin_pct: dec!(34.8),
            is_active: true,
            alerted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Local stand-in for the Bot API. Returns its base URL.
    async fn spawn_bot_api(status: StatusCode, captured: Captured) -> String {
        let app = Router::new().route(
            "/*path",
            post(move |Path(path): Path<String>, Json(body): Json<serde_json::Value>| {
                let captured = captured.clone();
                async move {
                    captured.lock().unwrap().push((path, body));
                    (status, "{}")
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_deliver_posts_plain_text_message() {
        let captured: Captured = Arc::default();
        let base = spawn_bot_api(StatusCode::OK, captured.clone()).await;

        let sink = TelegramSink::new(SecretString::new("123:abc".into()), "-100777".into())
            .unwrap()
            .with_base_url(base);
        sink.deliver(&opportunity()).await.unwrap();

        let calls = captured.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.ends_with("bot123:abc/sendMessage"));
        assert_eq!(calls[0].1["chat_id"], "-100777");
        assert!(calls[0].1.get("parse_mode").is_none());
        assert!(calls[0].1["text"].as_str().unwrap().contains("Rayquaza Gold Star"));
    }

    #[tokio::test]
    async fn test_markup_characters_sent_verbatim() {
        let captured: Captured = Arc::default();
        let base = spawn_bot_api(StatusCode::OK, captured.clone()).await;

        let mut opp = opportunity();
        opp.identity.name = "Mr_Mime *Promo".into();
        opp.listing_url = Some("https://example.com/itm/mr_mime_promo".into());
        let sink = TelegramSink::new(SecretString::new("123:abc".into()), "-100777".into())
            .unwrap()
            .with_base_url(base);
        sink.deliver(&opp).await.unwrap();

        let calls = captured.lock().unwrap();
        let text = calls[0].1["text"].as_str().unwrap();
        assert!(text.contains("Card: Mr_Mime *Promo"));
        assert!(text.contains("https://example.com/itm/mr_mime_promo"));
        assert!(calls[0].1.get("parse_mode").is_none());
    }

    #[tokio::test]
    async fn test_deliver_surfaces_api_error() {
        let captured: Captured = Arc::default();
        let base = spawn_bot_api(StatusCode::UNAUTHORIZED, captured).await;

        let sink = TelegramSink::new(SecretString::new("bad".into()), "1".into())
            .unwrap()
            .with_base_url(base);
        let err = sink.deliver(&opportunity()).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_from_env_disabled_when_unset() {
        let sink = TelegramSink::from_env(
            "FLOORSCOUT_TEST_UNSET_TOKEN_VAR",
            "FLOORSCOUT_TEST_UNSET_CHAT_VAR",
        )
        .unwrap();
        assert!(sink.is_none());
    }
}
