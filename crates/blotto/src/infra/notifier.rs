//! Message sinks for win and withdrawal notifications.

use anyhow::anyhow;
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};

use crate::config::NotifierSettings;

pub fn congratulations_message(prizes: u64, expiry_blocks: u32) -> String {
    format!(
        "Congratulations! You have won {} sats. Withdraw them within {} blocks before they expire.",
        prizes, expiry_blocks
    )
}

pub fn auto_withdrawal_message(prizes: u64, address: &str, preimage: &str) -> String {
    format!(
        "Sent {} sats to {} automatically. Proof of payment: {}",
        prizes, address, preimage
    )
}

pub fn draw_announcement_message(height: u32, prize_pool: u64, winners: usize) -> String {
    format!(
        "The lottery at block {} distributed {} sats across {} winning tickets. The next round is open!",
        height, prize_pool, winners
    )
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Messages a single subscribed user.
    async fn notify(&self, chat_id: i64, message: &str) -> Result<(), anyhow::Error>;
    /// Announces a message on the service's public channel.
    async fn broadcast(&self, message: &str) -> Result<(), anyhow::Error>;
}

/// Used when notifications are disabled.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _chat_id: i64, _message: &str) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn broadcast(&self, _message: &str) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Sends messages through the Telegram bot api, optionally over a SOCKS5
/// proxy so the service's clearnet address stays private.
pub struct TelegramNotifier {
    client: Client,
    bot_api_token: SecretString,
    /// Public channel username, broadcasts land there.
    bot_name: String,
}

impl TelegramNotifier {
    pub fn new(settings: &NotifierSettings) -> Result<Self, anyhow::Error> {
        let mut builder = Client::builder().timeout(Duration::from_secs(settings.tor.timeout_secs));

        if let Some(proxy_address) = &settings.tor.address {
            info!("Routing notifier requests through {}", proxy_address);
            builder = builder.proxy(
                reqwest::Proxy::all(proxy_address)
                    .map_err(|e| anyhow!("invalid proxy address: {}", e))?,
            );
        }

        Ok(Self {
            client: builder.build()?,
            bot_api_token: SecretString::from(settings.telegram.bot_api_token.clone()),
            bot_name: settings.telegram.bot_name.clone(),
        })
    }

    async fn send_message(&self, body: Value) -> Result<(), anyhow::Error> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.bot_api_token.expose_secret()
        );

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("telegram api error: {}", response.status()));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, chat_id: i64, message: &str) -> Result<(), anyhow::Error> {
        self.send_message(json!({
            "chat_id": chat_id,
            "text": message,
        }))
        .await
    }

    async fn broadcast(&self, message: &str) -> Result<(), anyhow::Error> {
        self.send_message(json!({
            "chat_id": format!("@{}", self.bot_name),
            "text": message,
        }))
        .await
    }
}

pub fn create_notifier(settings: &NotifierSettings) -> Result<Arc<dyn Notifier>, anyhow::Error> {
    if settings.enabled {
        info!("Telegram notifier configured");
        Ok(Arc::new(TelegramNotifier::new(settings)?))
    } else {
        info!("Notifications disabled");
        Ok(Arc::new(NoopNotifier))
    }
}
