//! Best-effort alert delivery.
//!
//! Alerts fan out to the configured channels (Telegram bot, Bark, WeCom
//! webhook) and every attempt lands in the alerts table. Delivery failures
//! are logged and swallowed: alerting never blocks or rolls back the core
//! loop.

use std::collections::HashMap;
use std::time::Duration;

use common::now_ms;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use storage::{AlertRow, DbHandle, WriteOp};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BarkConfig {
    pub enabled: bool,
    pub url: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeComConfig {
    pub enabled: bool,
    pub webhook: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    pub dedup_ttl_ms: i64,
    pub telegram: TelegramConfig,
    pub bark: BarkConfig,
    pub wecom: WeComConfig,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dedup_ttl_ms: 300_000,
            telegram: TelegramConfig::default(),
            bark: BarkConfig::default(),
            wecom: WeComConfig::default(),
        }
    }
}

pub struct AlertManager {
    config: AlertsConfig,
    db: DbHandle,
    client: Option<reqwest::Client>,
    dedup: Mutex<HashMap<String, i64>>,
}

impl AlertManager {
    pub fn new(config: AlertsConfig, db: DbHandle) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok();
        Self {
            config,
            db,
            client,
            dedup: Mutex::new(HashMap::new()),
        }
    }

    /// Send an alert to every enabled channel.
    ///
    /// `dedup_key` suppresses repeats inside the configured TTL window.
    pub async fn alert(
        &self,
        strategy: &str,
        level: &str,
        title: &str,
        message: &str,
        dedup_key: Option<&str>,
    ) {
        let now = now_ms();

        if let Some(key) = dedup_key {
            let mut dedup = self.dedup.lock();
            if let Some(&last) = dedup.get(key) {
                if now - last < self.config.dedup_ttl_ms {
                    return;
                }
            }
            dedup.insert(key.to_string(), now);
        }

        let full_message = if title.is_empty() {
            message.to_string()
        } else {
            format!("{}: {}", title, message)
        };

        if !self.config.enabled {
            self.record(strategy, "disabled", level, &full_message, dedup_key, now)
                .await;
            return;
        }

        let mut channels_sent = 0;

        if self.config.telegram.enabled {
            if self.send_telegram(&full_message).await {
                channels_sent += 1;
            }
            self.record(strategy, "telegram", level, &full_message, dedup_key, now)
                .await;
        }

        if self.config.bark.enabled {
            if self.send_bark(title, message).await {
                channels_sent += 1;
            }
            self.record(strategy, "bark", level, &full_message, dedup_key, now)
                .await;
        }

        if self.config.wecom.enabled {
            if self.send_wecom(&full_message).await {
                channels_sent += 1;
            }
            self.record(strategy, "wecom", level, &full_message, dedup_key, now)
                .await;
        }

        if channels_sent == 0 && !self.config.telegram.enabled && !self.config.bark.enabled
            && !self.config.wecom.enabled
        {
            self.record(strategy, "none", level, &full_message, dedup_key, now)
                .await;
        }
    }

    async fn record(
        &self,
        strategy: &str,
        channel: &str,
        level: &str,
        message: &str,
        dedup_key: Option<&str>,
        now: i64,
    ) {
        self.db
            .write(WriteOp::InsertAlert(AlertRow {
                strategy: strategy.to_string(),
                ts_ms: now,
                channel: channel.to_string(),
                level: level.to_string(),
                message: message.to_string(),
                dedup_key: dedup_key.map(str::to_string),
            }))
            .await;
    }

    async fn send_telegram(&self, message: &str) -> bool {
        let token = &self.config.telegram.token;
        let chat_id = &self.config.telegram.chat_id;
        if token.is_empty() || chat_id.is_empty() {
            warn!("telegram alert enabled but token/chat_id missing");
            return false;
        }
        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
        self.post_json(&url, serde_json::json!({ "chat_id": chat_id, "text": message }), "telegram")
            .await
    }

    async fn send_bark(&self, title: &str, message: &str) -> bool {
        let base = self.config.bark.url.trim_end_matches('/');
        let key = &self.config.bark.key;
        if base.is_empty() || key.is_empty() {
            warn!("bark alert enabled but url/key missing");
            return false;
        }
        let url = format!("{}/{}", base, key);
        self.post_json(&url, serde_json::json!({ "title": title, "body": message }), "bark")
            .await
    }

    async fn send_wecom(&self, message: &str) -> bool {
        let webhook = &self.config.wecom.webhook;
        if webhook.is_empty() {
            warn!("wecom alert enabled but webhook missing");
            return false;
        }
        self.post_json(
            webhook,
            serde_json::json!({ "msgtype": "text", "text": { "content": message } }),
            "wecom",
        )
        .await
    }

    async fn post_json(&self, url: &str, payload: serde_json::Value, channel: &str) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        match client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(channel = channel, status = %resp.status(), "alert send rejected");
                false
            }
            Err(e) => {
                warn!(channel = channel, error = %e, "alert send failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{spawn_db, Store};

    fn manager(config: AlertsConfig) -> AlertManager {
        AlertManager::new(config, spawn_db(Store::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn test_dedup_suppresses_within_ttl() {
        let m = manager(AlertsConfig {
            enabled: false,
            dedup_ttl_ms: 60_000,
            ..Default::default()
        });

        m.alert("default", "INFO", "ENTRY", "long @ 100", Some("entry_default"))
            .await;
        m.alert("default", "INFO", "ENTRY", "long @ 100", Some("entry_default"))
            .await;
        m.db.flush().await;

        // Only the first attempt produced a row
        let dedup = m.dedup.lock();
        assert_eq!(dedup.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_still_records() {
        let m = manager(AlertsConfig {
            enabled: false,
            ..Default::default()
        });
        m.alert("default", "WARN", "DEGRADED", "gap repair failing", None)
            .await;
        m.db.flush().await;
        // No panic, row recorded with channel=disabled; nothing to assert
        // beyond the write path not erroring.
    }
}
