use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::transport::QueueSettings;

/// Runtime settings, read from the `config` object of `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Per-request timeout for listener calls.
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Worker sleep after an empty receive.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
    /// Receives without a delete before a message is dead-lettered.
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    #[serde(default = "default_redrive_max_poll_attempts")]
    pub redrive_max_poll_attempts: u32,
    #[serde(default = "default_dead_letter_page_size")]
    pub dead_letter_page_size: usize,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_delivery_timeout_ms() -> u64 {
    10_000
}
fn default_batch_size() -> usize {
    10
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_visibility_timeout_ms() -> u64 {
    30_000
}
fn default_max_receive_count() -> u32 {
    3
}
fn default_redrive_max_poll_attempts() -> u32 {
    10
}
fn default_dead_letter_page_size() -> usize {
    10
}
fn default_bind_addr() -> String {
    "127.0.0.1:0".into()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: default_delivery_timeout_ms(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            max_receive_count: default_max_receive_count(),
            redrive_max_poll_attempts: default_redrive_max_poll_attempts(),
            dead_letter_page_size: default_dead_letter_page_size(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl DispatcherConfig {
    /// Parse from an optional JSON object; `null`/absent means all defaults.
    pub fn from_value(value: Option<&serde_json::Value>) -> Result<Self> {
        let config = match value {
            None | Some(serde_json::Value::Null) => Self::default(),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| DispatchError::Validation(format!("invalid config: {e}")))?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.delivery_timeout_ms == 0, "delivery_timeout_ms"),
            (self.batch_size == 0, "batch_size"),
            (self.visibility_timeout_ms == 0, "visibility_timeout_ms"),
            (self.max_receive_count == 0, "max_receive_count"),
            (self.redrive_max_poll_attempts == 0, "redrive_max_poll_attempts"),
            (self.dead_letter_page_size == 0, "dead_letter_page_size"),
        ];
        if let Some((_, field)) = checks.iter().find(|(zero, _)| *zero) {
            return Err(DispatchError::Validation(format!(
                "{field} must be greater than zero"
            )));
        }
        Ok(())
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            visibility_timeout: Duration::from_millis(self.visibility_timeout_ms),
        }
    }
}
