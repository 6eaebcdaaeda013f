//! Settings schema. Every section is `camelCase` on disk and every field has
//! a default, so a partial file only needs the keys it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Upper bound on `session.defaultDuelSecs` (one day).
pub const MAX_DUEL_SECS: u64 = 24 * 60 * 60;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DuelSettings {
    pub server: ServerSettings,
    pub judge: JudgeSettings,
    pub session: SessionSettings,
    pub challenges: ChallengeSettings,
    pub logging: LoggingSettings,
}

impl DuelSettings {
    /// Reject values that would leave the server unable to run.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(SettingsError::InvalidValue("server.port must be non-zero".into()));
        }
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be at least 1".into(),
            ));
        }
        if self.server.client_timeout_secs <= self.server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(
                "server.clientTimeoutSecs must exceed heartbeatIntervalSecs".into(),
            ));
        }
        if self.judge.timeout_ms == 0 {
            return Err(SettingsError::InvalidValue("judge.timeoutMs must be non-zero".into()));
        }
        if self.session.default_duel_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "session.defaultDuelSecs must be non-zero".into(),
            ));
        }
        if self.session.default_duel_secs > MAX_DUEL_SECS {
            return Err(SettingsError::InvalidValue(format!(
                "session.defaultDuelSecs must not exceed {MAX_DUEL_SECS}"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// A connection silent for this long is treated as disconnected.
    pub client_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
        }
    }
}

impl ServerSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct JudgeSettings {
    /// Judge endpoint. Without one, every submission fails judgment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 10_000,
            max_retries: 2,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_secs: 30,
        }
    }
}

impl JudgeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Worst case for one judgment including retries and backoff.
    pub fn total_budget(&self) -> Duration {
        let attempts = u64::from(self.max_retries) + 1;
        Duration::from_millis(
            self.timeout_ms * attempts + self.max_delay_ms * u64::from(self.max_retries),
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// How long a finished session stays queryable before removal.
    pub terminal_retention_secs: u64,
    /// Duel length for challenges that carry no time limit.
    pub default_duel_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            terminal_retention_secs: 30,
            default_duel_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeSettings {
    /// JSON file of extra challenges loaded over the built-in set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_path: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: true,
        }
    }
}
