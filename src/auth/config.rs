// Authentication Configuration
// Action timeout, verification resend cooldown and the application origin used in email links

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::config::ConfigError;

/// Main authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfig {
    /// Upper bound for each user-initiated action, in milliseconds (default: 15s)
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,

    /// Minimum spacing between verification emails to one address (default: 60s)
    #[serde(default = "default_resend_cooldown_secs")]
    pub resend_cooldown_secs: i64,

    /// Origin prepended to the return paths embedded in emails
    #[serde(default = "default_app_origin")]
    pub app_origin: String,
}

fn default_action_timeout_ms() -> u64 {
    15_000
}

fn default_resend_cooldown_secs() -> i64 {
    60
}

fn default_app_origin() -> String {
    "http://localhost:3000".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: default_action_timeout_ms(),
            resend_cooldown_secs: default_resend_cooldown_secs(),
            app_origin: default_app_origin(),
        }
    }
}

impl AuthConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.action_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "auth.action_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.resend_cooldown_secs < 0 {
            return Err(ConfigError::Invalid {
                key: "auth.resend_cooldown_secs".to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        let origin = Url::parse(&self.app_origin).map_err(|e| ConfigError::Invalid {
            key: "auth.app_origin".to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "auth.app_origin".to_string(),
                reason: format!("unsupported scheme '{}'", origin.scheme()),
            });
        }

        Ok(())
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn resend_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.resend_cooldown_secs)
    }

    /// Absolute URL for an application path, falling back to the bare path
    /// when the origin cannot be joined
    pub fn absolute_url(&self, path: &str) -> String {
        Url::parse(&self.app_origin)
            .and_then(|origin| origin.join(path))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| path.to_string())
    }
}
