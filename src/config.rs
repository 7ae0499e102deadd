use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::auth::config::AuthConfig;
use crate::auth::guards::RoutePaths;
use crate::security::{MAX_POLICY_SECS, RateLimitConfig};
use crate::telemetry::LoggingConfig;

/// Prefix for environment overrides, e.g. `STOREFRONT_AUTH_AUTH__ACTION_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "STOREFRONT_AUTH_";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Configuration for the session layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub routes: RoutePaths,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Layer defaults, an optional TOML file and `STOREFRONT_AUTH_*` variables, then validate
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment
            .extract()
            .context("Failed to load session configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.validate()?;

        for (action, policy) in self.rate_limits.policies() {
            let section = action.config_key();
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid {
                    key: format!("rate_limits.{section}.max_attempts"),
                    reason: "must be at least 1".to_string(),
                });
            }
            for (field, secs) in [
                ("window_secs", policy.window_secs),
                ("lockout_secs", policy.lockout_secs),
            ] {
                if !(1..=MAX_POLICY_SECS).contains(&secs) {
                    return Err(ConfigError::Invalid {
                        key: format!("rate_limits.{section}.{field}"),
                        reason: format!("must be between 1 and {MAX_POLICY_SECS} seconds"),
                    });
                }
            }
        }

        self.routes.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limits.login.max_attempts, 5);
        assert_eq!(config.routes.login, "/login");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[auth]
action_timeout_ms = 5000
app_origin = "https://shop.example.com"

[rate_limits.login]
max_attempts = 3
window_secs = 600
lockout_secs = 1200

[routes]
admin_dashboard = "/admin/overview"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.auth.action_timeout_ms, 5000);
        assert_eq!(config.auth.resend_cooldown_secs, 60);
        assert_eq!(config.rate_limits.login.max_attempts, 3);
        assert_eq!(config.rate_limits.register.max_attempts, 3);
        assert_eq!(config.routes.admin_dashboard, "/admin/overview");
        assert_eq!(config.routes.home, "/");
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default();
        config.rate_limits.register.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key, .. }) if key == "rate_limits.register.max_attempts"
        ));
    }

    #[test]
    fn test_out_of_range_window_rejected() {
        let mut config = Config::default();
        config.rate_limits.login.window_secs = i64::MAX / 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key, .. }) if key == "rate_limits.login.window_secs"
        ));

        let mut config = Config::default();
        config.rate_limits.password_reset.lockout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key, .. }) if key == "rate_limits.password_reset.lockout_secs"
        ));

        let mut config = Config::default();
        config.rate_limits.resend_verification.window_secs = MAX_POLICY_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relative_route_rejected() {
        let mut config = Config::default();
        config.routes.login = "login".to_string();
        assert!(config.validate().is_err());
    }
}
