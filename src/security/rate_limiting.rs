// Rate Limiting Module
// Client-side throttle for sensitive auth actions, keyed per (action, identifier)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::security::SecurityAuditor;
use crate::security::rate_limit_store::{
    InMemoryRateLimitStore, RateLimitRecord, RateLimitStore,
};

/// Prefix shared by every rate limit key so a global clear can find them
pub const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit:";

/// Sensitive actions that are throttled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RateLimitAction {
    Login,
    Register,
    PasswordReset,
    ResendVerification,
}

impl RateLimitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAction::Login => "login",
            RateLimitAction::Register => "register",
            RateLimitAction::PasswordReset => "passwordReset",
            RateLimitAction::ResendVerification => "resendVerification",
        }
    }

    /// Field name of this action's policy in `RateLimitConfig`
    pub fn config_key(&self) -> &'static str {
        match self {
            RateLimitAction::Login => "login",
            RateLimitAction::Register => "register",
            RateLimitAction::PasswordReset => "password_reset",
            RateLimitAction::ResendVerification => "resend_verification",
        }
    }
}

/// Longest accepted window or lockout: 30 days
pub const MAX_POLICY_SECS: i64 = 30 * 24 * 60 * 60;

/// Attempts allowed per window and how long a lockout lasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window_secs: i64,
    pub lockout_secs: i64,
}

impl RateLimitPolicy {
    pub const fn new(max_attempts: u32, window_secs: i64, lockout_secs: i64) -> Self {
        Self {
            max_attempts,
            window_secs,
            lockout_secs,
        }
    }

    /// `None` when the configured seconds are out of range
    pub fn window(&self) -> Option<Duration> {
        Duration::try_seconds(self.window_secs)
    }

    pub fn lockout(&self) -> Option<Duration> {
        Duration::try_seconds(self.lockout_secs)
    }
}

/// Per-action rate limit table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable/disable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub login: RateLimitPolicy,
    pub register: RateLimitPolicy,
    pub password_reset: RateLimitPolicy,
    pub resend_verification: RateLimitPolicy,
}

fn default_enabled() -> bool {
    true
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // Login is the most frequent and most lenient
            login: RateLimitPolicy::new(5, 15 * 60, 30 * 60),
            register: RateLimitPolicy::new(3, 60 * 60, 60 * 60),
            password_reset: RateLimitPolicy::new(3, 60 * 60, 60 * 60),
            resend_verification: RateLimitPolicy::new(5, 60 * 60, 30 * 60),
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self, action: RateLimitAction) -> &RateLimitPolicy {
        match action {
            RateLimitAction::Login => &self.login,
            RateLimitAction::Register => &self.register,
            RateLimitAction::PasswordReset => &self.password_reset,
            RateLimitAction::ResendVerification => &self.resend_verification,
        }
    }

    pub fn policy_mut(&mut self, action: RateLimitAction) -> &mut RateLimitPolicy {
        match action {
            RateLimitAction::Login => &mut self.login,
            RateLimitAction::Register => &mut self.register,
            RateLimitAction::PasswordReset => &mut self.password_reset,
            RateLimitAction::ResendVerification => &mut self.resend_verification,
        }
    }

    pub fn policies(&self) -> [(RateLimitAction, &RateLimitPolicy); 4] {
        [
            (RateLimitAction::Login, &self.login),
            (RateLimitAction::Register, &self.register),
            (RateLimitAction::PasswordReset, &self.password_reset),
            (RateLimitAction::ResendVerification, &self.resend_verification),
        ]
    }
}

/// Rate limit key type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub action: RateLimitAction,
    pub identifier: String,
}

impl RateLimitKey {
    /// Identifiers are trimmed and lower-cased so `A@b.com ` and `a@b.com` share a counter
    pub fn new(action: RateLimitAction, identifier: &str) -> Self {
        Self {
            action,
            identifier: identifier.trim().to_lowercase(),
        }
    }

    pub fn as_string(&self) -> String {
        format!(
            "{}{}:{}",
            RATE_LIMIT_KEY_PREFIX,
            self.action.as_str(),
            self.identifier
        )
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub locked: bool,
    pub minutes_remaining: Option<i64>,
    pub attempts_remaining: Option<u32>,
}

impl RateLimitStatus {
    fn allowed(attempts_remaining: Option<u32>) -> Self {
        Self {
            allowed: true,
            locked: false,
            minutes_remaining: None,
            attempts_remaining,
        }
    }

    fn locked(lock_until: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            locked: true,
            minutes_remaining: Some(minutes_until(lock_until, now)),
            attempts_remaining: Some(0),
        }
    }

    /// Human-readable explanation for a refused check
    pub fn message(&self) -> Option<String> {
        if self.allowed {
            return None;
        }
        let minutes = self.minutes_remaining.unwrap_or(1);
        Some(format!(
            "Too many failed attempts. Please try again in {} minute(s).",
            minutes
        ))
    }
}

fn minutes_until(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (until - now).num_milliseconds().max(0);
    (millis + 59_999) / 60_000
}

/// Local throttle for sensitive actions.
///
/// Never returns an error: when the backing store fails, checks degrade to
/// `allowed` since the identity provider enforces the real limits.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    /// Security auditor for logging
    security_auditor: Option<Arc<SecurityAuditor>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            security_auditor: None,
        }
    }

    /// In-memory limiter with the default policy table
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryRateLimitStore::new()),
            RateLimitConfig::default(),
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set security auditor for logging
    pub fn with_security_auditor(mut self, security_auditor: Arc<SecurityAuditor>) -> Self {
        self.security_auditor = Some(security_auditor);
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Update the policy for one action
    pub fn update_policy(&mut self, action: RateLimitAction, policy: RateLimitPolicy) {
        *self.config.policy_mut(action) = policy;
        info!(
            action = action.as_str(),
            "Updated rate limit policy for action"
        );
    }

    /// Check whether `action` may be attempted for `identifier`.
    ///
    /// Must be called before the sensitive action. Re-arms a lockout when the
    /// stored attempts are already at the cap.
    pub fn check_rate_limit(&self, action: RateLimitAction, identifier: &str) -> RateLimitStatus {
        if !self.config.enabled {
            return RateLimitStatus::allowed(None);
        }

        let policy = *self.config.policy(action);
        let key = RateLimitKey::new(action, identifier).as_string();

        let record = match self.store.load(&key) {
            Ok(Some(record)) => record,
            Ok(None) => return RateLimitStatus::allowed(Some(policy.max_attempts)),
            Err(e) => {
                warn!(action = action.as_str(), "Rate limit storage error: {}", e);
                // Fail open
                return RateLimitStatus::allowed(None);
            }
        };

        let now = self.clock.now();

        if let Some(lock_until) = record.lock_until {
            if now < lock_until {
                debug!(action = action.as_str(), "Rate limit lockout still active");
                return RateLimitStatus::locked(lock_until, now);
            }
        }

        if now > record.window_end {
            if let Err(e) = self.store.remove(&key) {
                warn!(action = action.as_str(), "Failed to reset expired window: {}", e);
            }
            return RateLimitStatus::allowed(Some(policy.max_attempts));
        }

        if record.attempts >= policy.max_attempts {
            return match self.arm_lockout(action, &key, record, now, &policy) {
                Some(lock_until) => RateLimitStatus::locked(lock_until, now),
                None => RateLimitStatus::allowed(None),
            };
        }

        RateLimitStatus::allowed(Some(policy.max_attempts - record.attempts))
    }

    /// Count one failed attempt inside the current window, opening a new
    /// window when none exists or the previous one expired.
    pub fn record_failed_attempt(&self, action: RateLimitAction, identifier: &str) {
        if !self.config.enabled {
            return;
        }

        let policy = *self.config.policy(action);
        let key = RateLimitKey::new(action, identifier).as_string();
        let now = self.clock.now();

        let existing = match self.store.load(&key) {
            Ok(existing) => existing,
            Err(e) => {
                warn!(action = action.as_str(), "Rate limit storage error: {}", e);
                return;
            }
        };

        let record = match existing {
            Some(record) if now <= record.window_end => {
                if record.attempts >= policy.max_attempts && record.lock_until.is_none() {
                    // Already at the cap: the lockout decision is made here lazily
                    let lock_until = self.arm_lockout(action, &key, record.clone(), now, &policy);
                    RateLimitRecord {
                        attempts: record.attempts.saturating_add(1),
                        lock_until,
                        ..record
                    }
                } else {
                    RateLimitRecord {
                        attempts: record.attempts.saturating_add(1),
                        ..record
                    }
                }
            }
            _ => {
                let Some(window_end) = policy
                    .window()
                    .and_then(|window| now.checked_add_signed(window))
                else {
                    warn!(
                        action = action.as_str(),
                        window_secs = policy.window_secs,
                        "Rate limit window out of range, not counting attempt"
                    );
                    return;
                };
                RateLimitRecord {
                    attempts: 1,
                    window_start: now,
                    window_end,
                    lock_until: None,
                }
            }
        };

        debug!(
            action = action.as_str(),
            attempts = record.attempts,
            "Recorded failed attempt"
        );

        if let Err(e) = self.store.save(&key, &record) {
            warn!(action = action.as_str(), "Failed to record attempt: {}", e);
        }
    }

    /// Remove the record for one pair, typically after a successful action
    pub fn clear_rate_limit(&self, action: RateLimitAction, identifier: &str) {
        let key = RateLimitKey::new(action, identifier).as_string();
        if let Err(e) = self.store.remove(&key) {
            warn!(action = action.as_str(), "Failed to clear rate limit: {}", e);
        }
    }

    /// Remove every rate limit record, used on forced global sign-out
    pub fn clear_all_rate_limits(&self) {
        match self.store.remove_prefixed(RATE_LIMIT_KEY_PREFIX) {
            Ok(count) if count > 0 => info!("Cleared {} rate limit records", count),
            Ok(_) => {}
            Err(e) => warn!("Failed to clear rate limits: {}", e),
        }
    }

    fn arm_lockout(
        &self,
        action: RateLimitAction,
        key: &str,
        record: RateLimitRecord,
        now: DateTime<Utc>,
        policy: &RateLimitPolicy,
    ) -> Option<DateTime<Utc>> {
        let Some(lock_until) = policy
            .lockout()
            .and_then(|lockout| now.checked_add_signed(lockout))
        else {
            warn!(
                action = action.as_str(),
                lockout_secs = policy.lockout_secs,
                "Rate limit lockout out of range, failing open"
            );
            return None;
        };
        let locked = RateLimitRecord {
            lock_until: Some(lock_until),
            ..record
        };
        if let Err(e) = self.store.save(key, &locked) {
            warn!(action = action.as_str(), "Failed to persist lockout: {}", e);
        }

        warn!(action = action.as_str(), "Rate limit exceeded, lockout armed");
        if let Some(auditor) = &self.security_auditor {
            auditor.log_lockout(action.as_str(), minutes_until(lock_until, now));
        }

        Some(lock_until)
    }
}
