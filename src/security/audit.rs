use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::error::ErrorCode;

/// How many events the auditor keeps in memory for inspection
const RECENT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SecurityEventType {
    AuthenticationSuccess,
    AuthenticationFailure,
    RegistrationCompleted,
    ForcedSignOut,
    RateLimitLockout,
    VerificationSynced,
    ProfileRepaired,
    DegradedSession,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SecuritySeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub code: Option<ErrorCode>,
    pub details: HashMap<String, String>,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        severity: SecuritySeverity,
        user_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            severity,
            user_id,
            action: None,
            code: None,
            details: HashMap::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_detail<K: ToString, V: ToString>(mut self, key: K, value: V) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Emits security events to `tracing` and keeps a short in-memory tail
#[derive(Clone, Default)]
pub struct SecurityAuditor {
    recent: Arc<Mutex<VecDeque<SecurityEvent>>>,
}

impl SecurityAuditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a security event
    pub fn log_event(&self, event: SecurityEvent) {
        match event.severity {
            SecuritySeverity::Low => {
                info!(
                    target: "security_audit",
                    event_id = %event.id,
                    event_type = ?event.event_type,
                    user_id = ?event.user_id,
                    action = ?event.action,
                    "Security event logged"
                );
            }
            SecuritySeverity::Medium => {
                warn!(
                    target: "security_audit",
                    event_id = %event.id,
                    event_type = ?event.event_type,
                    user_id = ?event.user_id,
                    action = ?event.action,
                    code = ?event.code,
                    "Security warning logged"
                );
            }
            SecuritySeverity::High | SecuritySeverity::Critical => {
                error!(
                    target: "security_audit",
                    event_id = %event.id,
                    event_type = ?event.event_type,
                    severity = ?event.severity,
                    user_id = ?event.user_id,
                    action = ?event.action,
                    code = ?event.code,
                    details = ?event.details,
                    "Critical security event logged"
                );
            }
        }

        let mut recent = self
            .recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() == RECENT_EVENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(event);
    }

    pub fn log_auth_success(&self, user_id: &str, action: &str) {
        let event = SecurityEvent::new(
            SecurityEventType::AuthenticationSuccess,
            SecuritySeverity::Low,
            Some(user_id.to_string()),
        )
        .with_action(action);

        self.log_event(event);
    }

    pub fn log_auth_failure(&self, user_id: Option<&str>, action: &str, code: ErrorCode) {
        let event = SecurityEvent::new(
            SecurityEventType::AuthenticationFailure,
            SecuritySeverity::Medium,
            user_id.map(str::to_string),
        )
        .with_action(action)
        .with_code(code);

        self.log_event(event);
    }

    /// A session was torn down because a gate failed
    pub fn log_forced_sign_out(&self, user_id: &str, code: ErrorCode) {
        let severity = if code == ErrorCode::AccountDisabled {
            SecuritySeverity::High
        } else {
            SecuritySeverity::Medium
        };
        let event = SecurityEvent::new(
            SecurityEventType::ForcedSignOut,
            severity,
            Some(user_id.to_string()),
        )
        .with_action("session_invalidation")
        .with_code(code);

        self.log_event(event);
    }

    pub fn log_lockout(&self, action: &str, minutes: i64) {
        let event = SecurityEvent::new(
            SecurityEventType::RateLimitLockout,
            SecuritySeverity::Medium,
            None,
        )
        .with_action(action)
        .with_code(ErrorCode::TooManyAttempts)
        .with_detail("lockout_minutes", minutes);

        self.log_event(event);
    }

    /// Snapshot of the most recent events, oldest first
    pub fn recent_events(&self) -> Vec<SecurityEvent> {
        self.recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn count_of(&self, event_type: &SecurityEventType) -> usize {
        self.recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|event| &event.event_type == event_type)
            .count()
    }
}
