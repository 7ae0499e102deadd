// Resend Cooldown
// Minimum spacing between verification emails sent to the same address

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownStatus {
    pub on_cooldown: bool,
    pub remaining_seconds: i64,
}

/// Tracks when a verification email was last sent per address
pub struct ResendCooldown {
    period: Duration,
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl ResendCooldown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_sent: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn status(&self, email: &str) -> CooldownStatus {
        let key = email.trim().to_lowercase();
        let last_sent = self
            .last_sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match last_sent.get(&key) {
            Some(sent_at) => {
                let ready_at = *sent_at + self.period;
                let now = self.clock.now();
                if ready_at > now {
                    let millis = (ready_at - now).num_milliseconds();
                    CooldownStatus {
                        on_cooldown: true,
                        remaining_seconds: (millis + 999) / 1000,
                    }
                } else {
                    CooldownStatus {
                        on_cooldown: false,
                        remaining_seconds: 0,
                    }
                }
            }
            None => CooldownStatus {
                on_cooldown: false,
                remaining_seconds: 0,
            },
        }
    }

    /// Start the cooldown for `email` from now
    pub fn mark_sent(&self, email: &str) {
        let key = email.trim().to_lowercase();
        self.last_sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, self.clock.now());
    }
}
