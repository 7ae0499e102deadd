#![allow(dead_code)]

use chrono::Utc;
use std::sync::Arc;
use storefront_auth::auth::{InMemoryIdentityProvider, SessionListener, SessionReconciler};
use storefront_auth::security::{InMemoryRateLimitStore, RateLimiter, SecurityAuditor};
use storefront_auth::{
    CanonicalAuthState, Config, InMemoryProfileStore, ManualClock, ProfileRecord, Role,
};

pub const PASSWORD: &str = "Secret123";

/// Reconciler wired to in-memory adapters and a manual clock
pub struct Harness {
    pub provider: Arc<InMemoryIdentityProvider>,
    pub profiles: Arc<InMemoryProfileStore>,
    pub rate_store: Arc<InMemoryRateLimitStore>,
    pub auditor: Arc<SecurityAuditor>,
    pub clock: ManualClock,
    pub reconciler: Arc<SessionReconciler>,
    listener: Option<SessionListener>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = ManualClock::default();
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let profiles = Arc::new(InMemoryProfileStore::new().with_clock(Arc::new(clock.clone())));
        let rate_store = Arc::new(InMemoryRateLimitStore::new());
        let auditor = Arc::new(SecurityAuditor::new());
        let rate_limiter = RateLimiter::new(rate_store.clone(), config.rate_limits.clone())
            .with_clock(Arc::new(clock.clone()))
            .with_security_auditor(auditor.clone());

        let reconciler = SessionReconciler::new(provider.clone(), profiles.clone(), &config)
            .with_rate_limiter(Arc::new(rate_limiter))
            .with_clock(Arc::new(clock.clone()))
            .with_security_auditor(auditor.clone());

        Self {
            provider,
            profiles,
            rate_store,
            auditor,
            clock,
            reconciler: Arc::new(reconciler),
            listener: None,
        }
    }

    /// Follow the provider session stream
    pub fn start(&mut self) {
        self.listener = Some(self.reconciler.start());
    }

    pub fn stop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.unsubscribe();
        }
    }

    pub fn state(&self) -> CanonicalAuthState {
        self.reconciler.state().snapshot()
    }

    /// Let the listener and any spawned reconciliation run, then wait for loading to clear
    pub async fn settle(&self) -> CanonicalAuthState {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
        self.reconciler.state().settled().await
    }

    /// Account plus matching profile; returns the uid
    pub fn seed_user(&self, email: &str, verified: bool, role: Role) -> String {
        let uid = self.provider.create_account(email, PASSWORD, verified);
        let mut profile = ProfileRecord::for_registration(uid.clone(), email, None, Utc::now());
        profile.email_verified = verified;
        profile.is_verified = verified;
        profile.role = role;
        self.profiles.seed(profile);
        uid
    }
}
