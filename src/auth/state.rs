//! Canonical authentication state.
//!
//! `AuthStateStore::new` returns a cloneable read handle and the single
//! `AuthStateWriter`. Every write carries the generation it was started under;
//! writes from a superseded generation are dropped.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use super::providers::Principal;
use crate::profile_store::{ProfileRecord, Role};

/// Coarse lifecycle phase derived from the state fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    SignedOut,
    Reconciling,
    Authorized,
    BlockedDisabled,
    BlockedUnverified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAuthState {
    pub principal: Option<Principal>,
    pub profile: Option<ProfileRecord>,
    pub is_authenticated: bool,
    pub email_verified: bool,
    pub is_verified: bool,
    pub is_active: bool,
    pub loading: bool,
    /// Admitted from a fallback profile because the store could not be read
    pub degraded: bool,
    /// User-facing notice from the last failed action or forced sign-out
    pub error: Option<String>,
}

impl Default for CanonicalAuthState {
    fn default() -> Self {
        Self::initial()
    }
}

impl CanonicalAuthState {
    /// State before the first session event: nothing known, still loading
    pub fn initial() -> Self {
        Self {
            principal: None,
            profile: None,
            is_authenticated: false,
            email_verified: false,
            is_verified: false,
            is_active: true,
            loading: true,
            degraded: false,
            error: None,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            loading: false,
            ..Self::initial()
        }
    }

    /// Derived from the profile role on every read, never stored
    pub fn is_admin(&self) -> bool {
        self.is_authenticated
            && self
                .profile
                .as_ref()
                .is_some_and(|profile| profile.role == Role::Admin)
    }

    pub fn role(&self) -> Option<Role> {
        self.profile.as_ref().map(|profile| profile.role)
    }

    pub fn phase(&self) -> SessionPhase {
        if self.principal.is_none() {
            SessionPhase::SignedOut
        } else if self.loading {
            SessionPhase::Reconciling
        } else if !self.is_active {
            SessionPhase::BlockedDisabled
        } else if self.is_authenticated {
            SessionPhase::Authorized
        } else {
            SessionPhase::BlockedUnverified
        }
    }
}

/// Read handle; cheap to clone
#[derive(Clone)]
pub struct AuthStateStore {
    rx: watch::Receiver<CanonicalAuthState>,
}

impl AuthStateStore {
    pub fn new() -> (AuthStateStore, AuthStateWriter) {
        let (tx, rx) = watch::channel(CanonicalAuthState::initial());
        let writer = AuthStateWriter {
            tx,
            inner: Mutex::new(WriterInner {
                generation: 0,
                state: CanonicalAuthState::initial(),
            }),
        };
        (AuthStateStore { rx }, writer)
    }

    pub fn snapshot(&self) -> CanonicalAuthState {
        self.rx.borrow().clone()
    }

    pub fn is_admin(&self) -> bool {
        self.rx.borrow().is_admin()
    }

    pub fn subscribe(&self) -> watch::Receiver<CanonicalAuthState> {
        self.rx.clone()
    }

    /// Stream of states, starting with the current one
    pub fn stream(&self) -> WatchStream<CanonicalAuthState> {
        WatchStream::new(self.rx.clone())
    }

    /// Wait until no reconciliation is in flight
    pub async fn settled(&self) -> CanonicalAuthState {
        let mut rx = self.rx.clone();
        match rx.wait_for(|state| !state.loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        }
    }
}

struct WriterInner {
    generation: u64,
    state: CanonicalAuthState,
}

/// The only handle allowed to mutate `CanonicalAuthState`
pub struct AuthStateWriter {
    tx: watch::Sender<CanonicalAuthState>,
    inner: Mutex<WriterInner>,
}

impl AuthStateWriter {
    fn lock(&self) -> MutexGuard<'_, WriterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new generation, superseding every sequence started before
    pub fn advance(&self) -> u64 {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.generation
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Apply `mutate` if `generation` is still current. Returns whether it was applied.
    fn write(&self, generation: u64, mutate: impl FnOnce(&mut CanonicalAuthState)) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(
                generation,
                current = inner.generation,
                "Dropping write from superseded reconciliation"
            );
            return false;
        }
        mutate(&mut inner.state);
        self.tx.send_replace(inner.state.clone());
        true
    }

    /// Principal observed, profile not yet known
    pub fn begin_reconcile(&self, generation: u64, principal: Principal) -> bool {
        self.write(generation, |state| {
            *state = CanonicalAuthState {
                principal: Some(principal),
                loading: true,
                error: state.error.take(),
                ..CanonicalAuthState::signed_out()
            };
        })
    }

    pub fn authorize(
        &self,
        generation: u64,
        principal: Principal,
        profile: ProfileRecord,
        degraded: bool,
    ) -> bool {
        self.write(generation, |state| {
            *state = CanonicalAuthState {
                principal: Some(principal),
                is_authenticated: true,
                email_verified: profile.email_verified,
                is_verified: profile.is_verified,
                is_active: profile.is_active,
                profile: Some(profile),
                loading: false,
                degraded,
                error: None,
            };
        })
    }

    /// Reset to signed-out, keeping any notice already shown
    pub fn clear_session(&self, generation: u64) -> bool {
        self.write(generation, |state| {
            let error = state.error.take();
            *state = CanonicalAuthState {
                error,
                ..CanonicalAuthState::signed_out()
            };
        })
    }

    /// Reset to signed-out and drop any notice
    pub fn reset(&self, generation: u64) -> bool {
        self.write(generation, |state| {
            *state = CanonicalAuthState::signed_out();
        })
    }

    /// Reset to signed-out with a notice
    pub fn reject(&self, generation: u64, message: impl Into<String>) -> bool {
        let message = message.into();
        self.write(generation, |state| {
            *state = CanonicalAuthState {
                error: Some(message),
                ..CanonicalAuthState::signed_out()
            };
        })
    }

    /// Merge fresh verification flags into an authorized session
    pub fn refresh_profile(&self, generation: u64, profile: ProfileRecord) -> bool {
        self.write(generation, |state| {
            if state.is_authenticated {
                state.email_verified = profile.email_verified;
                state.is_verified = profile.is_verified;
                state.is_active = profile.is_active;
                state.profile = Some(profile);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio_stream::StreamExt;

    fn principal() -> Principal {
        Principal {
            uid: "u1".to_string(),
            email: "u1@x.com".to_string(),
            display_name: None,
            email_verified: true,
            id_token: "tok".to_string(),
            provider_id: "password".to_string(),
        }
    }

    fn profile(role: Role) -> ProfileRecord {
        let mut record = ProfileRecord::for_registration("u1", "u1@x.com", None, Utc::now());
        record.email_verified = true;
        record.is_verified = true;
        record.role = role;
        record
    }

    #[test]
    fn test_initial_state() {
        let (store, _writer) = AuthStateStore::new();
        let state = store.snapshot();
        assert!(state.loading);
        assert!(!state.is_authenticated);
        assert!(!state.is_admin());
        assert_eq!(state.phase(), SessionPhase::SignedOut);
    }

    #[test]
    fn test_admin_is_derived_from_role() {
        let (store, writer) = AuthStateStore::new();
        let generation = writer.advance();
        writer.authorize(generation, principal(), profile(Role::Admin), false);
        assert!(store.is_admin());
        assert_eq!(store.snapshot().phase(), SessionPhase::Authorized);

        let generation = writer.advance();
        writer.authorize(generation, principal(), profile(Role::User), false);
        assert!(!store.is_admin());
    }

    #[test]
    fn test_stale_generation_is_dropped() {
        let (store, writer) = AuthStateStore::new();
        let stale = writer.advance();
        let current = writer.advance();

        assert!(!writer.authorize(stale, principal(), profile(Role::Admin), false));
        assert!(store.snapshot().loading);

        assert!(writer.clear_session(current));
        let state = store.snapshot();
        assert!(!state.loading);
        assert!(!state.is_authenticated);
    }

    #[test]
    fn test_clear_session_keeps_notice() {
        let (store, writer) = AuthStateStore::new();
        let generation = writer.advance();
        writer.reject(generation, "Your account has been disabled.");
        let generation = writer.advance();
        writer.clear_session(generation);
        assert_eq!(
            store.snapshot().error.as_deref(),
            Some("Your account has been disabled.")
        );
    }

    #[test]
    fn test_begin_reconcile_drops_previous_profile() {
        let (store, writer) = AuthStateStore::new();
        let generation = writer.advance();
        writer.authorize(generation, principal(), profile(Role::Admin), false);

        let generation = writer.advance();
        writer.begin_reconcile(generation, principal());
        let state = store.snapshot();
        assert!(state.loading);
        assert!(!state.is_authenticated);
        assert!(state.profile.is_none());
        assert!(!state.is_admin());
        assert_eq!(state.phase(), SessionPhase::Reconciling);
    }

    #[tokio::test]
    async fn test_stream_and_settled() {
        let (store, writer) = AuthStateStore::new();
        let mut stream = store.stream();
        let first = stream.next().await.unwrap();
        assert!(first.loading);

        let generation = writer.advance();
        writer.authorize(generation, principal(), profile(Role::User), false);

        let settled = store.settled().await;
        assert!(settled.is_authenticated);
        let next = stream.next().await.unwrap();
        assert!(next.is_authenticated);
    }
}
