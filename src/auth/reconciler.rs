// Session Reconciler
// Turns provider sessions into canonical auth state and runs the user-facing auth actions

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::AuthConfig;
use super::error::AuthError;
use super::guards::RoutePaths;
use super::providers::{IdentityProvider, Principal};
use super::session::{GateFailure, Session, check_active, evaluate_gates, plan_verification_sync};
use super::state::{AuthStateStore, AuthStateWriter};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{AuthFailure, ErrorCode};
use crate::profile_store::{ProfileRecord, ProfileStore};
use crate::security::{
    CredentialValidator, InMemoryRateLimitStore, RateLimitAction, RateLimiter, ResendCooldown,
    SecurityAuditor, SecurityEvent, SecurityEventType, SecuritySeverity,
};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Session lifecycle notifications for the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthEvent {
    SignedIn {
        uid: String,
        is_admin: bool,
    },
    SignedOut {
        uid: Option<String>,
    },
    /// A session was torn down because it failed a gate
    ForcedSignOut {
        uid: String,
        code: ErrorCode,
        message: String,
        redirect_to: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSuccess {
    pub principal: Principal,
    pub profile: ProfileRecord,
}

impl LoginSuccess {
    pub fn is_admin(&self) -> bool {
        self.profile.is_admin()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSuccess {
    pub uid: String,
    pub email: String,
    /// Whether the verification email went out
    pub email_sent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSync {
    pub email_verified: bool,
    pub is_verified: bool,
    /// Whether the stored profile was written
    pub updated: bool,
}

/// Result of checking a principal against its profile
enum Admission {
    Admitted(ProfileRecord),
    Blocked(GateFailure),
    Superseded,
}

struct ActiveAction<'a>(&'a AtomicUsize);

impl<'a> ActiveAction<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveAction<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the only writer of the canonical auth state.
///
/// Passive reconciliation follows the provider's session stream; active
/// actions (`login`, `register`, ...) run the same gates and write their
/// result last, superseding any passive sequence still in flight.
pub struct SessionReconciler {
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    rate_limiter: Arc<RateLimiter>,
    cooldown: ResendCooldown,
    validator: CredentialValidator,
    security_auditor: Arc<SecurityAuditor>,
    clock: Arc<dyn Clock>,
    writer: AuthStateWriter,
    state: AuthStateStore,
    events: broadcast::Sender<AuthEvent>,
    config: AuthConfig,
    routes: RoutePaths,
    active_actions: AtomicUsize,
    claimed_token: Mutex<Option<String>>,
    passive_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionReconciler {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        config: &Config,
    ) -> Self {
        let (state, writer) = AuthStateStore::new();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let rate_limiter = RateLimiter::new(
            Arc::new(InMemoryRateLimitStore::new()),
            config.rate_limits.clone(),
        );

        Self {
            provider,
            profiles,
            rate_limiter: Arc::new(rate_limiter),
            cooldown: ResendCooldown::new(config.auth.resend_cooldown()),
            validator: CredentialValidator::new(),
            security_auditor: Arc::new(SecurityAuditor::new()),
            clock: Arc::new(SystemClock),
            writer,
            state,
            events,
            config: config.auth.clone(),
            routes: config.routes.clone(),
            active_actions: AtomicUsize::new(0),
            claimed_token: Mutex::new(None),
            passive_task: Mutex::new(None),
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Clock for profile timestamps and the resend cooldown
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cooldown = ResendCooldown::new(self.config.resend_cooldown()).with_clock(clock.clone());
        self.clock = clock;
        self
    }

    /// Set security auditor for logging
    pub fn with_security_auditor(mut self, security_auditor: Arc<SecurityAuditor>) -> Self {
        self.security_auditor = security_auditor;
        self
    }

    /// Read handle for the canonical state
    pub fn state(&self) -> AuthStateStore {
        self.state.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Start following the provider's session stream
    #[must_use = "dropping the listener unsubscribes it"]
    pub fn start(self: &Arc<Self>) -> SessionListener {
        let mut sessions = self.provider.subscribe();
        let reconciler = Arc::clone(self);

        let task = tokio::spawn(async move {
            let initial = sessions.borrow_and_update().clone();
            reconciler.on_session_change(initial);
            while sessions.changed().await.is_ok() {
                let principal = sessions.borrow_and_update().clone();
                reconciler.on_session_change(principal);
            }
            debug!("Session stream closed");
        });

        SessionListener {
            task,
            reconciler: Arc::clone(self),
        }
    }

    fn on_session_change(self: &Arc<Self>, principal: Option<Principal>) {
        let Some(principal) = principal else {
            let generation = self.writer.advance();
            self.abort_passive();
            self.writer.clear_session(generation);
            debug!("No provider session");
            return;
        };

        if self.active_actions.load(Ordering::SeqCst) > 0 {
            debug!(uid = %principal.uid, "Session change during an active action, deferring to it");
            return;
        }
        if self.take_claim(&principal.id_token) {
            debug!(uid = %principal.uid, "Session already reconciled by an active action");
            return;
        }

        let generation = self.writer.advance();
        self.writer.begin_reconcile(generation, principal.clone());
        debug!(uid = %principal.uid, generation, "Reconciling session");

        let reconciler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            reconciler.reconcile(principal, generation).await;
        });
        if let Some(previous) = lock(&self.passive_task).replace(handle) {
            previous.abort();
        }
    }

    fn abort_passive(&self) {
        if let Some(task) = lock(&self.passive_task).take() {
            task.abort();
        }
    }

    fn claim(&self, principal: &Principal) {
        *lock(&self.claimed_token) = Some(principal.id_token.clone());
    }

    fn take_claim(&self, token: &str) -> bool {
        let mut claimed = lock(&self.claimed_token);
        if claimed.as_deref() == Some(token) {
            *claimed = None;
            true
        } else {
            false
        }
    }

    async fn reconcile(&self, principal: Principal, generation: u64) {
        match self.admit(&principal, Some(generation)).await {
            Ok(Admission::Admitted(profile)) => {
                let is_admin = profile.is_admin();
                if self
                    .writer
                    .authorize(generation, principal.clone(), profile, false)
                {
                    info!(uid = %principal.uid, is_admin, "Session reconciled");
                    self.emit(AuthEvent::SignedIn {
                        uid: principal.uid,
                        is_admin,
                    });
                }
            }
            Ok(Admission::Blocked(gate)) => self.force_sign_out(&principal, generation, gate).await,
            Ok(Admission::Superseded) => {
                debug!(uid = %principal.uid, generation, "Reconciliation superseded");
            }
            Err(e) => {
                warn!(
                    uid = %principal.uid,
                    error = %e,
                    "Profile reconciliation failed, admitting degraded session"
                );
                let profile = ProfileRecord::degraded_for(&principal, self.clock.now());
                if self
                    .writer
                    .authorize(generation, principal.clone(), profile, true)
                {
                    self.security_auditor.log_event(
                        SecurityEvent::new(
                            SecurityEventType::DegradedSession,
                            SecuritySeverity::Medium,
                            Some(principal.uid.clone()),
                        )
                        .with_detail("error", &e),
                    );
                    self.emit(AuthEvent::SignedIn {
                        uid: principal.uid,
                        is_admin: false,
                    });
                }
            }
        }
    }

    async fn force_sign_out(&self, principal: &Principal, generation: u64, gate: GateFailure) {
        let message = gate.notice();
        if !self.writer.reject(generation, message) {
            return;
        }

        warn!(uid = %principal.uid, code = %gate.code(), "Session failed gate check, signing out");
        self.rate_limiter.clear_all_rate_limits();
        self.security_auditor
            .log_forced_sign_out(&principal.uid, gate.code());
        self.emit(AuthEvent::ForcedSignOut {
            uid: principal.uid.clone(),
            code: gate.code(),
            message: message.to_string(),
            redirect_to: self.routes.login.clone(),
        });

        // last: the resulting session event aborts this task
        self.sign_out_quietly().await;
    }

    /// Load or repair the profile, sync verification flags and run the gates.
    ///
    /// `generation` is set for passive reconciliation only.
    async fn admit(
        &self,
        principal: &Principal,
        generation: Option<u64>,
    ) -> Result<Admission, AuthError> {
        let superseded = |generation: Option<u64>| {
            generation.is_some_and(|generation| !self.writer.is_current(generation))
        };

        let verified = self.provider_verification(principal).await;
        if superseded(generation) {
            return Ok(Admission::Superseded);
        }

        let stored = self.profiles.get(&principal.uid).await?;
        if superseded(generation) {
            return Ok(Admission::Superseded);
        }

        let profile = match stored {
            None => {
                let record = self.repair_profile(principal, verified).await;
                if generation.is_some() {
                    // a repaired session is admitted as-is; later reloads run the gates
                    return Ok(if superseded(generation) {
                        Admission::Superseded
                    } else {
                        Admission::Admitted(record)
                    });
                }
                record
            }
            Some(record) => {
                if let Err(gate) = check_active(&record) {
                    return Ok(Admission::Blocked(gate));
                }
                match plan_verification_sync(&record, verified) {
                    Some(update) => {
                        let merged = self.profiles.update(&principal.uid, update).await?;
                        self.log_verification_synced(&principal.uid, verified);
                        merged
                    }
                    None => record,
                }
            }
        };
        if superseded(generation) {
            return Ok(Admission::Superseded);
        }

        let session = Session::new(principal, verified);
        Ok(match evaluate_gates(&session, &profile) {
            Ok(()) => Admission::Admitted(profile),
            Err(gate) => Admission::Blocked(gate),
        })
    }

    /// Create the missing profile with verification mirrored from the provider
    async fn repair_profile(&self, principal: &Principal, verified: bool) -> ProfileRecord {
        let record = ProfileRecord::synthesized_for(principal, verified, self.clock.now());
        match self.profiles.set(record.clone()).await {
            Ok(()) => {
                info!(uid = %principal.uid, "Created missing profile");
                self.security_auditor.log_event(
                    SecurityEvent::new(
                        SecurityEventType::ProfileRepaired,
                        SecuritySeverity::Low,
                        Some(principal.uid.clone()),
                    )
                    .with_detail("email_verified", verified),
                );
            }
            Err(e) => {
                warn!(uid = %principal.uid, error = %e, "Failed to persist repaired profile");
            }
        }
        record
    }

    fn log_verification_synced(&self, uid: &str, verified: bool) {
        debug!(uid = %uid, verified, "Synced verification flags to profile");
        self.security_auditor.log_event(
            SecurityEvent::new(
                SecurityEventType::VerificationSynced,
                SecuritySeverity::Low,
                Some(uid.to_string()),
            )
            .with_detail("email_verified", verified),
        );
    }

    /// Fresh provider flag; falls back to the token value when the reload fails
    async fn provider_verification(&self, principal: &Principal) -> bool {
        match self.provider.reload_principal(principal).await {
            Ok(status) => status.email_verified,
            Err(e) => {
                warn!(
                    uid = %principal.uid,
                    error = %e,
                    "Could not refresh verification status, using token value"
                );
                principal.email_verified
            }
        }
    }

    async fn sign_out_quietly(&self) {
        if let Err(e) = self.provider.sign_out().await {
            warn!(error = %e, "Provider sign-out failed");
        }
    }

    fn emit(&self, event: AuthEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn with_timeout<T>(
        &self,
        operation: impl Future<Output = Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        let limit = self.config.action_timeout();
        tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| AuthError::Timeout(limit))?
    }

    fn ensure_allowed(&self, action: RateLimitAction, identifier: &str) -> Result<(), AuthFailure> {
        let status = self.rate_limiter.check_rate_limit(action, identifier);
        if status.allowed {
            return Ok(());
        }
        let minutes = status.minutes_remaining.unwrap_or(1);
        debug!(action = action.as_str(), minutes, "Action refused by local rate limit");
        Err(AuthFailure::from(AuthError::RateLimited { minutes }))
    }

    /// Convert an internal error at the action boundary
    fn fail(&self, action: &str, uid: Option<&str>, err: AuthError) -> AuthFailure {
        let failure = AuthFailure::from(err);
        warn!(
            action,
            uid = uid.unwrap_or("-"),
            code = %failure.code,
            retryable = failure.retryable,
            "Auth action failed"
        );
        self.security_auditor
            .log_auth_failure(uid, action, failure.code);
        failure
    }

    fn settle<T>(
        &self,
        action: RateLimitAction,
        identifier: &str,
        result: Result<T, AuthError>,
    ) -> Result<T, AuthFailure> {
        match result {
            Ok(value) => {
                self.rate_limiter.clear_rate_limit(action, identifier);
                Ok(value)
            }
            Err(err) => {
                if err.counts_as_failed_attempt() {
                    self.rate_limiter.record_failed_attempt(action, identifier);
                }
                Err(self.fail(action.as_str(), None, err))
            }
        }
    }

    /// Finish an active sign-in: resend on verification failure, tear the session down on any error
    async fn complete_sign_in(
        &self,
        principal: Principal,
        admission: Result<Admission, AuthError>,
        resend_on_unverified: bool,
    ) -> Result<LoginSuccess, AuthError> {
        let error = match admission {
            Ok(Admission::Admitted(profile)) => {
                return Ok(LoginSuccess { principal, profile });
            }
            Ok(Admission::Blocked(gate)) => {
                if resend_on_unverified && gate.is_verification() {
                    self.send_verification_best_effort(&principal).await;
                }
                AuthError::Gate(gate.code())
            }
            Ok(Admission::Superseded) => {
                AuthError::Internal("sign-in superseded by a newer session".to_string())
            }
            Err(e) => e,
        };
        self.sign_out_quietly().await;
        Err(error)
    }

    async fn send_verification_best_effort(&self, principal: &Principal) {
        let return_url = self.config.absolute_url(&self.routes.verify_email);
        match self
            .provider
            .send_verification_email(principal, &return_url)
            .await
        {
            Ok(()) => {
                self.cooldown.mark_sent(&principal.email);
                debug!(uid = %principal.uid, "Verification email sent");
            }
            Err(e) => warn!(uid = %principal.uid, error = %e, "Failed to send verification email"),
        }
    }

    /// Write the authoritative result of an active sign-in
    fn publish_sign_in(&self, action: &str, success: &LoginSuccess) {
        let generation = self.writer.advance();
        self.writer.authorize(
            generation,
            success.principal.clone(),
            success.profile.clone(),
            false,
        );
        let is_admin = success.is_admin();
        info!(uid = %success.principal.uid, is_admin, action, "User signed in");
        self.security_auditor
            .log_auth_success(&success.principal.uid, action);
        self.emit(AuthEvent::SignedIn {
            uid: success.principal.uid.clone(),
            is_admin,
        });
    }

    fn publish_failure(&self, failure: &AuthFailure) {
        let generation = self.writer.advance();
        self.writer.reject(generation, failure.message.clone());
    }

    /// Email/password sign-in
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginSuccess, AuthFailure> {
        let _active = ActiveAction::enter(&self.active_actions);
        let email = email.trim();

        let result = self.login_checked(email, password).await;
        match &result {
            Ok(success) => self.publish_sign_in("login", success),
            Err(failure) => self.publish_failure(failure),
        }
        result
    }

    async fn login_checked(&self, email: &str, password: &str) -> Result<LoginSuccess, AuthFailure> {
        if let Err(e) = self.validator.validate_login(email, password) {
            return Err(self.fail("login", None, e.into()));
        }
        self.ensure_allowed(RateLimitAction::Login, email)?;

        let result = self
            .with_timeout(async {
                let principal = self.provider.sign_in(email, password).await?;
                self.claim(&principal);
                let admission = self.admit(&principal, None).await;
                self.complete_sign_in(principal, admission, true).await
            })
            .await;

        if matches!(result, Err(AuthError::Timeout(_))) {
            self.sign_out_quietly().await;
        }

        self.settle(RateLimitAction::Login, email, result)
            .map_err(|failure| {
                if failure.code.offers_verification_resend() {
                    failure.with_email(email)
                } else {
                    failure
                }
            })
    }

    /// Federated sign-in. The profile is upserted without touching its role.
    pub async fn login_with_federated_provider(&self) -> Result<LoginSuccess, AuthFailure> {
        let _active = ActiveAction::enter(&self.active_actions);

        let result = self
            .with_timeout(async {
                let principal = self.provider.sign_in_with_federated_provider().await?;
                self.claim(&principal);
                let admission = self.upsert_federated_profile(&principal).await;
                self.complete_sign_in(principal, admission, false).await
            })
            .await;

        if matches!(result, Err(AuthError::Timeout(_))) {
            self.sign_out_quietly().await;
        }

        match result {
            Ok(success) => {
                self.publish_sign_in("federated_login", &success);
                Ok(success)
            }
            Err(err) => {
                let failure = self.fail("federated_login", None, err);
                self.publish_failure(&failure);
                Err(failure)
            }
        }
    }

    async fn upsert_federated_profile(&self, principal: &Principal) -> Result<Admission, AuthError> {
        let verified = self.provider_verification(principal).await;

        let profile = match self.profiles.get(&principal.uid).await? {
            None => {
                let record = ProfileRecord::synthesized_for(principal, verified, self.clock.now());
                self.profiles.set(record.clone()).await?;
                info!(uid = %principal.uid, provider = %principal.provider_id, "Created federated profile");
                record
            }
            Some(existing) => {
                // disabled accounts are rejected before any write
                if let Err(gate) = check_active(&existing) {
                    return Ok(Admission::Blocked(gate));
                }
                let update = plan_verification_sync(&existing, verified)
                    .unwrap_or_default()
                    .with_display_name(principal.display_name.clone());
                if update.is_empty() {
                    existing
                } else {
                    self.profiles.update(&principal.uid, update).await?
                }
            }
        };

        let session = Session::new(principal, verified);
        Ok(match evaluate_gates(&session, &profile) {
            Ok(()) => Admission::Admitted(profile),
            Err(gate) => Admission::Blocked(gate),
        })
    }

    /// Create an account, send the verification email and sign straight back out
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<RegisterSuccess, AuthFailure> {
        let _active = ActiveAction::enter(&self.active_actions);
        let email = email.trim();

        let result = self.register_checked(email, password, display_name).await;

        let generation = self.writer.advance();
        match &result {
            Ok(_) => {
                self.writer.reset(generation);
            }
            Err(failure) => {
                self.writer.reject(generation, failure.message.clone());
            }
        }
        result
    }

    async fn register_checked(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<RegisterSuccess, AuthFailure> {
        if let Err(e) = self.validator.validate_registration(email, password) {
            return Err(self.fail("register", None, e.into()));
        }
        self.ensure_allowed(RateLimitAction::Register, email)?;

        let result = self
            .with_timeout(self.create_account(email, password, display_name))
            .await;

        // a new account never stays signed in
        if result.is_err() {
            self.sign_out_quietly().await;
        }

        self.settle(RateLimitAction::Register, email, result)
    }

    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<RegisterSuccess, AuthError> {
        let principal = self.provider.sign_up(email, password).await?;
        self.claim(&principal);

        if let Some(name) = display_name {
            if let Err(e) = self.provider.update_display_name(&principal, name).await {
                warn!(uid = %principal.uid, error = %e, "Failed to set display name");
            }
        }

        let record = ProfileRecord::for_registration(
            principal.uid.clone(),
            principal.email.clone(),
            display_name.map(str::to_string),
            self.clock.now(),
        );
        if let Err(e) = self.profiles.set(record).await {
            // recreated on first sign-in
            warn!(uid = %principal.uid, error = %e, "Failed to write profile at registration");
        }

        let return_url = self.config.absolute_url(&self.routes.verify_email);
        let email_sent = match self
            .provider
            .send_verification_email(&principal, &return_url)
            .await
        {
            Ok(()) => {
                self.cooldown.mark_sent(&principal.email);
                true
            }
            Err(e) => {
                warn!(uid = %principal.uid, error = %e, "Failed to send verification email");
                false
            }
        };

        self.sign_out_quietly().await;

        info!(uid = %principal.uid, email_sent, "Account registered");
        self.security_auditor.log_event(
            SecurityEvent::new(
                SecurityEventType::RegistrationCompleted,
                SecuritySeverity::Low,
                Some(principal.uid.clone()),
            )
            .with_action("register")
            .with_detail("email_sent", email_sent),
        );

        Ok(RegisterSuccess {
            uid: principal.uid,
            email: principal.email,
            email_sent,
        })
    }

    /// Clear canonical state and sign out of the provider
    pub async fn logout(&self) -> Result<(), AuthFailure> {
        let uid = self.state.snapshot().principal.map(|principal| principal.uid);

        let generation = self.writer.advance();
        self.abort_passive();
        self.writer.reset(generation);

        let result = self
            .with_timeout(async { self.provider.sign_out().await.map_err(AuthError::from) })
            .await;

        match result {
            Ok(()) => {
                info!(uid = uid.as_deref().unwrap_or("-"), "User signed out");
                self.emit(AuthEvent::SignedOut { uid });
                Ok(())
            }
            Err(err) => Err(self.fail("logout", uid.as_deref(), err)),
        }
    }

    /// Send a password reset email that returns the user to the login page
    pub async fn send_password_reset(&self, email: &str) -> Result<(), AuthFailure> {
        let email = email.trim();
        if let Err(e) = self.validator.validate_email(email) {
            return Err(self.fail("passwordReset", None, e.into()));
        }
        self.ensure_allowed(RateLimitAction::PasswordReset, email)?;

        let return_url = self.config.absolute_url(&self.routes.login);
        let result = self
            .with_timeout(async {
                self.provider
                    .send_password_reset(email, &return_url)
                    .await
                    .map_err(AuthError::from)
            })
            .await;

        self.settle(RateLimitAction::PasswordReset, email, result)?;
        info!("Password reset email sent");
        Ok(())
    }

    /// Resend the verification email to the signed-in principal.
    ///
    /// Falls back to the current principal's address when `email` is `None`.
    /// Every send attempt counts against the resend rate limit.
    pub async fn resend_verification_email(&self, email: Option<&str>) -> Result<(), AuthFailure> {
        let current = self.provider.current_principal();
        let email = match email.map(str::trim).filter(|email| !email.is_empty()) {
            Some(email) => email.to_string(),
            None => match &current {
                Some(principal) => principal.email.clone(),
                None => {
                    return Err(AuthFailure::new(ErrorCode::MissingCredentials)
                        .with_message("Email address is required."));
                }
            },
        };

        let cooldown = self.cooldown.status(&email);
        if cooldown.on_cooldown {
            return Err(AuthFailure::new(ErrorCode::ResendCooldown)
                .with_message(format!(
                    "Please wait {} seconds before requesting another verification email.",
                    cooldown.remaining_seconds
                ))
                .with_retry_after(cooldown.remaining_seconds));
        }

        self.ensure_allowed(RateLimitAction::ResendVerification, &email)?;

        let principal = match current {
            Some(principal) if principal.email.eq_ignore_ascii_case(&email) => principal,
            _ => return Err(AuthFailure::new(ErrorCode::RequiresLogin).with_email(email)),
        };

        if self.provider_verification(&principal).await {
            return Err(AuthFailure::new(ErrorCode::AlreadyVerified));
        }

        self.rate_limiter
            .record_failed_attempt(RateLimitAction::ResendVerification, &email);

        let return_url = self.config.absolute_url(&self.routes.verify_email);
        let result = self
            .with_timeout(async {
                self.provider
                    .send_verification_email(&principal, &return_url)
                    .await
                    .map_err(AuthError::from)
            })
            .await;

        match result {
            Ok(()) => {
                self.cooldown.mark_sent(&email);
                info!(uid = %principal.uid, "Verification email resent");
                Ok(())
            }
            Err(err) => Err(self.fail("resendVerification", Some(&principal.uid), err)),
        }
    }

    /// Re-read the provider flag and mirror it into the profile
    pub async fn sync_email_verification(&self) -> Result<VerificationSync, AuthFailure> {
        let Some(principal) = self.provider.current_principal() else {
            return Err(AuthFailure::new(ErrorCode::RequiresLogin));
        };

        let result = self
            .with_timeout(async {
                let verified = self
                    .provider
                    .reload_principal(&principal)
                    .await?
                    .email_verified;
                match self.profiles.get(&principal.uid).await? {
                    None => {
                        let record = self.repair_profile(&principal, verified).await;
                        Ok((record, true))
                    }
                    Some(record) => match plan_verification_sync(&record, verified) {
                        Some(update) => {
                            let merged = self.profiles.update(&principal.uid, update).await?;
                            self.log_verification_synced(&principal.uid, verified);
                            Ok((merged, true))
                        }
                        None => Ok((record, false)),
                    },
                }
            })
            .await;

        match result {
            Ok((profile, updated)) => {
                let sync = VerificationSync {
                    email_verified: profile.email_verified,
                    is_verified: profile.is_verified,
                    updated,
                };
                let snapshot = self.state.snapshot();
                let same_principal = snapshot
                    .principal
                    .as_ref()
                    .is_some_and(|current| current.uid == principal.uid);
                if updated && same_principal {
                    self.writer
                        .refresh_profile(self.writer.generation(), profile);
                }
                Ok(sync)
            }
            Err(err) => Err(self.fail("syncVerification", Some(&principal.uid), err)),
        }
    }

    /// Current provider verification flag; `false` when unknown
    pub async fn check_email_verification(&self) -> bool {
        let Some(principal) = self.provider.current_principal() else {
            return false;
        };
        match self.provider.reload_principal(&principal).await {
            Ok(status) => status.email_verified,
            Err(e) => {
                warn!(uid = %principal.uid, error = %e, "Verification check failed");
                false
            }
        }
    }
}

/// Subscription to the provider session stream.
///
/// Dropping it stops the listener and supersedes any reconciliation in flight.
pub struct SessionListener {
    task: JoinHandle<()>,
    reconciler: Arc<SessionReconciler>,
}

impl SessionListener {
    pub fn unsubscribe(self) {
        debug!("Session listener unsubscribed");
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SessionListener {
    fn drop(&mut self) {
        self.task.abort();
        self.reconciler.writer.advance();
        self.reconciler.abort_passive();
    }
}
