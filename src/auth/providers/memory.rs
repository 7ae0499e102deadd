// In-memory identity provider
// Deterministic provider used by tests and local development

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::{IdentityProvider, Principal, VerificationStatus};
use crate::auth::error::ProviderError;

const MIN_PROVIDER_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    email: String,
    password_hash: Option<String>,
    display_name: Option<String>,
    email_verified: bool,
    disabled: bool,
    provider_id: String,
}

/// A sent email as recorded by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub email: String,
    pub return_url: String,
}

#[derive(Debug, Clone)]
enum FederatedOutcome {
    Account { email: String, email_verified: bool },
    Fail(ProviderError),
}

/// Identity provider backed by process memory
pub struct InMemoryIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
    session: watch::Sender<Option<Principal>>,
    federated: Mutex<Option<FederatedOutcome>>,
    verification_emails: Mutex<Vec<SentEmail>>,
    password_resets: Mutex<Vec<SentEmail>>,
    offline: AtomicBool,
    fail_verification_emails: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn hash_password(uid: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(uid.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn account_key(email: &str) -> String {
    email.trim().to_lowercase()
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        let (session, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            session,
            federated: Mutex::new(None),
            verification_emails: Mutex::new(Vec::new()),
            password_resets: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            fail_verification_emails: AtomicBool::new(false),
            latency: Mutex::new(None),
        }
    }

    /// Create a credential account without signing it in; returns its uid
    pub fn create_account(&self, email: &str, password: &str, email_verified: bool) -> String {
        let uid = uuid::Uuid::new_v4().to_string();
        let account = Account {
            uid: uid.clone(),
            email: email.trim().to_string(),
            password_hash: Some(hash_password(&uid, password)),
            display_name: None,
            email_verified,
            disabled: false,
            provider_id: "password".to_string(),
        };
        lock(&self.accounts).insert(account_key(email), account);
        uid
    }

    pub fn uid_for(&self, email: &str) -> Option<String> {
        lock(&self.accounts)
            .get(&account_key(email))
            .map(|account| account.uid.clone())
    }

    /// Flip the provider-side verified flag, as clicking the email link would
    pub fn set_email_verified(&self, email: &str, verified: bool) {
        if let Some(account) = lock(&self.accounts).get_mut(&account_key(email)) {
            account.email_verified = verified;
        }
    }

    pub fn disable_account(&self, email: &str) {
        if let Some(account) = lock(&self.accounts).get_mut(&account_key(email)) {
            account.disabled = true;
        }
    }

    /// The next federated sign-in resolves to this account, creating it if needed
    pub fn set_federated_account(&self, email: &str, email_verified: bool) {
        *lock(&self.federated) = Some(FederatedOutcome::Account {
            email: email.to_string(),
            email_verified,
        });
    }

    /// The next federated sign-in fails with `error`
    pub fn fail_federated_sign_in(&self, error: ProviderError) {
        *lock(&self.federated) = Some(FederatedOutcome::Fail(error));
    }

    /// Simulate a page load that finds a persisted session for `email`
    pub fn restore_session(&self, email: &str) -> Option<Principal> {
        let principal = lock(&self.accounts)
            .get(&account_key(email))
            .map(Self::principal_for)?;
        self.session.send_replace(Some(principal.clone()));
        Some(principal)
    }

    /// Make every remote call fail with a network error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_verification_email_failure(&self, fail: bool) {
        self.fail_verification_emails.store(fail, Ordering::SeqCst);
    }

    /// Delay every remote call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    pub fn verification_emails(&self) -> Vec<SentEmail> {
        lock(&self.verification_emails).clone()
    }

    pub fn password_resets(&self) -> Vec<SentEmail> {
        lock(&self.password_resets).clone()
    }

    pub fn has_session(&self) -> bool {
        self.session.borrow().is_some()
    }

    fn principal_for(account: &Account) -> Principal {
        Principal {
            uid: account.uid.clone(),
            email: account.email.clone(),
            display_name: account.display_name.clone(),
            email_verified: account.email_verified,
            id_token: uuid::Uuid::new_v4().to_string(),
            provider_id: account.provider_id.clone(),
        }
    }

    async fn remote_call(&self) -> Result<(), ProviderError> {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProviderError::NetworkError(
                "identity provider unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn start_session(&self, principal: &Principal) {
        debug!(uid = %principal.uid, provider = %principal.provider_id, "Provider session started");
        self.session.send_replace(Some(principal.clone()));
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Principal, ProviderError> {
        self.remote_call().await?;
        if !email.contains('@') {
            return Err(ProviderError::InvalidEmail);
        }
        if password.chars().count() < MIN_PROVIDER_PASSWORD_LENGTH {
            return Err(ProviderError::WeakPassword);
        }
        if lock(&self.accounts).contains_key(&account_key(email)) {
            return Err(ProviderError::EmailAlreadyInUse);
        }

        let uid = self.create_account(email, password, false);
        let principal = {
            let accounts = lock(&self.accounts);
            let account = accounts
                .get(&account_key(email))
                .ok_or_else(|| ProviderError::Internal(format!("account {} vanished", uid)))?;
            Self::principal_for(account)
        };
        self.start_session(&principal);
        Ok(principal)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, ProviderError> {
        self.remote_call().await?;
        let principal = {
            let accounts = lock(&self.accounts);
            let account = accounts
                .get(&account_key(email))
                .ok_or(ProviderError::UserNotFound)?;
            if account.disabled {
                return Err(ProviderError::UserDisabled);
            }
            match &account.password_hash {
                Some(hash) if *hash == hash_password(&account.uid, password) => {}
                _ => return Err(ProviderError::WrongPassword),
            }
            Self::principal_for(account)
        };
        self.start_session(&principal);
        Ok(principal)
    }

    async fn sign_in_with_federated_provider(&self) -> Result<Principal, ProviderError> {
        self.remote_call().await?;
        let outcome = lock(&self.federated)
            .take()
            .ok_or(ProviderError::PopupClosed)?;

        let principal = match outcome {
            FederatedOutcome::Fail(error) => return Err(error),
            FederatedOutcome::Account {
                email,
                email_verified,
            } => {
                let mut accounts = lock(&self.accounts);
                let account = accounts.entry(account_key(&email)).or_insert_with(|| Account {
                    uid: uuid::Uuid::new_v4().to_string(),
                    email: email.clone(),
                    password_hash: None,
                    display_name: email.split('@').next().map(str::to_string),
                    email_verified,
                    disabled: false,
                    provider_id: "google".to_string(),
                });
                if account.disabled {
                    return Err(ProviderError::UserDisabled);
                }
                account.email_verified = account.email_verified || email_verified;
                let mut principal = Self::principal_for(account);
                principal.provider_id = "google".to_string();
                principal
            }
        };
        self.start_session(&principal);
        Ok(principal)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.session.send_if_modified(|current| {
            if current.is_some() {
                *current = None;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    async fn update_display_name(
        &self,
        principal: &Principal,
        display_name: &str,
    ) -> Result<(), ProviderError> {
        self.remote_call().await?;
        let mut accounts = lock(&self.accounts);
        let account = accounts
            .values_mut()
            .find(|account| account.uid == principal.uid)
            .ok_or(ProviderError::UserNotFound)?;
        account.display_name = Some(display_name.to_string());
        Ok(())
    }

    async fn send_verification_email(
        &self,
        principal: &Principal,
        return_url: &str,
    ) -> Result<(), ProviderError> {
        self.remote_call().await?;
        if self.fail_verification_emails.load(Ordering::SeqCst) {
            return Err(ProviderError::Internal(
                "verification email delivery failed".to_string(),
            ));
        }
        lock(&self.verification_emails).push(SentEmail {
            email: principal.email.clone(),
            return_url: return_url.to_string(),
        });
        Ok(())
    }

    async fn send_password_reset(
        &self,
        email: &str,
        return_url: &str,
    ) -> Result<(), ProviderError> {
        self.remote_call().await?;
        if !lock(&self.accounts).contains_key(&account_key(email)) {
            return Err(ProviderError::UserNotFound);
        }
        lock(&self.password_resets).push(SentEmail {
            email: email.trim().to_string(),
            return_url: return_url.to_string(),
        });
        Ok(())
    }

    async fn reload_principal(
        &self,
        principal: &Principal,
    ) -> Result<VerificationStatus, ProviderError> {
        self.remote_call().await?;
        lock(&self.accounts)
            .values()
            .find(|account| account.uid == principal.uid)
            .map(|account| VerificationStatus {
                email_verified: account.email_verified,
            })
            .ok_or(ProviderError::UserNotFound)
    }

    fn current_principal(&self) -> Option<Principal> {
        self.session.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Principal>> {
        self.session.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_flow() {
        let provider = InMemoryIdentityProvider::new();
        provider.create_account("user@example.com", "Secret123", true);

        assert_eq!(
            provider.sign_in("user@example.com", "nope").await,
            Err(ProviderError::WrongPassword)
        );
        assert_eq!(
            provider.sign_in("ghost@example.com", "Secret123").await,
            Err(ProviderError::UserNotFound)
        );
        assert!(!provider.has_session());

        let principal = provider
            .sign_in("User@Example.com", "Secret123")
            .await
            .unwrap();
        assert!(principal.email_verified);
        assert_eq!(provider.current_principal(), Some(principal));

        provider.sign_out().await.unwrap();
        assert!(!provider.has_session());
    }

    #[tokio::test]
    async fn test_sign_up_starts_session() {
        let provider = InMemoryIdentityProvider::new();
        let mut rx = provider.subscribe();

        let principal = provider.sign_up("new@x.com", "Secret123").await.unwrap();
        assert!(!principal.email_verified);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref(), Some(&principal));

        assert_eq!(
            provider.sign_up("new@x.com", "Secret123").await,
            Err(ProviderError::EmailAlreadyInUse)
        );
    }

    #[tokio::test]
    async fn test_reload_sees_verification() {
        let provider = InMemoryIdentityProvider::new();
        provider.create_account("v@x.com", "Secret123", false);
        let principal = provider.sign_in("v@x.com", "Secret123").await.unwrap();

        provider.set_email_verified("v@x.com", true);
        let status = provider.reload_principal(&principal).await.unwrap();
        assert!(status.email_verified);
    }

    #[tokio::test]
    async fn test_disabled_and_offline() {
        let provider = InMemoryIdentityProvider::new();
        provider.create_account("d@x.com", "Secret123", true);
        provider.disable_account("d@x.com");
        assert_eq!(
            provider.sign_in("d@x.com", "Secret123").await,
            Err(ProviderError::UserDisabled)
        );

        provider.set_offline(true);
        assert!(matches!(
            provider.sign_in("d@x.com", "Secret123").await,
            Err(ProviderError::NetworkError(_))
        ));
    }

    #[tokio::test]
    async fn test_federated_sign_in() {
        let provider = InMemoryIdentityProvider::new();
        assert_eq!(
            provider.sign_in_with_federated_provider().await,
            Err(ProviderError::PopupClosed)
        );

        provider.set_federated_account("g@x.com", true);
        let principal = provider.sign_in_with_federated_provider().await.unwrap();
        assert_eq!(principal.provider_id, "google");
        assert!(principal.email_verified);
        assert_eq!(provider.uid_for("g@x.com"), Some(principal.uid));
    }

    #[tokio::test]
    async fn test_sign_out_without_session_does_not_notify() {
        let provider = InMemoryIdentityProvider::new();
        let rx = provider.subscribe();
        provider.sign_out().await.unwrap();
        assert!(!rx.has_changed().unwrap());
    }
}
