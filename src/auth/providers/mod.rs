/// Identity provider boundary
///
/// The `IdentityProvider` trait covers everything the session reconciler needs
/// from an external identity service: credential and federated sign-in, sign-out,
/// verification and password-reset emails, and a session change stream.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::auth::error::ProviderError;

pub mod memory;

pub use memory::InMemoryIdentityProvider;

/// Authenticated identity as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Stable provider user id; profiles are keyed by it
    pub uid: String,

    pub email: String,

    pub display_name: Option<String>,

    /// Verified-email flag carried by the current token
    pub email_verified: bool,

    /// Opaque token identifying this sign-in
    pub id_token: String,

    /// "password" for credential sign-in, otherwise the federated provider name
    pub provider_id: String,
}

/// Fresh verification state read back from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStatus {
    pub email_verified: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account. Providers sign the new principal in on success.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Principal, ProviderError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, ProviderError>;

    /// Interactive federated sign-in (popup or redirect)
    async fn sign_in_with_federated_provider(&self) -> Result<Principal, ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    async fn update_display_name(
        &self,
        principal: &Principal,
        display_name: &str,
    ) -> Result<(), ProviderError>;

    /// Send a verification email; the link returns the user to `return_url`
    async fn send_verification_email(
        &self,
        principal: &Principal,
        return_url: &str,
    ) -> Result<(), ProviderError>;

    async fn send_password_reset(&self, email: &str, return_url: &str)
    -> Result<(), ProviderError>;

    /// Re-read the principal from the provider to pick up verification changes
    async fn reload_principal(
        &self,
        principal: &Principal,
    ) -> Result<VerificationStatus, ProviderError>;

    fn current_principal(&self) -> Option<Principal>;

    /// Session change stream. The current value is the signed-in principal, if any.
    fn subscribe(&self) -> watch::Receiver<Option<Principal>>;
}
