// Authentication Error Types
// Provider failure kinds and the internal error type of the session reconciler

use std::time::Duration;
use thiserror::Error;

use crate::error::{AuthFailure, ErrorCode};
use crate::profile_store::ProfileStoreError;
use crate::security::ValidationError;

/// Failures reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    // sign-up
    #[error("Email already in use")]
    EmailAlreadyInUse,

    #[error("Password is too weak")]
    WeakPassword,

    #[error("Invalid email")]
    InvalidEmail,

    // sign-in
    #[error("User not found")]
    UserNotFound,

    #[error("Wrong password")]
    WrongPassword,

    #[error("Too many requests")]
    TooManyRequests,

    #[error("User disabled")]
    UserDisabled,

    // federated sign-in
    #[error("Sign-in popup closed by user")]
    PopupClosed,

    #[error("Credential already in use")]
    CredentialAlreadyInUse,

    #[error("Operation not allowed")]
    OperationNotAllowed,

    #[error("Requires recent login")]
    RequiresRecentLogin,

    #[error("Network request failed: {0}")]
    NetworkError(String),

    #[error("Identity provider error: {0}")]
    Internal(String),
}

impl ProviderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProviderError::EmailAlreadyInUse => ErrorCode::EmailAlreadyInUse,
            ProviderError::WeakPassword => ErrorCode::WeakPassword,
            ProviderError::InvalidEmail => ErrorCode::InvalidEmail,
            ProviderError::UserNotFound => ErrorCode::UserNotFound,
            ProviderError::WrongPassword => ErrorCode::WrongPassword,
            ProviderError::TooManyRequests => ErrorCode::TooManyRequests,
            ProviderError::UserDisabled => ErrorCode::UserDisabled,
            ProviderError::PopupClosed => ErrorCode::PopupClosed,
            ProviderError::CredentialAlreadyInUse => ErrorCode::CredentialAlreadyInUse,
            ProviderError::OperationNotAllowed => ErrorCode::OperationNotAllowed,
            ProviderError::RequiresRecentLogin => ErrorCode::RequiresRecentLogin,
            ProviderError::NetworkError(_) => ErrorCode::NetworkError,
            ProviderError::Internal(_) => ErrorCode::Unknown,
        }
    }
}

/// Internal error of the reconciler; converted to `AuthFailure` at the action boundary
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Identity provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Profile store error: {0}")]
    ProfileStore(#[from] ProfileStoreError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// A session gate (active, email verified, business verified) failed
    #[error("Session gate failed: {0}")]
    Gate(ErrorCode),

    #[error("Rate limit exceeded, {minutes} minute(s) remaining")]
    RateLimited { minutes: i64 },

    #[error("Internal authentication error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::Provider(e) => e.code(),
            AuthError::ProfileStore(ProfileStoreError::Unavailable(_)) => {
                ErrorCode::ServiceUnavailable
            }
            AuthError::ProfileStore(_) => ErrorCode::Unknown,
            AuthError::Validation(e) => e.code(),
            AuthError::Timeout(_) => ErrorCode::Timeout,
            AuthError::Gate(code) => *code,
            AuthError::RateLimited { .. } => ErrorCode::TooManyAttempts,
            AuthError::Internal(_) => ErrorCode::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Whether a failure of this kind counts against the local rate limit.
    /// Gate outcomes are not credential guesses and never count.
    pub fn counts_as_failed_attempt(&self) -> bool {
        !matches!(
            self.code(),
            ErrorCode::EmailNotVerified
                | ErrorCode::AccountNotVerified
                | ErrorCode::AccountDisabled
                | ErrorCode::MissingCredentials
                | ErrorCode::TooManyAttempts
        )
    }
}

impl From<AuthError> for AuthFailure {
    fn from(err: AuthError) -> Self {
        let failure = AuthFailure::new(err.code());
        match err {
            AuthError::RateLimited { minutes } => failure
                .with_message(format!(
                    "Too many failed attempts. Please try again in {} minute(s).",
                    minutes
                ))
                .with_retry_after(minutes * 60),
            _ => failure,
        }
    }
}
