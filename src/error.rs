use serde::{Deserialize, Serialize};

/// Machine-readable failure codes returned by every sensitive action.
///
/// Callers branch on the code, never on the message text. The serialized
/// form is the stable string code (`auth/account-disabled`, `timeout`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Credential errors reported by the identity provider
    #[serde(rename = "auth/email-already-in-use")]
    EmailAlreadyInUse,
    #[serde(rename = "auth/invalid-email")]
    InvalidEmail,
    #[serde(rename = "auth/weak-password")]
    WeakPassword,
    #[serde(rename = "auth/user-not-found")]
    UserNotFound,
    #[serde(rename = "auth/wrong-password")]
    WrongPassword,
    #[serde(rename = "auth/user-disabled")]
    UserDisabled,
    #[serde(rename = "auth/too-many-requests")]
    TooManyRequests,
    #[serde(rename = "auth/popup-closed-by-user")]
    PopupClosed,
    #[serde(rename = "auth/credential-already-in-use")]
    CredentialAlreadyInUse,
    #[serde(rename = "auth/operation-not-allowed")]
    OperationNotAllowed,
    #[serde(rename = "auth/requires-recent-login")]
    RequiresRecentLogin,
    #[serde(rename = "auth/missing-credentials")]
    MissingCredentials,

    // Session gates
    #[serde(rename = "auth/account-disabled")]
    AccountDisabled,
    #[serde(rename = "auth/email-not-verified")]
    EmailNotVerified,
    #[serde(rename = "auth/account-not-verified")]
    AccountNotVerified,

    // Local throttles and verification remediation
    #[serde(rename = "auth/too-many-attempts")]
    TooManyAttempts,
    #[serde(rename = "auth/resend-cooldown")]
    ResendCooldown,
    #[serde(rename = "auth/already-verified")]
    AlreadyVerified,
    #[serde(rename = "auth/requires-login")]
    RequiresLogin,

    // Transport
    #[serde(rename = "network-error")]
    NetworkError,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "service-unavailable")]
    ServiceUnavailable,

    #[serde(rename = "unknown")]
    Unknown,
}

/// Broad classification used by callers to pick a UI treatment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Wrong password, unknown user, weak password, email in use
    Credential,
    /// Email or business verification missing; offer a resend affordance
    VerificationGate,
    /// Terminal for the session
    DisabledAccount,
    /// Local or provider throttling
    RateLimited,
    /// Input rejected before reaching the provider
    Validation,
    /// Retryable transport failure
    Network,
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EmailAlreadyInUse => "auth/email-already-in-use",
            ErrorCode::InvalidEmail => "auth/invalid-email",
            ErrorCode::WeakPassword => "auth/weak-password",
            ErrorCode::UserNotFound => "auth/user-not-found",
            ErrorCode::WrongPassword => "auth/wrong-password",
            ErrorCode::UserDisabled => "auth/user-disabled",
            ErrorCode::TooManyRequests => "auth/too-many-requests",
            ErrorCode::PopupClosed => "auth/popup-closed-by-user",
            ErrorCode::CredentialAlreadyInUse => "auth/credential-already-in-use",
            ErrorCode::OperationNotAllowed => "auth/operation-not-allowed",
            ErrorCode::RequiresRecentLogin => "auth/requires-recent-login",
            ErrorCode::MissingCredentials => "auth/missing-credentials",
            ErrorCode::AccountDisabled => "auth/account-disabled",
            ErrorCode::EmailNotVerified => "auth/email-not-verified",
            ErrorCode::AccountNotVerified => "auth/account-not-verified",
            ErrorCode::TooManyAttempts => "auth/too-many-attempts",
            ErrorCode::ResendCooldown => "auth/resend-cooldown",
            ErrorCode::AlreadyVerified => "auth/already-verified",
            ErrorCode::RequiresLogin => "auth/requires-login",
            ErrorCode::NetworkError => "network-error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ServiceUnavailable => "service-unavailable",
            ErrorCode::Unknown => "unknown",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::EmailAlreadyInUse
            | ErrorCode::UserNotFound
            | ErrorCode::WrongPassword
            | ErrorCode::WeakPassword
            | ErrorCode::PopupClosed
            | ErrorCode::CredentialAlreadyInUse
            | ErrorCode::OperationNotAllowed
            | ErrorCode::RequiresRecentLogin => ErrorCategory::Credential,

            ErrorCode::EmailNotVerified
            | ErrorCode::AccountNotVerified
            | ErrorCode::ResendCooldown
            | ErrorCode::AlreadyVerified
            | ErrorCode::RequiresLogin => ErrorCategory::VerificationGate,

            ErrorCode::AccountDisabled | ErrorCode::UserDisabled => ErrorCategory::DisabledAccount,

            ErrorCode::TooManyRequests | ErrorCode::TooManyAttempts => ErrorCategory::RateLimited,

            ErrorCode::InvalidEmail | ErrorCode::MissingCredentials => ErrorCategory::Validation,

            ErrorCode::NetworkError | ErrorCode::Timeout | ErrorCode::ServiceUnavailable => {
                ErrorCategory::Network
            }

            ErrorCode::Unknown => ErrorCategory::Unexpected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Network)
    }

    /// True for the two codes that should offer a resend-verification affordance.
    /// Never true for a disabled account.
    pub fn offers_verification_resend(&self) -> bool {
        matches!(
            self,
            ErrorCode::EmailNotVerified | ErrorCode::AccountNotVerified
        )
    }

    /// User-facing text. Never exposes provider internals.
    pub fn friendly_message(&self) -> &'static str {
        match self {
            ErrorCode::EmailAlreadyInUse => "This email is already registered. Please sign in.",
            ErrorCode::InvalidEmail => "Please enter a valid email address.",
            ErrorCode::WeakPassword => "Password is too weak. Please use a stronger password.",
            ErrorCode::UserNotFound => "No account found with this email.",
            ErrorCode::WrongPassword => "Incorrect password. Please try again.",
            ErrorCode::UserDisabled => "This account has been disabled. Please contact support.",
            ErrorCode::TooManyRequests => "Too many attempts. Please try again later.",
            ErrorCode::PopupClosed => "Sign-in was cancelled.",
            ErrorCode::CredentialAlreadyInUse => {
                "This credential is already associated with another account."
            }
            ErrorCode::OperationNotAllowed => {
                "This operation is not allowed. Please contact support."
            }
            ErrorCode::RequiresRecentLogin => "Please sign out and sign in again to continue.",
            ErrorCode::MissingCredentials => "Email and password are required.",
            ErrorCode::AccountDisabled => {
                "Your account has been disabled. Please contact support."
            }
            ErrorCode::EmailNotVerified => "Please verify your email to continue.",
            ErrorCode::AccountNotVerified => "Your account is not verified yet.",
            ErrorCode::TooManyAttempts => "Too many failed attempts. Please try again later.",
            ErrorCode::ResendCooldown => {
                "Please wait before requesting another verification email."
            }
            ErrorCode::AlreadyVerified => "Email is already verified.",
            ErrorCode::RequiresLogin => {
                "Please try logging in again. A verification email will be sent automatically."
            }
            ErrorCode::NetworkError => {
                "Network error. Please check your internet connection and try again."
            }
            ErrorCode::Timeout => "Request timed out. Please try again.",
            ErrorCode::ServiceUnavailable => {
                "Service temporarily unavailable. Please try again in a moment."
            }
            ErrorCode::Unknown => "An unexpected error occurred. Please try again.",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure returned by the auth actions instead of an exception
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct AuthFailure {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    /// Echoed back for verification failures so the caller can offer a resend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Seconds until the action may be retried (lockouts and cooldowns)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<i64>,
}

impl AuthFailure {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.friendly_message().to_string(),
            retryable: code.is_retryable(),
            email: None,
            retry_after_secs: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_retry_after(mut self, seconds: i64) -> Self {
        self.retry_after_secs = Some(seconds.max(0));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl From<ErrorCode> for AuthFailure {
    fn from(code: ErrorCode) -> Self {
        AuthFailure::new(code)
    }
}
