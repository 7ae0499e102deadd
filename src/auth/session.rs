//! Session gates and verification sync planning.
//!
//! A principal that authenticated with the identity provider is only admitted
//! once its profile passes three gates, checked in order: the account is
//! active, the email is verified, the account is business-verified.

use serde::{Deserialize, Serialize};

use super::providers::Principal;
use crate::error::ErrorCode;
use crate::profile_store::{ProfileRecord, ProfileUpdate};

/// Provider-side view of one sign-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity_token: String,
    pub provider_email_verified: bool,
}

impl Session {
    pub fn new(principal: &Principal, provider_email_verified: bool) -> Self {
        Self {
            identity_token: principal.id_token.clone(),
            provider_email_verified,
        }
    }
}

/// Which gate rejected a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateFailure {
    Disabled,
    EmailNotVerified,
    AccountNotVerified,
}

impl GateFailure {
    pub fn code(&self) -> ErrorCode {
        match self {
            GateFailure::Disabled => ErrorCode::AccountDisabled,
            GateFailure::EmailNotVerified => ErrorCode::EmailNotVerified,
            GateFailure::AccountNotVerified => ErrorCode::AccountNotVerified,
        }
    }

    /// Notice shown after a passive sign-out. Both verification gates share one message.
    pub fn notice(&self) -> &'static str {
        match self {
            GateFailure::Disabled => ErrorCode::AccountDisabled.friendly_message(),
            GateFailure::EmailNotVerified | GateFailure::AccountNotVerified => {
                ErrorCode::EmailNotVerified.friendly_message()
            }
        }
    }

    pub fn is_verification(&self) -> bool {
        !matches!(self, GateFailure::Disabled)
    }
}

/// Only the active flag; used before any write so disabled accounts are never touched
pub fn check_active(profile: &ProfileRecord) -> Result<(), GateFailure> {
    if profile.is_active {
        Ok(())
    } else {
        Err(GateFailure::Disabled)
    }
}

/// Run all gates against the post-sync profile
pub fn evaluate_gates(session: &Session, profile: &ProfileRecord) -> Result<(), GateFailure> {
    check_active(profile)?;
    if !session.provider_email_verified || !profile.email_verified {
        return Err(GateFailure::EmailNotVerified);
    }
    if !profile.is_verified {
        return Err(GateFailure::AccountNotVerified);
    }
    Ok(())
}

/// Decide whether the stored verification flags must follow the provider.
///
/// A write is planned when `emailVerified` differs from the provider, or the
/// provider reports verified while `isVerified` still lags. Returns `None`
/// when the profile is already in sync, which keeps the sync idempotent.
pub fn plan_verification_sync(
    stored: &ProfileRecord,
    provider_email_verified: bool,
) -> Option<ProfileUpdate> {
    let email_differs = stored.email_verified != provider_email_verified;
    let business_lags = provider_email_verified && !stored.is_verified;

    if email_differs || business_lags {
        Some(ProfileUpdate::verification(provider_email_verified))
    } else {
        None
    }
}
