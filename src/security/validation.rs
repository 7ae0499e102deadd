use regex::Regex;
use thiserror::Error;

use crate::error::ErrorCode;

/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Email is required")]
    MissingEmail,

    #[error("Password is required")]
    MissingPassword,

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Password must be at least 8 characters")]
    PasswordTooShort,

    #[error("Password must contain an uppercase letter, a lowercase letter and a digit")]
    PasswordTooSimple,

    #[error("Password contains unsupported characters")]
    PasswordCharset,
}

impl ValidationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ValidationError::MissingEmail | ValidationError::MissingPassword => {
                ErrorCode::MissingCredentials
            }
            ValidationError::InvalidEmail => ErrorCode::InvalidEmail,
            ValidationError::PasswordTooShort
            | ValidationError::PasswordTooSimple
            | ValidationError::PasswordCharset => ErrorCode::WeakPassword,
        }
    }
}

/// Validates credentials before they reach the identity provider
#[derive(Clone)]
pub struct CredentialValidator {
    email_pattern: Regex,
    password_charset: Regex,
}

impl Default for CredentialValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialValidator {
    pub fn new() -> Self {
        let email_pattern = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")
            .expect("Valid regex pattern for email validation");
        let password_charset = Regex::new(r"^[a-zA-Z\d@$!%*?&]+$")
            .expect("Valid regex pattern for password charset");

        Self {
            email_pattern,
            password_charset,
        }
    }

    pub fn validate_email(&self, email: &str) -> Result<(), ValidationError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ValidationError::MissingEmail);
        }
        if !self.email_pattern.is_match(email) {
            return Err(ValidationError::InvalidEmail);
        }
        Ok(())
    }

    /// At least eight characters with one uppercase, one lowercase and one digit
    pub fn validate_password(&self, password: &str) -> Result<(), ValidationError> {
        if password.is_empty() {
            return Err(ValidationError::MissingPassword);
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(ValidationError::PasswordTooShort);
        }
        if !self.password_charset.is_match(password) {
            return Err(ValidationError::PasswordCharset);
        }
        let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        if !(has_lower && has_upper && has_digit) {
            return Err(ValidationError::PasswordTooSimple);
        }
        Ok(())
    }

    /// Login only needs both fields present; strength rules apply at registration
    pub fn validate_login(&self, email: &str, password: &str) -> Result<(), ValidationError> {
        if email.trim().is_empty() {
            return Err(ValidationError::MissingEmail);
        }
        if password.is_empty() {
            return Err(ValidationError::MissingPassword);
        }
        Ok(())
    }

    pub fn validate_registration(&self, email: &str, password: &str) -> Result<(), ValidationError> {
        self.validate_email(email)?;
        self.validate_password(password)
    }
}
