pub mod audit;
pub mod cooldown;
pub mod rate_limit_store;
pub mod rate_limiting;
pub mod validation;

pub use audit::{SecurityAuditor, SecurityEvent, SecurityEventType, SecuritySeverity};
pub use cooldown::{CooldownStatus, ResendCooldown};
pub use rate_limit_store::{
    FileRateLimitStore, InMemoryRateLimitStore, RateLimitRecord, RateLimitStore,
    RateLimitStoreError,
};
pub use rate_limiting::{
    MAX_POLICY_SECS, RateLimitAction, RateLimitConfig, RateLimitKey, RateLimitPolicy,
    RateLimitStatus, RateLimiter,
};
pub use validation::{CredentialValidator, ValidationError};
