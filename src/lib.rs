//! Client-side authentication session integrity for a storefront.
//!
//! A principal authenticated by an external identity provider is admitted
//! only after its stored profile passes the active, email-verified and
//! business-verified gates. [`auth::SessionReconciler`] is the single writer
//! of [`auth::CanonicalAuthState`]; route guards and the role redirector only
//! read it.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod profile_store;
pub mod security;
pub mod telemetry;

pub use auth::{
    AuthEvent, AuthStateStore, CanonicalAuthState, IdentityProvider, Principal, SessionReconciler,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AuthFailure, ErrorCategory, ErrorCode};
pub use profile_store::{InMemoryProfileStore, ProfileRecord, ProfileStore, ProfileUpdate, Role};
