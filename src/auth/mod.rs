// Authentication Module
// Session integrity: provider sessions reconciled against stored profiles, gated and published

pub mod config;
pub mod error;
pub mod guards;
pub mod providers;
pub mod reconciler;
pub mod session;
pub mod state;

pub use config::AuthConfig;
pub use error::{AuthError, ProviderError};
pub use guards::{
    AuthRedirect, GuardDecision, RoutePaths, RouteRequirement, guard_route, require_admin,
    require_auth,
};
pub use providers::{IdentityProvider, InMemoryIdentityProvider, Principal, VerificationStatus};
pub use reconciler::{
    AuthEvent, LoginSuccess, RegisterSuccess, SessionListener, SessionReconciler,
    VerificationSync,
};
pub use session::{GateFailure, Session};
pub use state::{AuthStateStore, AuthStateWriter, CanonicalAuthState, SessionPhase};
