//! Route guards and the role-based redirector.
//!
//! Guards only read `CanonicalAuthState`; they never decide while a
//! reconciliation is in flight. This is navigation UX; real access control
//! belongs to the backend.

use serde::{Deserialize, Serialize};

use super::state::CanonicalAuthState;
use crate::config::ConfigError;

/// Application paths the session layer navigates to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePaths {
    #[serde(default = "default_home")]
    pub home: String,
    #[serde(default = "default_login")]
    pub login: String,
    /// Every path at or below this prefix requires the admin role
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,
    #[serde(default = "default_admin_dashboard")]
    pub admin_dashboard: String,
    /// Return target for verification email links
    #[serde(default = "default_verify_email")]
    pub verify_email: String,
}

fn default_home() -> String {
    "/".to_string()
}

fn default_login() -> String {
    "/login".to_string()
}

fn default_admin_prefix() -> String {
    "/admin".to_string()
}

fn default_admin_dashboard() -> String {
    "/admin/dashboard".to_string()
}

fn default_verify_email() -> String {
    "/verify-email".to_string()
}

impl Default for RoutePaths {
    fn default() -> Self {
        Self {
            home: default_home(),
            login: default_login(),
            admin_prefix: default_admin_prefix(),
            admin_dashboard: default_admin_dashboard(),
            verify_email: default_verify_email(),
        }
    }
}

impl RoutePaths {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let paths = [
            ("routes.home", &self.home),
            ("routes.login", &self.login),
            ("routes.admin_prefix", &self.admin_prefix),
            ("routes.admin_dashboard", &self.admin_dashboard),
            ("routes.verify_email", &self.verify_email),
        ];
        for (key, path) in paths {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: format!("'{}' must be an absolute path", path),
                });
            }
        }
        Ok(())
    }

    /// Segment-aware prefix match: `/admin` and `/admin/x` match, `/administrator` does not
    pub fn is_admin_path(&self, path: &str) -> bool {
        let prefix = self.admin_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
            None => false,
        }
    }
}

/// What a route requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteRequirement {
    Public,
    Authenticated,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Reconciliation in flight; render nothing and decide later
    Loading,
    Allow,
    /// Navigate to this path, replacing the current history entry
    Redirect(String),
}

pub fn guard_route(
    state: &CanonicalAuthState,
    requirement: RouteRequirement,
    routes: &RoutePaths,
) -> GuardDecision {
    if requirement == RouteRequirement::Public {
        return GuardDecision::Allow;
    }
    if state.loading {
        return GuardDecision::Loading;
    }
    if !state.is_authenticated {
        return GuardDecision::Redirect(routes.login.clone());
    }
    if requirement == RouteRequirement::Admin && !state.is_admin() {
        return GuardDecision::Redirect(routes.home.clone());
    }
    GuardDecision::Allow
}

/// `Err(redirect_to)` unless the session is authenticated
pub fn require_auth(state: &CanonicalAuthState, redirect_to: &str) -> Result<(), String> {
    if state.is_authenticated {
        Ok(())
    } else {
        Err(redirect_to.to_string())
    }
}

/// `Err(redirect_to)` unless the session is authenticated with the admin role
pub fn require_admin(state: &CanonicalAuthState, redirect_to: &str) -> Result<(), String> {
    require_auth(state, redirect_to)?;
    if state.is_admin() {
        Ok(())
    } else {
        Err(redirect_to.to_string())
    }
}

/// Role-based redirector.
///
/// Admins landing on the home page go to the dashboard; non-admins on an
/// admin path go home. At most one redirect fires per settled transition;
/// the latch resets whenever `is_authenticated` or `loading` changes.
#[derive(Debug, Clone)]
pub struct AuthRedirect {
    routes: RoutePaths,
    latched: bool,
    observed: Option<(bool, bool)>,
}

impl AuthRedirect {
    pub fn new(routes: RoutePaths) -> Self {
        Self {
            routes,
            latched: false,
            observed: None,
        }
    }

    /// Evaluate one navigation; returns the redirect target if one should fire
    pub fn evaluate(&mut self, state: &CanonicalAuthState, path: &str) -> Option<String> {
        let key = (state.is_authenticated, state.loading);
        if self.observed != Some(key) {
            self.observed = Some(key);
            self.latched = false;
        }

        if state.loading || !state.is_authenticated || self.latched {
            return None;
        }

        let target = if state.is_admin() {
            (path == self.routes.home).then(|| self.routes.admin_dashboard.clone())
        } else {
            self.routes
                .is_admin_path(path)
                .then(|| self.routes.home.clone())
        };

        if target.is_some() {
            self.latched = true;
        }
        target
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::providers::Principal;
    use crate::profile_store::{ProfileRecord, Role};
    use chrono::Utc;

    fn authorized(role: Role) -> CanonicalAuthState {
        let mut profile = ProfileRecord::for_registration("u1", "u1@x.com", None, Utc::now());
        profile.role = role;
        profile.email_verified = true;
        profile.is_verified = true;
        CanonicalAuthState {
            principal: Some(Principal {
                uid: "u1".to_string(),
                email: "u1@x.com".to_string(),
                display_name: None,
                email_verified: true,
                id_token: "t".to_string(),
                provider_id: "password".to_string(),
            }),
            profile: Some(profile),
            is_authenticated: true,
            email_verified: true,
            is_verified: true,
            is_active: true,
            loading: false,
            degraded: false,
            error: None,
        }
    }

    #[test]
    fn test_guard_waits_while_loading() {
        let routes = RoutePaths::default();
        let state = CanonicalAuthState::initial();
        assert_eq!(
            guard_route(&state, RouteRequirement::Authenticated, &routes),
            GuardDecision::Loading
        );
        assert_eq!(
            guard_route(&state, RouteRequirement::Public, &routes),
            GuardDecision::Allow
        );
    }

    #[test]
    fn test_guard_redirects() {
        let routes = RoutePaths::default();
        let signed_out = CanonicalAuthState::signed_out();
        assert_eq!(
            guard_route(&signed_out, RouteRequirement::Authenticated, &routes),
            GuardDecision::Redirect("/login".to_string())
        );

        let user = authorized(Role::User);
        assert_eq!(
            guard_route(&user, RouteRequirement::Admin, &routes),
            GuardDecision::Redirect("/".to_string())
        );
        assert_eq!(
            guard_route(&user, RouteRequirement::Authenticated, &routes),
            GuardDecision::Allow
        );
        assert_eq!(
            guard_route(&authorized(Role::Admin), RouteRequirement::Admin, &routes),
            GuardDecision::Allow
        );
    }

    #[test]
    fn test_require_helpers() {
        let user = authorized(Role::User);
        assert!(require_auth(&user, "/login").is_ok());
        assert_eq!(require_admin(&user, "/"), Err("/".to_string()));
        assert!(require_admin(&authorized(Role::Admin), "/").is_ok());
        assert_eq!(
            require_auth(&CanonicalAuthState::signed_out(), "/login"),
            Err("/login".to_string())
        );
    }

    #[test]
    fn test_admin_prefix_is_segment_aware() {
        let routes = RoutePaths::default();
        assert!(routes.is_admin_path("/admin"));
        assert!(routes.is_admin_path("/admin/users"));
        assert!(!routes.is_admin_path("/administrator"));
        assert!(!routes.is_admin_path("/shop/admin"));
    }

    #[test]
    fn test_redirector_fires_once_per_transition() {
        let mut redirect = AuthRedirect::new(RoutePaths::default());
        let admin = authorized(Role::Admin);

        assert_eq!(
            redirect.evaluate(&admin, "/"),
            Some("/admin/dashboard".to_string())
        );
        assert!(redirect.is_latched());
        // same settled state, user navigates home again
        assert_eq!(redirect.evaluate(&admin, "/"), None);

        // sign out and back in resets the latch
        redirect.evaluate(&CanonicalAuthState::signed_out(), "/login");
        assert_eq!(
            redirect.evaluate(&admin, "/"),
            Some("/admin/dashboard".to_string())
        );
    }

    #[test]
    fn test_redirector_sends_users_home() {
        let mut redirect = AuthRedirect::new(RoutePaths::default());
        let user = authorized(Role::User);
        assert_eq!(redirect.evaluate(&user, "/products"), None);
        assert_eq!(
            redirect.evaluate(&user, "/admin/orders"),
            Some("/".to_string())
        );
    }

    #[test]
    fn test_redirector_ignores_loading() {
        let mut redirect = AuthRedirect::new(RoutePaths::default());
        let mut state = authorized(Role::Admin);
        state.loading = true;
        assert_eq!(redirect.evaluate(&state, "/"), None);
        assert!(!redirect.is_latched());
    }
}
