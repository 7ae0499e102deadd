//! Route guards driven by real reconciler state

mod common;

use common::{Harness, PASSWORD};
use storefront_auth::auth::{
    AuthRedirect, GuardDecision, RoutePaths, RouteRequirement, SessionPhase, guard_route,
    require_admin, require_auth,
};
use storefront_auth::{Config, Role};
use tokio_test::assert_ok;

#[tokio::test]
async fn test_guards_wait_for_initial_reconciliation() {
    let mut harness = Harness::new();
    let routes = RoutePaths::default();

    let state = harness.state();
    assert_eq!(state.phase(), SessionPhase::SignedOut);
    assert_eq!(
        guard_route(&state, RouteRequirement::Authenticated, &routes),
        GuardDecision::Loading
    );

    harness.start();
    let state = harness.settle().await;
    assert_eq!(
        guard_route(&state, RouteRequirement::Authenticated, &routes),
        GuardDecision::Redirect("/login".to_string())
    );
    assert_eq!(
        guard_route(&state, RouteRequirement::Public, &routes),
        GuardDecision::Allow
    );
}

#[tokio::test]
async fn test_admin_routes_by_role() {
    let mut harness = Harness::new();
    harness.start();
    harness.seed_user("user@shop.com", true, Role::User);
    harness.seed_user("admin@shop.com", true, Role::Admin);
    let routes = RoutePaths::default();

    harness
        .reconciler
        .login("user@shop.com", PASSWORD)
        .await
        .unwrap();
    let state = harness.settle().await;
    assert_eq!(
        guard_route(&state, RouteRequirement::Admin, &routes),
        GuardDecision::Redirect("/".to_string())
    );
    assert_eq!(require_admin(&state, "/"), Err("/".to_string()));
    assert_ok!(require_auth(&state, "/login"));

    harness.reconciler.logout().await.unwrap();
    harness
        .reconciler
        .login("admin@shop.com", PASSWORD)
        .await
        .unwrap();
    let state = harness.settle().await;
    assert_eq!(state.phase(), SessionPhase::Authorized);
    assert_eq!(
        guard_route(&state, RouteRequirement::Admin, &routes),
        GuardDecision::Allow
    );
    assert_ok!(require_admin(&state, "/"));
}

#[tokio::test]
async fn test_redirector_follows_session_transitions() {
    let mut harness = Harness::new();
    harness.start();
    harness.seed_user("user@shop.com", true, Role::User);
    harness.seed_user("admin@shop.com", true, Role::Admin);
    let mut redirect = AuthRedirect::new(RoutePaths::default());

    let state = harness.settle().await;
    assert_eq!(redirect.evaluate(&state, "/admin"), None);

    harness
        .reconciler
        .login("user@shop.com", PASSWORD)
        .await
        .unwrap();
    let state = harness.settle().await;
    assert_eq!(
        redirect.evaluate(&state, "/admin/products"),
        Some("/".to_string())
    );
    assert_eq!(redirect.evaluate(&state, "/admin/products"), None);

    harness.reconciler.logout().await.unwrap();
    let state = harness.settle().await;
    assert_eq!(redirect.evaluate(&state, "/"), None);

    harness
        .reconciler
        .login("admin@shop.com", PASSWORD)
        .await
        .unwrap();
    let state = harness.settle().await;
    assert_eq!(
        redirect.evaluate(&state, "/"),
        Some("/admin/dashboard".to_string())
    );
    assert_eq!(redirect.evaluate(&state, "/admin/dashboard"), None);
}

#[tokio::test]
async fn test_custom_route_paths() {
    let mut config = Config::default();
    config.routes.login = "/account/sign-in".to_string();
    config.routes.admin_dashboard = "/admin/overview".to_string();
    let mut harness = Harness::with_config(config.clone());
    harness.start();
    harness.seed_user("admin@shop.com", true, Role::Admin);

    let state = harness.settle().await;
    assert_eq!(
        guard_route(&state, RouteRequirement::Authenticated, &config.routes),
        GuardDecision::Redirect("/account/sign-in".to_string())
    );

    harness
        .reconciler
        .login("admin@shop.com", PASSWORD)
        .await
        .unwrap();
    let state = harness.settle().await;
    let mut redirect = AuthRedirect::new(config.routes.clone());
    assert_eq!(
        redirect.evaluate(&state, "/"),
        Some("/admin/overview".to_string())
    );
}
