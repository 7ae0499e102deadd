//! Local rate limiting through the auth actions
//!
//! - Lockout after repeated credential failures
//! - Lockout expiry
//! - Gate failures never count
//! - Success clears the counter
//! - File-backed records survive a restart

mod common;

use chrono::Duration;
use common::{Harness, PASSWORD};
use std::sync::Arc;
use storefront_auth::security::{
    FileRateLimitStore, RateLimitAction, RateLimitConfig, RateLimitPolicy, RateLimiter,
};
use storefront_auth::{Config, ErrorCode, ManualClock, Role};
use tokio_test::assert_ok;

#[tokio::test]
async fn test_lockout_after_five_failures() {
    let harness = Harness::new();
    harness.seed_user("victim@shop.com", true, Role::User);

    for _ in 0..5 {
        let failure = harness
            .reconciler
            .login("victim@shop.com", "wrong-password")
            .await
            .unwrap_err();
        assert_eq!(failure.code, ErrorCode::WrongPassword);
    }

    // even the right password is refused while locked
    let failure = harness
        .reconciler
        .login("victim@shop.com", PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(failure.code, ErrorCode::TooManyAttempts);
    assert!(failure.message.contains("30 minute(s)"));
    assert_eq!(failure.retry_after_secs, Some(30 * 60));
    assert!(!harness.provider.has_session());

    // identifiers are normalised
    let failure = harness
        .reconciler
        .login("  VICTIM@shop.com ", PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(failure.code, ErrorCode::TooManyAttempts);
}

#[tokio::test]
async fn test_lockout_expires() {
    let harness = Harness::new();
    harness.seed_user("patient@shop.com", true, Role::User);

    for _ in 0..5 {
        let _ = harness
            .reconciler
            .login("patient@shop.com", "wrong-password")
            .await;
    }
    let failure = harness
        .reconciler
        .login("patient@shop.com", PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(failure.code, ErrorCode::TooManyAttempts);

    harness.clock.advance(Duration::minutes(20));
    let failure = harness
        .reconciler
        .login("patient@shop.com", PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(failure.code, ErrorCode::TooManyAttempts);
    assert_eq!(failure.retry_after_secs, Some(10 * 60));

    harness.clock.advance(Duration::minutes(11));
    harness
        .reconciler
        .login("patient@shop.com", PASSWORD)
        .await
        .unwrap();
    assert!(harness.rate_store.is_empty());
}

#[tokio::test]
async fn test_gate_failures_do_not_count() {
    let harness = Harness::new();
    harness.seed_user("unverified@shop.com", false, Role::User);

    for _ in 0..8 {
        let failure = harness
            .reconciler
            .login("unverified@shop.com", PASSWORD)
            .await
            .unwrap_err();
        assert_eq!(failure.code, ErrorCode::EmailNotVerified);
    }
    assert!(harness.rate_store.is_empty());
}

#[tokio::test]
async fn test_success_clears_attempts() {
    let harness = Harness::new();
    harness.seed_user("clumsy@shop.com", true, Role::User);

    for _ in 0..4 {
        let _ = harness
            .reconciler
            .login("clumsy@shop.com", "typo")
            .await;
    }
    harness
        .reconciler
        .login("clumsy@shop.com", PASSWORD)
        .await
        .unwrap();
    assert!(harness.rate_store.is_empty());

    // a fresh budget of five
    for _ in 0..5 {
        let failure = harness
            .reconciler
            .login("clumsy@shop.com", "typo")
            .await
            .unwrap_err();
        assert_eq!(failure.code, ErrorCode::WrongPassword);
    }
}

#[tokio::test]
async fn test_missing_credentials_do_not_count() {
    let harness = Harness::new();
    for _ in 0..6 {
        let failure = harness
            .reconciler
            .login("someone@shop.com", "")
            .await
            .unwrap_err();
        assert_eq!(failure.code, ErrorCode::MissingCredentials);
    }
    assert!(harness.rate_store.is_empty());
}

#[tokio::test]
async fn test_password_reset_limit() {
    let harness = Harness::new();
    harness.seed_user("reset@shop.com", true, Role::User);

    // a missing account counts; three strikes for resets
    for _ in 0..3 {
        let failure = harness
            .reconciler
            .send_password_reset("ghost@shop.com")
            .await
            .unwrap_err();
        assert_eq!(failure.code, ErrorCode::UserNotFound);
    }
    let failure = harness
        .reconciler
        .send_password_reset("ghost@shop.com")
        .await
        .unwrap_err();
    assert_eq!(failure.code, ErrorCode::TooManyAttempts);

    // other identifiers are unaffected
    assert_ok!(
        harness
            .reconciler
            .send_password_reset("reset@shop.com")
            .await
    );
}

#[tokio::test]
async fn test_disabled_limiter_never_locks() {
    let mut config = Config::default();
    config.rate_limits.enabled = false;
    let harness = Harness::with_config(config);
    harness.seed_user("free@shop.com", true, Role::User);

    for _ in 0..10 {
        let failure = harness
            .reconciler
            .login("free@shop.com", "nope")
            .await
            .unwrap_err();
        assert_eq!(failure.code, ErrorCode::WrongPassword);
    }
}

#[test]
fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("limits").join("rate_limits.json");
    let clock = ManualClock::default();

    let mut config = RateLimitConfig::default();
    config.login = RateLimitPolicy::new(2, 600, 1200);

    let limiter = RateLimiter::new(Arc::new(FileRateLimitStore::new(&path)), config.clone())
        .with_clock(Arc::new(clock.clone()));
    limiter.record_failed_attempt(RateLimitAction::Login, "a@b.com");
    limiter.record_failed_attempt(RateLimitAction::Login, "a@b.com");
    assert!(path.exists());

    let restarted = RateLimiter::new(Arc::new(FileRateLimitStore::new(&path)), config)
        .with_clock(Arc::new(clock.clone()));
    let status = restarted.check_rate_limit(RateLimitAction::Login, "a@b.com");
    assert!(status.locked);
    assert_eq!(status.minutes_remaining, Some(20));

    restarted.clear_all_rate_limits();
    assert!(
        restarted
            .check_rate_limit(RateLimitAction::Login, "a@b.com")
            .allowed
    );
}
