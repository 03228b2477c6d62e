//! Tests for session tracking, buffers and expiry

use std::path::Path;

use codebridge::config::SessionConfig;
use codebridge::registry::{ExpiryTier, SessionRegistry};

fn registry() -> SessionRegistry {
    SessionRegistry::new(SessionConfig::default())
}

#[tokio::test]
async fn tracks_sessions_and_refuses_directory_migration() {
    let registry = registry();

    registry
        .track_session_for_routing("s1", Path::new("/projects/alpha"))
        .unwrap();
    // Re-tracking with the same directory refreshes, never errors
    registry
        .track_session_for_routing("s1", Path::new("/projects/alpha"))
        .unwrap();

    let err = registry
        .track_session_for_routing("s1", Path::new("/projects/beta"))
        .unwrap_err();
    assert!(err.to_string().contains("refusing to migrate"));

    // The rejected call must not have moved the session
    assert_eq!(
        registry.working_directory("s1").unwrap(),
        Path::new("/projects/alpha")
    );
}

#[tokio::test]
async fn rejects_empty_session_id() {
    let registry = registry();
    assert!(registry
        .track_session_for_routing("  ", Path::new("/projects/alpha"))
        .is_err());
}

#[tokio::test]
async fn reverse_lookup_returns_most_recent_active_session() {
    let registry = registry();
    let dir = Path::new("/projects/alpha");

    registry.track_session_for_routing("older", dir).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    registry.track_session_for_routing("newer", dir).unwrap();

    assert_eq!(
        registry.find_session_by_working_directory(dir).as_deref(),
        Some("newer")
    );

    // Dead sessions no longer resolve
    registry.kill_session("newer", "test");
    assert_eq!(
        registry.find_session_by_working_directory(dir).as_deref(),
        Some("older")
    );
    registry.kill_session("older", "test");
    assert!(registry.find_session_by_working_directory(dir).is_none());
}

#[tokio::test]
async fn stores_and_retrieves_buffered_content() {
    let registry = registry();
    registry
        .track_session_for_routing("s1", Path::new("/projects/alpha"))
        .unwrap();

    let id = registry
        .store_message("s1", Some("msg-1"), "hello", serde_json::json!({"k": 1}))
        .unwrap();
    assert_eq!(id, "msg-1");

    let generated = registry
        .store_message("s1", None, "anonymous", serde_json::Value::Null)
        .unwrap();
    assert!(!generated.is_empty());

    let retrieved = registry.with_buffer("s1", |buffer| buffer.retrieve("msg-1"));
    let (content, metadata) = retrieved.flatten().unwrap();
    assert_eq!(content, "hello");
    assert_eq!(metadata["k"], 1);

    // Unknown session is an error, not a silent drop
    assert!(registry
        .store_message("nope", None, "x", serde_json::Value::Null)
        .is_err());
}

#[tokio::test]
async fn thinking_state_shows_up_in_snapshots() {
    let registry = registry();
    registry
        .track_session_for_routing("s1", Path::new("/projects/alpha"))
        .unwrap();

    registry.with_buffer("s1", |buffer| buffer.set_thinking("reading files"));
    let info = registry.snapshot("s1").unwrap();
    assert!(info.is_thinking);

    registry.with_buffer("s1", |buffer| buffer.clear_thinking());
    let info = registry.snapshot("s1").unwrap();
    assert!(!info.is_thinking);
}

#[tokio::test]
async fn foreground_background_flags_round_trip() {
    let registry = registry();
    registry
        .track_session_for_routing("s1", Path::new("/projects/alpha"))
        .unwrap();

    assert!(!registry.snapshot("s1").unwrap().is_backgrounded);
    registry.mark_session_backgrounded("s1").unwrap();
    assert!(registry.snapshot("s1").unwrap().is_backgrounded);
    registry.mark_session_foregrounded("s1").unwrap();
    assert!(!registry.snapshot("s1").unwrap().is_backgrounded);

    assert!(registry.mark_session_backgrounded("nope").is_err());
}

#[tokio::test]
async fn provider_session_id_is_recorded_and_cleared_on_kill() {
    let registry = registry();
    registry
        .track_session_for_routing("s1", Path::new("/projects/alpha"))
        .unwrap();

    assert!(registry.provider_session_id("s1").is_none());
    registry.set_provider_session_id("s1", "uuid-123").unwrap();
    assert_eq!(
        registry.provider_session_id("s1").as_deref(),
        Some("uuid-123")
    );

    assert!(registry.kill_session("s1", "test"));
    assert!(registry.provider_session_id("s1").is_none());
    assert!(registry.is_expired("s1"));

    assert!(!registry.kill_session("unknown", "test"));
}

#[tokio::test]
async fn tracking_again_reactivates_a_killed_session() {
    let registry = registry();
    let dir = Path::new("/projects/alpha");
    registry.track_session_for_routing("s1", dir).unwrap();

    registry.kill_session("s1", "test");
    assert!(registry.is_expired("s1"));
    assert!(registry.find_session_by_working_directory(dir).is_none());

    // A new message for the same id and directory revives the session
    registry.track_session_for_routing("s1", dir).unwrap();
    assert!(!registry.is_expired("s1"));
    assert_eq!(
        registry.find_session_by_working_directory(dir).as_deref(),
        Some("s1")
    );
    assert_eq!(
        registry.snapshot("s1").unwrap().expiry_tier,
        ExpiryTier::Fresh
    );

    // Revival does not loosen the directory binding
    assert!(registry
        .track_session_for_routing("s1", Path::new("/projects/beta"))
        .is_err());
}

#[tokio::test]
async fn unknown_sessions_count_as_expired() {
    let registry = registry();
    assert!(registry.is_expired("never-seen"));

    registry
        .track_session_for_routing("s1", Path::new("/projects/alpha"))
        .unwrap();
    assert!(!registry.is_expired("s1"));
}

#[tokio::test]
async fn sweep_advances_tiers_and_deactivates_expired_sessions() {
    // Zero thresholds make every active session expire on the next sweep
    let config = SessionConfig {
        warn_secs: 0,
        warn_long_secs: 0,
        expire_secs: 0,
        ..SessionConfig::default()
    };
    let registry = SessionRegistry::new(config);
    registry
        .track_session_for_routing("s1", Path::new("/projects/alpha"))
        .unwrap();

    let transitions = registry.sweep_expiry();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].session_id, "s1");
    assert_eq!(transitions[0].tier, ExpiryTier::Expired);
    assert!(registry.is_expired("s1"));

    // Already inactive: a second sweep reports nothing
    assert!(registry.sweep_expiry().is_empty());
}

#[tokio::test]
async fn keep_alive_resets_tier_to_fresh() {
    let config = SessionConfig {
        warn_secs: 0,
        ..SessionConfig::default()
    };
    let registry = SessionRegistry::new(config);
    registry
        .track_session_for_routing("s1", Path::new("/projects/alpha"))
        .unwrap();

    let transitions = registry.sweep_expiry();
    assert_eq!(transitions[0].tier, ExpiryTier::Warned);

    registry.keep_session_alive("s1").unwrap();
    assert_eq!(registry.snapshot("s1").unwrap().expiry_tier, ExpiryTier::Fresh);
}

#[tokio::test]
async fn list_orders_sessions_most_recent_first() {
    let registry = registry();
    registry
        .track_session_for_routing("first", Path::new("/projects/a"))
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    registry
        .track_session_for_routing("second", Path::new("/projects/b"))
        .unwrap();

    let listed = registry.list();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, "second");
    assert_eq!(listed[1].id, "first");
}
