//! Integration tests for session open, reconnect, close, and cleanup.

use std::sync::Arc;

use agentbox::models::session::{SessionStatus, DEFAULT_CONVERSATION_ID, EPHEMERAL_PREFIX};
use agentbox::orchestrator::session_manager::{
    cleanup_session, list_sessions, LifecycleState, SessionLifecycle,
};
use agentbox::AppError;

use super::test_helpers::test_store;

// ── Open ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn open_without_id_creates_ephemeral_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());
    let mut lifecycle = SessionLifecycle::new(Arc::clone(&store), None);
    assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);

    let record = lifecycle.open(None).await.expect("open").clone();

    assert!(record.id.starts_with(EPHEMERAL_PREFIX));
    assert!(!record.is_persistent());
    assert_eq!(record.status, SessionStatus::Active);
    assert_eq!(lifecycle.state(), LifecycleState::Active);
    assert!(lifecycle.removes_on_close());
    assert!(store.exists(&record.id).await.expect("exists"));
}

#[tokio::test]
async fn open_with_new_id_creates_persistent_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());
    let mut lifecycle = SessionLifecycle::new(Arc::clone(&store), None);

    let record = lifecycle.open(Some("dev")).await.expect("open").clone();

    assert_eq!(record.id, "dev");
    assert!(record.is_persistent());
    assert_eq!(record.conversation_id, DEFAULT_CONVERSATION_ID);
    assert!(!lifecycle.removes_on_close());
    assert_eq!(lifecycle.session_id().expect("active"), "dev");
}

#[tokio::test]
async fn open_twice_is_invalid_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut lifecycle = SessionLifecycle::new(test_store(dir.path()), None);
    lifecycle.open(Some("dev")).await.expect("open");

    let err = lifecycle.open(Some("dev")).await.expect_err("second open");
    assert!(matches!(err, AppError::InvalidState(_)), "got {err:?}");
}

// ── Close ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn closing_ephemeral_session_removes_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());
    let mut lifecycle = SessionLifecycle::new(Arc::clone(&store), None);
    let id = lifecycle.open(None).await.expect("open").id.clone();

    lifecycle.close().await.expect("close");

    assert_eq!(lifecycle.state(), LifecycleState::Closed);
    assert!(!store.exists(&id).await.expect("exists"));
}

#[tokio::test]
async fn closing_persistent_session_keeps_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());
    let mut lifecycle = SessionLifecycle::new(Arc::clone(&store), None);
    lifecycle.open(Some("dev")).await.expect("open");
    lifecycle.record_backing_process("fake-1").expect("active");

    lifecycle.close().await.expect("close");

    assert!(store.exists("dev").await.expect("exists"));
    let stored = store.load("dev").await.expect("load");
    assert_eq!(stored.status, SessionStatus::Closed);
    assert!(stored.backing_process_id.is_none());
}

#[tokio::test]
async fn close_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut lifecycle = SessionLifecycle::new(test_store(dir.path()), None);
    lifecycle.open(None).await.expect("open");

    lifecycle.close().await.expect("first close");
    lifecycle.close().await.expect("second close is a no-op");
}

#[tokio::test]
async fn close_before_open_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut lifecycle = SessionLifecycle::new(test_store(dir.path()), None);
    lifecycle.close().await.expect("close");
    assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
}

#[tokio::test]
async fn auto_remove_override_applies_to_persistent_sessions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());
    let mut lifecycle = SessionLifecycle::new(Arc::clone(&store), Some(true));
    lifecycle.open(Some("scratch")).await.expect("open");

    lifecycle.close().await.expect("close");
    assert!(!store.exists("scratch").await.expect("exists"));
}

#[tokio::test]
async fn auto_remove_override_keeps_ephemeral_sessions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());
    let mut lifecycle = SessionLifecycle::new(Arc::clone(&store), Some(false));
    let id = lifecycle.open(None).await.expect("open").id.clone();

    lifecycle.close().await.expect("close");
    assert!(store.exists(&id).await.expect("exists"));
}

#[tokio::test]
async fn mutations_after_close_are_invalid_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut lifecycle = SessionLifecycle::new(test_store(dir.path()), None);
    lifecycle.open(Some("dev")).await.expect("open");
    lifecycle.close().await.expect("close");

    assert!(matches!(
        lifecycle.observe_conversation_id("conv-1"),
        Err(AppError::InvalidState(_))
    ));
    assert!(matches!(
        lifecycle.record_backing_process("fake-1"),
        Err(AppError::InvalidState(_))
    ));
    assert!(matches!(lifecycle.session_id(), Err(AppError::InvalidState(_))));
}

// ── Reconnect ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconnect_restores_conversation_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());

    let mut first = SessionLifecycle::new(Arc::clone(&store), None);
    first.open(Some("dev")).await.expect("open");
    first.observe_conversation_id("conv-abc").expect("active");
    first.close().await.expect("close");

    let second = SessionLifecycle::reconnect(Arc::clone(&store), "dev", None)
        .await
        .expect("reconnect");
    assert_eq!(second.state(), LifecycleState::Active);
    assert_eq!(second.conversation_id(), "conv-abc");
    assert_eq!(
        second.record().map(|r| r.status),
        Some(SessionStatus::Active)
    );
}

#[tokio::test]
async fn reconnect_unknown_session_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = SessionLifecycle::reconnect(test_store(dir.path()), "ghost", None)
        .await
        .expect_err("ghost must not exist");
    assert!(matches!(err, AppError::SessionNotFound(ref id) if id == "ghost"));
}

#[tokio::test]
async fn empty_conversation_id_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut lifecycle = SessionLifecycle::new(test_store(dir.path()), None);
    lifecycle.open(Some("dev")).await.expect("open");

    lifecycle.observe_conversation_id("conv-1").expect("active");
    lifecycle.observe_conversation_id("").expect("active");
    assert_eq!(lifecycle.conversation_id(), "conv-1");
}

#[tokio::test]
async fn reopening_unclean_session_clears_stale_process() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());

    let mut crashed = SessionLifecycle::new(Arc::clone(&store), None);
    crashed.open(Some("dev")).await.expect("open");
    crashed.record_backing_process("fake-1").expect("active");
    let mut stale = crashed.record().cloned().expect("record");
    stale.backing_process_id = Some("fake-1".into());
    store.update(&stale).await.expect("simulate crash");
    drop(crashed);

    let reopened = SessionLifecycle::reconnect(Arc::clone(&store), "dev", None)
        .await
        .expect("reconnect");
    let record = reopened.record().expect("record");
    assert_eq!(record.status, SessionStatus::Active);
    assert!(record.backing_process_id.is_none());
}

// ── Listing and cleanup ─────────────────────────────────────────────────────

#[tokio::test]
async fn list_sessions_returns_all_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());
    for id in ["alpha", "beta"] {
        let mut lifecycle = SessionLifecycle::new(Arc::clone(&store), None);
        lifecycle.open(Some(id)).await.expect("open");
        lifecycle.close().await.expect("close");
    }

    let records = list_sessions(store.as_ref()).await.expect("list");
    let mut ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["alpha", "beta"]);
}

#[tokio::test]
async fn cleanup_with_data_removes_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());
    let mut lifecycle = SessionLifecycle::new(Arc::clone(&store), None);
    lifecycle.open(Some("dev")).await.expect("open");
    lifecycle.close().await.expect("close");

    cleanup_session(store.as_ref(), "dev", true)
        .await
        .expect("cleanup");
    assert!(!store.exists("dev").await.expect("exists"));
}

#[tokio::test]
async fn cleanup_without_data_keeps_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());
    let mut lifecycle = SessionLifecycle::new(Arc::clone(&store), None);
    lifecycle.open(Some("dev")).await.expect("open");

    cleanup_session(store.as_ref(), "dev", false)
        .await
        .expect("cleanup");
    assert!(store.exists("dev").await.expect("exists"));
    assert_eq!(
        store.load("dev").await.expect("load").status,
        SessionStatus::Closed
    );
}

#[tokio::test]
async fn cleanup_unknown_session_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = test_store(dir.path());
    assert!(matches!(
        cleanup_session(store.as_ref(), "ghost", true).await,
        Err(AppError::SessionNotFound(_))
    ));
}
