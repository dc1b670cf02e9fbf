//! Session manager behaviour against the in-memory backend

mod common;

use std::sync::Arc;
use std::time::Duration;

use clevercard_core::remote::MemoryBackend;
use clevercard_core::{AuthPhase, Error, Role, SessionManager};
use common::{class_row, teacher_backend, wire, GatedBackend, EMAIL, PASSWORD};
use tokio::time::timeout;

#[tokio::test]
async fn test_sign_in_populates_user() {
    let (session, _) = wire(Arc::new(teacher_backend()));

    session.sign_in(EMAIL, PASSWORD).await.unwrap();

    let state = session.state().snapshot();
    let user = state.user.as_ref().expect("user should be set");
    assert_eq!(user.id, "u1");
    assert_eq!(user.email, "t@school.edu");
    assert_eq!(user.full_name, "Ms. T");
    assert_eq!(user.role, Role::Teacher);
    assert_eq!(state.auth_phase, AuthPhase::Authenticated);
    assert!(!state.is_loading);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn test_sign_in_failure_records_error() {
    let (session, _) = wire(Arc::new(teacher_backend()));

    let err = session.sign_in(EMAIL, "wrong-password").await.unwrap_err();

    assert!(matches!(err, Error::Auth(_)));
    let state = session.state().snapshot();
    assert!(state.user.is_none());
    assert_eq!(state.error, Some(err.to_string()));
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_sign_in_clears_previous_error() {
    let (session, _) = wire(Arc::new(teacher_backend()));
    let _ = session.sign_in(EMAIL, "wrong-password").await;

    session.sign_in(EMAIL, PASSWORD).await.unwrap();

    assert!(session.state().snapshot().error.is_none());
}

#[tokio::test]
async fn test_sign_up_creates_profile_without_signing_in() {
    let backend = Arc::new(MemoryBackend::new());
    let (session, _) = wire(backend.clone());

    let outcome = session
        .sign_up("new@school.edu", "secret1", "Mr. N")
        .await
        .unwrap();

    let account = outcome.user.expect("sign-up should report the account");
    assert!(outcome.session.is_none());
    let profile = backend.profile(&account.id).expect("profile row written");
    assert_eq!(profile.full_name.as_deref(), Some("Mr. N"));
    assert_eq!(profile.role, Some(Role::Teacher));

    let state = session.state().snapshot();
    assert!(state.user.is_none());
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_sign_up_succeeds_when_profile_write_fails() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_profiles("profiles unavailable");
    let (session, _) = wire(backend.clone());

    let outcome = session.sign_up("new@school.edu", "secret1", "Mr. N").await;

    assert!(outcome.is_ok());
    assert!(session.state().snapshot().error.is_none());
}

#[tokio::test]
async fn test_sign_up_duplicate_account() {
    let (session, _) = wire(Arc::new(teacher_backend()));

    let err = session.sign_up(EMAIL, "secret1", "Ms. T").await.unwrap_err();

    assert!(matches!(err, Error::Auth(_)));
    assert_eq!(session.state().snapshot().error, Some(err.to_string()));
}

#[tokio::test]
async fn test_initialize_restores_existing_session() {
    let backend = teacher_backend().with_existing_session(EMAIL);
    let (session, _) = wire(Arc::new(backend));

    session.initialize().await.unwrap();

    let state = session.state().snapshot();
    assert_eq!(state.auth_phase, AuthPhase::Authenticated);
    assert_eq!(state.user.as_ref().map(|u| u.full_name.as_str()), Some("Ms. T"));
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_concurrent_initialize_checks_once() {
    let backend = Arc::new(GatedBackend::new(teacher_backend()));
    let (session, _) = wire(backend.clone());

    let release = backend.sessions.hold();
    let first = tokio::spawn({
        let session = session.clone();
        async move { session.initialize().await }
    });
    backend.sessions.wait_for_calls(1).await;
    let checking = session.state().snapshot();
    assert_eq!(checking.auth_phase, AuthPhase::Checking);
    assert!(checking.is_loading);

    session.initialize().await.unwrap();
    assert_eq!(backend.sessions.calls(), 1);

    release.send(()).unwrap();
    first.await.unwrap().unwrap();

    let state = session.state().snapshot();
    assert_eq!(backend.sessions.calls(), 1);
    assert_eq!(state.auth_phase, AuthPhase::Anonymous);
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_sign_out_clears_user_and_collections() {
    let backend = teacher_backend().with_rows(
        clevercard_core::remote::Table::Classes,
        vec![class_row("c1", "Class 5A")],
    );
    let (session, store) = wire(Arc::new(backend));
    session.sign_in(EMAIL, PASSWORD).await.unwrap();
    store.load_classes().await.unwrap();
    assert_eq!(store.state().snapshot().classes.len(), 1);

    session.sign_out().await.unwrap();

    let state = session.state().snapshot();
    assert!(state.user.is_none());
    assert!(state.classes.is_empty());
    assert!(state.students.is_empty());
    assert!(state.reports.is_empty());
    assert_eq!(state.auth_phase, AuthPhase::Anonymous);
}

#[tokio::test]
async fn test_sign_out_discards_load_in_flight() {
    let backend = Arc::new(GatedBackend::new(teacher_backend()));
    let (session, store) = wire(backend.clone());
    session.sign_in(EMAIL, PASSWORD).await.unwrap();

    let release = backend.gate();
    let load = tokio::spawn({
        let store = store.clone();
        async move { store.load_classes().await }
    });
    backend.wait_for_reads(1).await;

    session.sign_out().await.unwrap();
    release.send(Ok(vec![class_row("c1", "Class 5A")])).unwrap();
    load.await.unwrap().unwrap();

    let state = session.state().snapshot();
    assert!(state.user.is_none());
    assert!(state.classes.is_empty());
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_revocation_clears_user() {
    let backend = Arc::new(teacher_backend());
    let (session, _) = wire(backend.clone());
    session.sign_in(EMAIL, PASSWORD).await.unwrap();
    let subscription = session.watch_session_changes();
    let mut changes = session.state().subscribe();

    backend.revoke_session();

    let cleared = timeout(
        Duration::from_secs(1),
        changes.wait_for(|state| state.user.is_none()),
    )
    .await
    .map(|changed| changed.is_ok());
    assert!(matches!(cleared, Ok(true)), "user was not cleared");
    assert_eq!(session.state().snapshot().auth_phase, AuthPhase::Anonymous);
    subscription.unsubscribe().await;
}

#[tokio::test]
async fn test_unsubscribed_handle_ignores_revocation() {
    let backend = Arc::new(teacher_backend());
    let (session, _) = wire(backend.clone());
    session.sign_in(EMAIL, PASSWORD).await.unwrap();

    session.watch_session_changes().unsubscribe().await;
    backend.revoke_session();
    tokio::task::yield_now().await;

    assert!(session.state().snapshot().user.is_some());
}

/// Wait until the session watcher has seen the session end
async fn wait_for_session_end(session: &SessionManager) {
    let mut changes = session.state().subscribe();
    let ended = timeout(
        Duration::from_secs(1),
        changes.wait_for(|state| state.auth_generation() > 0),
    )
    .await
    .map(|changed| changed.is_ok());
    assert!(matches!(ended, Ok(true)), "session end was not observed");
}

#[tokio::test]
async fn test_revocation_during_sign_in_keeps_user_cleared() {
    let backend = Arc::new(GatedBackend::new(teacher_backend()));
    let (session, _) = wire(backend.clone());
    let subscription = session.watch_session_changes();

    let release = backend.profiles.hold();
    let signing_in = tokio::spawn({
        let session = session.clone();
        async move { session.sign_in(EMAIL, PASSWORD).await }
    });
    backend.profiles.wait_for_calls(1).await;

    backend.inner.revoke_session();
    wait_for_session_end(&session).await;
    release.send(()).unwrap();

    let err = signing_in.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    let state = session.state().snapshot();
    assert!(state.user.is_none());
    assert_eq!(state.auth_phase, AuthPhase::Anonymous);
    assert_eq!(state.error, Some(err.to_string()));
    assert!(!state.is_loading);
    subscription.unsubscribe().await;
}

#[tokio::test]
async fn test_revocation_during_restore_keeps_user_cleared() {
    let backend = Arc::new(GatedBackend::new(teacher_backend().with_existing_session(EMAIL)));
    let (session, _) = wire(backend.clone());
    let subscription = session.watch_session_changes();

    let release = backend.profiles.hold();
    let restoring = tokio::spawn({
        let session = session.clone();
        async move { session.initialize().await }
    });
    backend.profiles.wait_for_calls(1).await;

    backend.inner.revoke_session();
    wait_for_session_end(&session).await;
    assert_eq!(session.state().snapshot().auth_phase, AuthPhase::Checking);
    release.send(()).unwrap();

    restoring.await.unwrap().unwrap();
    let state = session.state().snapshot();
    assert!(state.user.is_none());
    assert_eq!(state.auth_phase, AuthPhase::Anonymous);
    assert!(!state.is_loading);
    subscription.unsubscribe().await;
}
