//! Token lifecycle and session retry behaviour against a scripted backend

mod common;

use common::{BackendScript, ScriptedFactory};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use vals_secret_controller::backend::{
    BackendError, BackendSession, ClientFactory, TokenManager, TokenState,
};
use vals_secret_controller::controller::backoff::ExponentialBackoff;

fn session_over(factory: &Arc<ScriptedFactory>) -> Arc<BackendSession> {
    Arc::new(
        BackendSession::new(Arc::clone(factory) as Arc<dyn ClientFactory>)
            .with_retry_policy(3, Duration::from_secs(2)),
    )
}

fn manager(session: &Arc<BackendSession>) -> TokenManager {
    TokenManager::with_timing(
        Arc::clone(session),
        ExponentialBackoff::for_token_renewal(),
        Duration::from_secs(5),
    )
}

#[tokio::test(start_paused = true)]
async fn test_login_failures_back_off_until_success() {
    let factory = Arc::new(ScriptedFactory::new(BackendScript::default()));
    factory.script().failing_logins.store(2, Ordering::SeqCst);
    let session = session_over(&factory);
    let mut manager = manager(&session);

    let started = tokio::time::Instant::now();
    let auth = manager.authenticate().await;
    let waited = started.elapsed();

    assert_eq!(auth.token(), Some("tok-3"));
    assert_eq!(session.current_token().as_deref(), Some("tok-3"));
    assert_eq!(factory.script().logins.load(Ordering::SeqCst), 3);
    // 5s then 10s between the three attempts
    assert!(waited >= Duration::from_secs(15), "waited {waited:?}");
    assert!(waited < Duration::from_secs(16), "waited {waited:?}");
    assert_eq!(manager.state(), TokenState::Authenticating);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_resets_after_success() {
    let factory = Arc::new(ScriptedFactory::new(BackendScript::default()));
    factory.script().failing_logins.store(3, Ordering::SeqCst);
    let session = session_over(&factory);
    let mut manager = manager(&session);
    manager.authenticate().await;

    factory.script().failing_logins.store(1, Ordering::SeqCst);
    let started = tokio::time::Instant::now();
    manager.authenticate().await;

    assert!(started.elapsed() < Duration::from_secs(6), "first delay again");
}

#[tokio::test(start_paused = true)]
async fn test_non_renewable_token_is_not_watched() {
    let factory = Arc::new(ScriptedFactory::new(BackendScript::default()));
    let session = session_over(&factory);
    let mut manager = manager(&session);

    let auth = manager.authenticate().await;
    assert!(!auth.is_renewable());
    manager.watch(&auth).await.unwrap();

    assert_eq!(session.current_token().as_deref(), Some("tok-1"));
    assert_eq!(manager.state(), TokenState::Authenticating);
}

#[tokio::test(start_paused = true)]
async fn test_renewed_token_is_written_to_session() {
    let factory = Arc::new(ScriptedFactory::new(BackendScript::default()));
    factory.script().renewable_logins.store(true, Ordering::SeqCst);
    let session = session_over(&factory);
    let mut manager = manager(&session);

    let auth = manager.authenticate().await;
    manager.watch(&auth).await.unwrap();

    assert_eq!(session.current_token().as_deref(), Some("renewed-1"));
    assert_eq!(manager.state(), TokenState::Watching);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_recreates_client_and_pauses() {
    let factory = Arc::new(ScriptedFactory::new(BackendScript::default()));
    factory.script().renewable_logins.store(true, Ordering::SeqCst);
    let session = session_over(&factory);
    let mut manager = manager(&session);

    let started = tokio::time::Instant::now();
    manager.run_cycle().await;

    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    assert_eq!(manager.state(), TokenState::LoggedOut);
    assert!(started.elapsed() >= Duration::from_secs(5));
    // the recreated client starts from the renewed token
    assert_eq!(session.current_token().as_deref(), Some("renewed-1"));
}

#[tokio::test(start_paused = true)]
async fn test_denied_read_recovers_after_reauthentication() {
    let factory = Arc::new(ScriptedFactory::new(BackendScript::default()));
    factory.script().deny_reads.store(1, Ordering::SeqCst);
    let session = session_over(&factory);

    let response = session
        .execute_with_retry(|client| async move { client.read("secret/data/app").await })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(response.data_str("path").as_deref(), Some("secret/data/app"));
    assert_eq!(factory.script().reads.load(Ordering::SeqCst), 2);
    assert_eq!(factory.script().logins.load(Ordering::SeqCst), 1);
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    assert_eq!(session.current_token().as_deref(), Some("tok-1"));
}

#[tokio::test(start_paused = true)]
async fn test_denied_reads_exhaust_retries() {
    let factory = Arc::new(ScriptedFactory::new(BackendScript::default()));
    factory.script().deny_reads.store(10, Ordering::SeqCst);
    let session = session_over(&factory);

    let started = tokio::time::Instant::now();
    let err = session
        .execute_with_retry(|client| async move { client.read("secret/data/app").await })
        .await
        .unwrap_err();

    match err {
        BackendError::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(source.is_permission_denied());
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(factory.script().reads.load(Ordering::SeqCst), 3);
    assert_eq!(factory.script().logins.load(Ordering::SeqCst), 3);
    // pauses between attempts, none after the last
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert!(started.elapsed() < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_other_errors_are_returned_immediately() {
    let factory = Arc::new(ScriptedFactory::new(BackendScript::default()));
    let session = session_over(&factory);

    let err = session
        .execute_with_retry(|client| async move { client.revoke("database/creds/x/1").await })
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(factory.script().logins.load(Ordering::SeqCst), 0);
}
