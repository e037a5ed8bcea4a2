//! Relay sessions and the HTTP surface.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use templine_api::server::serve_on;
use templine_api::{AppState, RelaySession, APOLOGY};
use templine_core::{CachedReading, ProfileStore, ReadingCache, StoreError, StoreResult};
use templine_storage::MemoryStore;

use common::{Fixture, CALLER, DEVICE};

struct OfflineCache;

#[async_trait]
impl ReadingCache for OfflineCache {
    async fn upsert(&self, _reading: &CachedReading) -> StoreResult<()> {
        Err(StoreError::Unavailable("offline".to_string()))
    }

    async fn get_latest(&self, _device_id: &str) -> StoreResult<Option<CachedReading>> {
        Err(StoreError::Unavailable("offline".to_string()))
    }
}

struct PanickingProfiles;

#[async_trait]
impl ProfileStore for PanickingProfiles {
    async fn device_for_caller(&self, _caller: &str) -> StoreResult<Option<String>> {
        panic!("profile lookup blew up");
    }

    async fn register_caller(&self, _caller: &str, _device_id: &str) -> StoreResult<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_prompt_after_setup_gets_reply() {
    let fixture = Fixture::new().await;
    fixture.spawn_device(71.0).await;
    let state = fixture.app_state();

    let mut session = RelaySession::open(state.clone());
    session.handle_text(&format!(r#"{{"type":"setup","from":"{CALLER}"}}"#));
    session.handle_text(r#"{"type":"prompt","voicePrompt":"What's the temperature?"}"#);

    let reply = session.next_reply().await.unwrap();
    assert_eq!(reply, "Your sensor kit-001 reads 71.0 degrees Fahrenheit.");

    let context = state.sessions.get(&session.id()).unwrap();
    assert_eq!(context.caller.as_deref(), Some(CALLER));
    assert_eq!(context.turns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_are_ignored() {
    let fixture = Fixture::new().await;
    let mut session = RelaySession::open(fixture.app_state());

    session.handle_text("{not json");
    session.handle_text(r#"{"type":"interrupt"}"#);

    assert_eq!(session.pending_turns(), 0);
    assert!(session.next_reply().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_prompt_without_caller() {
    let fixture = Fixture::new().await;
    let mut session = RelaySession::open(fixture.app_state());

    session.handle_text(r#"{"type":"prompt","voicePrompt":"temp"}"#);

    assert_eq!(
        session.next_reply().await.unwrap(),
        "I don't see a registered sensor for this phone. Please register first."
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_turn_gets_apology() {
    let profiles = Arc::new(MemoryStore::new());
    profiles.register_caller(CALLER, DEVICE).await.unwrap();
    let fixture = Fixture::with_stores(profiles, Arc::new(OfflineCache)).await;

    let mut session = RelaySession::open(fixture.app_state());
    session.handle_text(&format!(
        r#"{{"type":"prompt","from":"{CALLER}","voicePrompt":"temperature"}}"#
    ));

    assert_eq!(session.next_reply().await.unwrap(), APOLOGY);
}

#[tokio::test(start_paused = true)]
async fn test_panicked_turn_gets_apology() {
    let fixture = Fixture::new().await;
    let state = AppState::new(fixture.assistant_with_profiles(Arc::new(PanickingProfiles)));

    let mut session = RelaySession::open(state);
    session.handle_text(&format!(
        r#"{{"type":"prompt","from":"{CALLER}","voicePrompt":"temperature"}}"#
    ));

    assert_eq!(session.next_reply().await.as_deref(), Some(APOLOGY));
    assert_eq!(session.pending_turns(), 0);
    assert!(session.next_reply().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_closing_session_cancels_turns() {
    // No device: the turn stays in flight until the session goes away.
    let fixture = Fixture::new().await;
    let state = fixture.app_state();

    let mut session = RelaySession::open(state.clone());
    session.handle_text(&format!(
        r#"{{"type":"prompt","from":"{CALLER}","voicePrompt":"temperature"}}"#
    ));

    for _ in 0..100 {
        if fixture.readings.registry().pending_count() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(fixture.readings.registry().pending_count(), 1);
    assert_eq!(state.sessions.active_count(), 1);

    drop(session);

    for _ in 0..100 {
        if fixture.readings.registry().pending_count() == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(fixture.readings.registry().pending_count(), 0);
    assert_eq!(state.sessions.active_count(), 0);
}

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = Fixture::new().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(serve_on(listener, fixture.app_state(), async move {
        let _ = stop_rx.await;
    }));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let health: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["ok"], true);
    assert_eq!(health["service"], "templine");
    assert_eq!(health["pending_requests"], 0);
    assert_eq!(health["active_sessions"], 0);

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}
