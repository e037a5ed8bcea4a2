//! Conversation relay WebSocket.
//!
//! The voice platform connects one socket per call and sends JSON frames:
//! `setup` (carrying `from`, the caller's number), `prompt` (carrying the
//! transcribed `voicePrompt`) and assorted call events. Each prompt is
//! answered with one `text` frame.
//!
//! Turns run as tasks owned by the session. Closing the socket drops the
//! session, which aborts unfinished turns and with them their pending
//! device requests.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::server::AppState;

pub const RELAY_PATH: &str = "/twilio-wss-for-conversation-relay";

/// Reply for turns that failed unexpectedly.
pub const APOLOGY: &str = "Sorry, something went wrong reading your sensor. Please try again.";

/// Inbound relay frame. Only the fields the relay acts on are decoded.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    voice_prompt: Option<String>,
}

/// Outbound text frame carrying a complete reply.
pub fn text_frame(reply: &str) -> String {
    json!({
        "type": "text",
        "token": reply,
        "last": true,
    })
    .to_string()
}

/// One relay connection and its in-flight turns.
pub struct RelaySession {
    id: Uuid,
    state: AppState,
    turns: JoinSet<String>,
}

impl RelaySession {
    pub fn open(state: AppState) -> Self {
        let id = state.sessions.open();
        Self {
            id,
            state,
            turns: JoinSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pending_turns(&self) -> usize {
        self.turns.len()
    }

    /// Apply one inbound text frame. Prompts start a turn.
    pub fn handle_text(&mut self, text: &str) {
        let frame: RelayFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Malformed relay frame");
                return;
            }
        };

        if let Some(from) = frame.from {
            debug!(session_id = %self.id, caller = %from, "Caller identified");
            self.state.sessions.set_caller(&self.id, from);
        }

        match frame.kind.as_deref() {
            Some("prompt") => self.start_turn(frame.voice_prompt.unwrap_or_default()),
            kind => debug!(session_id = %self.id, kind = ?kind, "Relay frame"),
        }
    }

    fn start_turn(&mut self, utterance: String) {
        let caller = self.state.sessions.caller(&self.id);
        self.state.sessions.record_turn(&self.id);
        info!(session_id = %self.id, utterance = %utterance, "Prompt received");

        let assistant = self.state.assistant.clone();
        let session_id = self.id;
        self.turns.spawn(async move {
            match assistant.handle_turn(caller.as_deref(), &utterance).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Turn failed");
                    APOLOGY.to_string()
                }
            }
        });
    }

    /// Next finished reply; `None` once no turns remain.
    ///
    /// Cancel safe.
    pub async fn next_reply(&mut self) -> Option<String> {
        while let Some(finished) = self.turns.join_next().await {
            match finished {
                Ok(reply) => return Some(reply),
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    error!(session_id = %self.id, error = %e, "Turn task panicked");
                    return Some(APOLOGY.to_string());
                }
            }
        }
        None
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        self.turns.abort_all();
        if let Some(session) = self.state.sessions.close(&self.id) {
            info!(session_id = %self.id, turns = session.turns, "Conversation relay closed");
        }
    }
}

pub async fn relay_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_relay_socket(socket, state))
}

async fn handle_relay_socket(mut socket: WebSocket, state: AppState) {
    let mut session = RelaySession::open(state);
    info!(session_id = %session.id(), "Conversation relay connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id = %session.id(), error = %e, "Relay socket error");
                        break;
                    }
                }
            }
            Some(reply) = session.next_reply(), if session.pending_turns() > 0 => {
                if socket.send(Message::Text(text_frame(&reply))).await.is_err() {
                    break;
                }
            }
        }
    }
}
