//! Per-connection chat protocol.
//!
//! A connection moves through `Connecting -> Initializing -> Active -> Closed`.
//! `Initializing` is only entered when the persona has no session yet; the
//! connection that creates the session receives the greeting, every later
//! connection resumes silently. In `Active` each client text frame is one user
//! turn, answered by exactly one assistant frame (streamed replies are joined
//! before sending) or one system frame when the model call fails. Failures
//! never end the connection; only the client or the transport does.
//!
//! Connections bound to the same persona share one conversation and their
//! turns interleave in whatever order they reach the model.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::error::{ChatError, CompletionError};
use crate::models::collect_text;
use crate::server::AppState;
use crate::session::{Message, Session};

pub const NOT_FOUND_REPLY: &str = "Error: Character not found.";
pub const MISCONFIGURED_REPLY: &str = "Error: Character is misconfigured.";
pub const START_FAILED_REPLY: &str = "Error: Could not start a conversation with this character.";
pub const TURN_FAILED_REPLY: &str =
    "AI: I'm sorry, an error occurred while processing your request. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Initializing,
    Active,
    Closed,
}

type Outbound = SplitSink<WebSocket, WsMessage>;

pub struct ChatGateway {
    id: Uuid,
    persona_id: String,
    app: AppState,
    state: ConnectionState,
}

impl ChatGateway {
    pub fn new(persona_id: String, app: AppState) -> Self {
        Self { id: Uuid::new_v4(), persona_id, app, state: ConnectionState::Connecting }
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::debug!(connection = %self.id, persona = %self.persona_id, from = ?self.state, to = ?next, "connection state");
        self.state = next;
    }

    pub async fn run(mut self, socket: WebSocket) {
        metrics::gauge!("relay_active_connections").increment(1.0);
        let (mut tx, mut rx) = socket.split();

        if let Some(session) = self.establish(&mut tx).await {
            self.transition(ConnectionState::Active);
            while let Some(frame) = rx.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(WsMessage::Binary(_)) => {
                        tracing::warn!(connection = %self.id, "ignoring binary frame");
                        continue;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!(connection = %self.id, error = %e, "websocket receive error");
                        break;
                    }
                };
                let reply = self.relay_turn(&session, &text).await;
                if emit(&mut tx, &reply).await.is_err() {
                    // reply for a client that already left
                    break;
                }
            }
        }

        let _ = tx.close().await;
        self.transition(ConnectionState::Closed);
        metrics::gauge!("relay_active_connections").decrement(1.0);
    }

    /// Resolves the persona's session, creating and greeting if needed.
    /// Returns `None` when the connection must close.
    async fn establish(&mut self, tx: &mut Outbound) -> Option<Arc<Session>> {
        if let Some(session) = self.app.sessions.get(&self.persona_id) {
            tracing::info!(connection = %self.id, persona = %self.persona_id, since = %session.created_at, "resuming session");
            return Some(session);
        }

        self.transition(ConnectionState::Initializing);
        let app = &self.app;
        let persona_id = self.persona_id.as_str();
        let outcome = app.sessions.get_or_create(persona_id, move || open_session(app, persona_id)).await;

        match outcome {
            Ok((session, true)) => {
                metrics::counter!("relay_sessions_created_total").increment(1);
                tracing::info!(connection = %self.id, persona = %self.persona_id, conversation = %session.handle.id(), "session created");
                match emit(tx, &Message::assistant(session.greeting.clone())).await {
                    Ok(()) => Some(session),
                    Err(_) => None,
                }
            }
            Ok((session, false)) => {
                tracing::info!(connection = %self.id, persona = %self.persona_id, since = %session.created_at, "resuming session created by a concurrent connection");
                Some(session)
            }
            Err(err) => {
                let reply = match &err {
                    ChatError::PersonaNotFound(_) => {
                        tracing::info!(connection = %self.id, persona = %self.persona_id, "unknown persona");
                        NOT_FOUND_REPLY
                    }
                    ChatError::Configuration(e) => {
                        tracing::error!(connection = %self.id, error = %e, "persona record cannot be rendered");
                        MISCONFIGURED_REPLY
                    }
                    ChatError::Upstream(e) => {
                        tracing::warn!(connection = %self.id, persona = %self.persona_id, error = %e, "conversation start failed");
                        metrics::counter!("relay_upstream_failures_total", "stage" => "start").increment(1);
                        START_FAILED_REPLY
                    }
                };
                let _ = emit(tx, &Message::system(reply)).await;
                None
            }
        }
    }

    async fn relay_turn(&self, session: &Session, text: &str) -> Message {
        tracing::info!(connection = %self.id, persona = %self.persona_id, chars = text.len(), "user message");
        let started = Instant::now();
        let result: Result<String, CompletionError> = async {
            let stream = self.app.completion.send(&session.handle, text).await?;
            collect_text(stream).await
        }
        .await;

        match result {
            Ok(full) => {
                metrics::counter!("relay_turns_total").increment(1);
                tracing::info!(
                    connection = %self.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    chars = full.len(),
                    "assistant reply"
                );
                Message::assistant(full)
            }
            Err(e) => {
                metrics::counter!("relay_upstream_failures_total", "stage" => "turn").increment(1);
                tracing::warn!(connection = %self.id, persona = %self.persona_id, error = %e, "completion failed");
                Message::system(TURN_FAILED_REPLY)
            }
        }
    }
}

async fn open_session(app: &AppState, persona_id: &str) -> Result<Session, ChatError> {
    let persona = app.catalog.find(persona_id)?;
    let system_prompt = app.prompts.build(persona)?;
    let (handle, greeting) = app.completion.start_conversation(&system_prompt).await?;
    Ok(Session::new(persona_id, handle, greeting))
}

async fn emit(tx: &mut Outbound, msg: &Message) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    tx.send(WsMessage::Text(json)).await
}
