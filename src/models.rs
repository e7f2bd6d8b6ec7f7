use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::CompletionError;

pub mod openai;
#[cfg(test)]
pub mod scripted;

pub use openai::OpenAICompatible;

/// Lazily produced text fragments of one model reply.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send + 'static>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: TurnRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, content: content.into() }
    }
}

/// One ongoing exchange with the model. Clones share the same history.
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    id: Uuid,
    turns: Arc<Mutex<Vec<ChatTurn>>>,
}

impl ConversationHandle {
    pub fn new(turns: Vec<ChatTurn>) -> Self {
        Self { id: Uuid::new_v4(), turns: Arc::new(Mutex::new(turns)) }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn history(&self) -> Vec<ChatTurn> {
        self.turns.lock().await.clone()
    }

    /// Records a finished exchange. Both turns are appended under one lock so
    /// a concurrent turn on the same handle cannot split the pair.
    pub async fn record_exchange(&self, user: ChatTurn, assistant: ChatTurn) {
        let mut turns = self.turns.lock().await;
        turns.push(user);
        turns.push(assistant);
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Opens a conversation conditioned on `system_prompt` and returns the
    /// model's opening reply alongside the handle.
    async fn start_conversation(
        &self,
        system_prompt: &str,
    ) -> Result<(ConversationHandle, String), CompletionError>;

    /// Sends one user turn. The history is extended only once the returned
    /// stream has been drained successfully.
    async fn send(&self, handle: &ConversationHandle, text: &str) -> Result<TextStream, CompletionError>;

    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

/// Drains `stream` and joins its fragments. Fails on the first bad fragment.
pub async fn collect_text(mut stream: TextStream) -> Result<String, CompletionError> {
    let mut full = String::new();
    while let Some(chunk) = stream.next().await {
        full.push_str(&chunk?);
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn collect_joins_fragments_in_order() {
        let s: TextStream = Box::pin(stream::iter(vec![Ok("Hel".to_string()), Ok("lo".to_string())]));
        assert_eq!(collect_text(s).await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn collect_stops_on_error() {
        let s: TextStream = Box::pin(stream::iter(vec![
            Ok("partial".to_string()),
            Err(CompletionError::Stream("reset".into())),
            Ok("never".to_string()),
        ]));
        assert!(matches!(collect_text(s).await, Err(CompletionError::Stream(_))));
    }

    #[tokio::test]
    async fn handle_clones_share_history() {
        let h = ConversationHandle::new(vec![ChatTurn::user("hi")]);
        let h2 = h.clone();
        h2.record_exchange(ChatTurn::user("q"), ChatTurn::assistant("a")).await;
        assert_eq!(h.history().await.len(), 3);
        assert_eq!(h.id(), h2.id());
    }
}
