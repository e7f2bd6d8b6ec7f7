//! Deterministic [`CompletionService`] used by the test suites.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use super::{ChatTurn, CompletionService, ConversationHandle, TextStream};
use crate::error::CompletionError;

pub const GREETING: &str = "Well met, traveler!";

#[derive(Debug, Clone)]
pub enum Reply {
    Chunks(Vec<String>),
    /// Fails before any chunk is produced.
    Refuse,
    /// Yields the given chunks, then breaks mid-stream.
    BreakAfter(Vec<String>),
}

impl Reply {
    pub fn chunks(parts: &[&str]) -> Self {
        Reply::Chunks(parts.iter().map(|p| p.to_string()).collect())
    }
}

/// Replays queued replies; once the queue is empty it echoes the user text.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Reply>>,
    summary: Mutex<Option<Result<String, String>>>,
    start_delay: Option<Duration>,
    fail_start: bool,
    pub start_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub last_prompt: Mutex<Option<String>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.replies.lock().unwrap().extend(replies);
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn with_summary(self, summary: Result<&str, &str>) -> Self {
        *self.summary.lock().unwrap() = Some(summary.map(str::to_string).map_err(str::to_string));
        self
    }

    pub fn starts(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn start_conversation(&self, system_prompt: &str) -> Result<(ConversationHandle, String), CompletionError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start {
            return Err(CompletionError::Stream("scripted start failure".into()));
        }
        let opening = ChatTurn::user(system_prompt);
        Ok((ConversationHandle::new(vec![opening, ChatTurn::assistant(GREETING)]), GREETING.to_string()))
    }

    async fn send(&self, handle: &ConversationHandle, text: &str) -> Result<TextStream, CompletionError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().unwrap().pop_front();
        let chunks = match reply {
            None => vec![format!("echo: {text}")],
            Some(Reply::Chunks(c)) => c,
            Some(Reply::Refuse) => return Err(CompletionError::Stream("scripted refusal".into())),
            Some(Reply::BreakAfter(c)) => {
                let mut items: Vec<Result<String, CompletionError>> = c.into_iter().map(Ok).collect();
                items.push(Err(CompletionError::Stream("scripted disconnect".into())));
                return Ok(Box::pin(stream::iter(items)));
            }
        };
        handle.record_exchange(ChatTurn::user(text), ChatTurn::assistant(chunks.concat())).await;
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }

    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        match self.summary.lock().unwrap().clone() {
            Some(Ok(s)) => Ok(s),
            Some(Err(e)) => Err(CompletionError::Stream(e)),
            None => Ok("A short summary.".into()),
        }
    }
}
