use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::models::ConversationHandle;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Assistant,
    User,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::System => "system",
            Role::Assistant => "assistant",
            Role::User => "user",
        })
    }
}

/// A role-tagged utterance; the server-to-client frame and the summary
/// transcript element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub parts: String,
}

impl Message {
    pub fn system(parts: impl Into<String>) -> Self {
        Self { role: Role::System, parts: parts.into() }
    }

    pub fn assistant(parts: impl Into<String>) -> Self {
        Self { role: Role::Assistant, parts: parts.into() }
    }
}

/// Binding between a persona and its live conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub persona_id: String,
    pub handle: ConversationHandle,
    /// Opening assistant message, sent only to the connection that created the session.
    pub greeting: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(persona_id: impl Into<String>, handle: ConversationHandle, greeting: String) -> Self {
        Self { persona_id: persona_id.into(), handle, greeting, created_at: Utc::now() }
    }
}

/// Process-lifetime map of persona id to session. Entries are never evicted.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<OnceCell<Arc<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, persona_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(persona_id).and_then(|cell| cell.get().cloned())
    }

    /// Returns the persona's session, running `init` if there is none yet.
    ///
    /// Concurrent callers for the same persona queue on a per-key cell, so at
    /// most one `init` succeeds; the rest observe its session with
    /// `created == false`. A failed `init` leaves no entry behind once the
    /// last queued caller has given up; a caller still queued retries.
    pub async fn get_or_create<F, Fut, E>(&self, persona_id: &str, init: F) -> Result<(Arc<Session>, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session, E>>,
    {
        let cell = self.sessions.entry(persona_id.to_string()).or_default().clone();
        let mut created = false;
        let created_here = &mut created;
        let result = cell
            .get_or_try_init(|| async move {
                let session = init().await?;
                *created_here = true;
                Ok::<_, E>(Arc::new(session))
            })
            .await;
        match result {
            Ok(session) => Ok((session.clone(), created)),
            Err(e) => {
                // Clones are only taken under the shard lock, so a count of two
                // (map + ours) means nobody else is waiting on this cell.
                self.sessions.remove_if(persona_id, |_, c| {
                    Arc::ptr_eq(c, &cell) && !c.initialized() && Arc::strong_count(c) == 2
                });
                tracing::debug!(persona = persona_id, "session init failed");
                Err(e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.iter().filter(|e| e.value().initialized()).count()
    }
}
