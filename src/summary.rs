use std::sync::Arc;

use crate::models::CompletionService;
use crate::session::Message;

pub const SUMMARY_FALLBACK: &str = "Failed to generate summary.";
pub const EMPTY_HISTORY_SUMMARY: &str = "No conversation to summarize.";

const SUMMARY_INSTRUCTION: &str = "Please create an abstractive summary of the following conversation. \
Focus on the key topics, decisions, and outcomes. \
Keep the summary concise and no more than two sentences. Conversation:\n\n";

/// Best-effort transcript summarization. Never fails; see [`SUMMARY_FALLBACK`].
#[derive(Clone)]
pub struct SummaryService {
    completion: Arc<dyn CompletionService>,
}

impl SummaryService {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    #[tracing::instrument(name = "summarize", skip_all, fields(messages = history.len()))]
    pub async fn summarize(&self, history: &[Message]) -> String {
        if history.is_empty() {
            return EMPTY_HISTORY_SUMMARY.to_string();
        }
        let prompt = format!("{SUMMARY_INSTRUCTION}{}", render_transcript(history));
        match self.completion.complete(&prompt).await {
            Ok(summary) => {
                metrics::counter!("relay_summaries_total", "outcome" => "ok").increment(1);
                summary
            }
            Err(e) => {
                tracing::warn!(error = %e, "summary generation failed");
                metrics::counter!("relay_summaries_total", "outcome" => "fallback").increment(1);
                SUMMARY_FALLBACK.to_string()
            }
        }
    }
}

pub fn render_transcript(history: &[Message]) -> String {
    history.iter().map(|m| format!("{}: {}\n", m.role, m.parts)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scripted::ScriptedCompletion;
    use crate::session::Role;
    use std::sync::atomic::Ordering;

    fn history() -> Vec<Message> {
        vec![
            Message { role: Role::User, parts: "Where is the inn?".into() },
            Message { role: Role::Assistant, parts: "Down the road.".into() },
        ]
    }

    #[test]
    fn transcript_keeps_order_and_format() {
        assert_eq!(render_transcript(&history()), "user: Where is the inn?\nassistant: Down the road.\n");
    }

    #[tokio::test]
    async fn summary_comes_from_completion() {
        let stub = Arc::new(ScriptedCompletion::new().with_summary(Ok("They found the inn.")));
        let svc = SummaryService::new(stub.clone());
        assert_eq!(svc.summarize(&history()).await, "They found the inn.");
        let prompt = stub.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("two sentences"));
        assert!(prompt.ends_with("user: Where is the inn?\nassistant: Down the road.\n"));
    }

    #[tokio::test]
    async fn upstream_failure_falls_back() {
        let stub = Arc::new(ScriptedCompletion::new().with_summary(Err("quota")));
        let svc = SummaryService::new(stub);
        assert_eq!(svc.summarize(&history()).await, SUMMARY_FALLBACK);
    }

    #[tokio::test]
    async fn empty_history_skips_completion() {
        let stub = Arc::new(ScriptedCompletion::new());
        let svc = SummaryService::new(stub.clone());
        assert_eq!(svc.summarize(&[]).await, EMPTY_HISTORY_SUMMARY);
        assert_eq!(svc.summarize(&[]).await, EMPTY_HISTORY_SUMMARY);
        assert_eq!(stub.complete_calls.load(Ordering::SeqCst), 0);
    }
}
