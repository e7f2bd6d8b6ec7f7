use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{ChatTurn, CompletionService, ConversationHandle, TextStream};
use crate::error::CompletionError;
use crate::settings::EffectiveModelSettings;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Chat-completions backend for any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAICompatible {
    pub base_url: String,
    pub api_key: Option<String>,
    pub settings: EffectiveModelSettings,
    client: reqwest::Client,
}

impl OpenAICompatible {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, settings: EffectiveModelSettings) -> Self {
        Self { base_url: base_url.into(), api_key, settings, client: reqwest::Client::new() }
    }

    pub fn from_env(settings: EffectiveModelSettings) -> Self {
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();
        Self::new(base_url, api_key, settings)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body<'a>(&'a self, turns: &'a [ChatTurn], stream: bool) -> OaiChatRequest<'a> {
        OaiChatRequest {
            model: &self.settings.model,
            messages: turns.iter().map(|t| OaiMessageOut { role: t.role, content: &t.content }).collect(),
            temperature: self.settings.params.temperature,
            max_tokens: self.settings.params.max_tokens,
            top_p: self.settings.params.top_p,
            stream,
        }
    }

    async fn post(&self, body: &OaiChatRequest<'_>) -> Result<reqwest::Response, CompletionError> {
        let mut rb = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Status { status, body });
        }
        Ok(resp)
    }

    async fn generate(&self, turns: &[ChatTurn]) -> Result<String, CompletionError> {
        let resp = self.post(&self.request_body(turns, false)).await?;
        let v: OaiChatResponse = resp.json().await.map_err(|e| CompletionError::Decode(e.to_string()))?;
        v.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(CompletionError::Empty)
    }
}

#[derive(Debug, Serialize)]
struct OaiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessageOut<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")] temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")] max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")] top_p: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")] stream: bool,
}

#[derive(Debug, Serialize)]
struct OaiMessageOut<'a> {
    role: super::TurnRole,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OaiChatResponse {
    choices: Vec<OaiChoice>,
}

#[derive(Debug, Deserialize)]
struct OaiChoice { message: OaiMessage }

#[derive(Debug, Deserialize)]
struct OaiMessage { content: Option<String> }

#[derive(Debug, Deserialize)]
struct OaiStreamChunk {
    #[serde(default)]
    choices: Vec<OaiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OaiStreamChoice { delta: OaiDelta }

#[derive(Debug, Deserialize, Default)]
struct OaiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, CompletionError> {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        // comments, event names and blank separators
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let chunk: OaiStreamChunk =
        serde_json::from_str(data).map_err(|e| CompletionError::Stream(format!("bad event {data:?}: {e}")))?;
    let text: String = chunk.choices.into_iter().filter_map(|c| c.delta.content).collect();
    if text.is_empty() { Ok(SseLine::Skip) } else { Ok(SseLine::Delta(text)) }
}

#[async_trait]
impl CompletionService for OpenAICompatible {
    #[tracing::instrument(skip_all, fields(model = %self.settings.model))]
    async fn start_conversation(&self, system_prompt: &str) -> Result<(ConversationHandle, String), CompletionError> {
        let opening = ChatTurn::user(system_prompt);
        let greeting = self.generate(std::slice::from_ref(&opening)).await?;
        let handle = ConversationHandle::new(vec![opening, ChatTurn::assistant(greeting.clone())]);
        tracing::debug!(conversation = %handle.id(), "conversation started");
        Ok((handle, greeting))
    }

    async fn send(&self, handle: &ConversationHandle, text: &str) -> Result<TextStream, CompletionError> {
        let user = ChatTurn::user(text);
        let mut turns = handle.history().await;
        turns.push(user.clone());
        let resp = self.post(&self.request_body(&turns, true)).await?;

        let handle = handle.clone();
        let mut bytes = resp.bytes_stream();
        Ok(Box::pin(async_stream::try_stream! {
            let mut buf: Vec<u8> = Vec::new();
            let mut full = String::new();
            let mut saw_done = false;
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(CompletionError::Http)?;
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                    match parse_sse_line(&line)? {
                        SseLine::Delta(text) => {
                            full.push_str(&text);
                            yield text;
                        }
                        SseLine::Done => {
                            saw_done = true;
                            break 'read;
                        }
                        SseLine::Skip => {}
                    }
                }
            }
            if !saw_done {
                // a dropped connection must not be recorded as a finished turn
                Err::<(), _>(CompletionError::Stream("stream ended before [DONE]".into()))?;
            }
            handle.record_exchange(user, ChatTurn::assistant(full)).await;
        }))
    }

    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        self.generate(&[ChatTurn::user(prompt)]).await
    }
}
