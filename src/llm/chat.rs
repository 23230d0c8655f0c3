//! Streaming chat collaborator and the OpenAI-compatible implementation.
//!
//! [`ApiChatService`] talks to any `/v1/chat/completions` endpoint that
//! supports `"stream": true` (Ollama in OpenAI mode, OpenAI, Groq, LM Studio,
//! vLLM …).  All connection details come from [`LlmConfig`]; nothing is
//! hardcoded.
//!
//! Each coaching session owns one [`ChatHandle`] seeded with the module
//! outline; the handle keeps a short rolling history so follow-up questions
//! have context.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use thiserror::Error;

use crate::config::LlmConfig;

/// Turns (user + assistant pairs) kept after the seed message.
const MAX_HISTORY_TURNS: usize = 6;

// ---------------------------------------------------------------------------
// ChatError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// HTTP 429; `retry_after` carries the server's hint when present.
    #[error("rate limited by chat service")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 5xx.
    #[error("chat service error (HTTP {status})")]
    Server { status: u16 },

    /// Any other non-success status (bad request, auth failure …).
    #[error("chat request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Transport or connection failure.
    #[error("chat request failed: {0}")]
    Request(String),

    #[error("chat request timed out")]
    Timeout,

    /// The streamed body could not be decoded.
    #[error("malformed chat stream: {0}")]
    Stream(String),

    #[error("chat service returned an empty response")]
    EmptyResponse,

    /// The session handle could not be created.
    #[error("chat service unavailable: {0}")]
    Unavailable(String),
}

impl ChatError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChatError::RateLimited { .. }
                | ChatError::Server { .. }
                | ChatError::Request(_)
                | ChatError::Timeout
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ChatError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: String) -> Self {
        match status {
            429 => ChatError::RateLimited { retry_after },
            500..=599 => ChatError::Server { status },
            _ => ChatError::Rejected {
                status,
                message: body,
            },
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatError::Timeout
        } else {
            ChatError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Streamed response text, chunk by chunk.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// One persistent chat conversation.
#[async_trait]
pub trait ChatHandle: Send + Sync {
    async fn send(&self, prompt: &str) -> Result<TokenStream, ChatError>;

    /// Remember a completed exchange so later prompts see it.
    fn record_reply(&self, _prompt: &str, _reply: &str) {}
}

/// Opens chat conversations.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Open a conversation seeded with `seed` as its system context.
    async fn start(&self, seed: &str) -> Result<Arc<dyn ChatHandle>, ChatError>;
}

// ---------------------------------------------------------------------------
// ApiChatService
// ---------------------------------------------------------------------------

pub struct ApiChatService {
    client: reqwest::Client,
    config: LlmConfig,
}

impl ApiChatService {
    /// Build the service from config.  The HTTP client carries the
    /// per-request timeout; a default client is the last-resort fallback
    /// if the builder fails.
    pub fn from_config(config: &LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl ChatService for ApiChatService {
    async fn start(&self, seed: &str) -> Result<Arc<dyn ChatHandle>, ChatError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        reqwest::Url::parse(&url)
            .map_err(|e| ChatError::Unavailable(format!("invalid base_url: {e}")))?;
        if self.config.model.trim().is_empty() {
            return Err(ChatError::Unavailable("no model configured".into()));
        }

        Ok(Arc::new(ApiChatHandle {
            client: self.client.clone(),
            config: self.config.clone(),
            url,
            seed: seed.to_string(),
            history: Mutex::new(VecDeque::new()),
        }))
    }
}

struct ApiChatHandle {
    client: reqwest::Client,
    config: LlmConfig,
    url: String,
    seed: String,
    history: Mutex<VecDeque<(String, String)>>,
}

impl ApiChatHandle {
    fn messages(&self, prompt: &str) -> Vec<serde_json::Value> {
        let mut messages = vec![serde_json::json!({ "role": "system", "content": self.seed })];
        if let Ok(history) = self.history.lock() {
            for (user, assistant) in history.iter() {
                messages.push(serde_json::json!({ "role": "user", "content": user }));
                messages.push(serde_json::json!({ "role": "assistant", "content": assistant }));
            }
        }
        messages.push(serde_json::json!({ "role": "user", "content": prompt }));
        messages
    }
}

#[async_trait]
impl ChatHandle for ApiChatHandle {
    /// POST the prompt with `"stream": true` and decode the SSE body.
    ///
    /// The `Authorization: Bearer …` header is attached only when
    /// `config.api_key` is a non-empty string.
    async fn send(&self, prompt: &str) -> Result<TokenStream, ChatError> {
        let body = serde_json::json!({
            "model":       self.config.model,
            "messages":    self.messages(prompt),
            "stream":      true,
            "temperature": self.config.temperature,
            "max_tokens":  self.config.max_tokens
        });

        let mut req = self.client.post(&self.url).json(&body);
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::from_status(status.as_u16(), retry_after, text));
        }

        let bytes = Box::pin(response.bytes_stream());
        let stream = futures_util::stream::unfold(
            (bytes, SseDecoder::default(), VecDeque::new(), false),
            |(mut bytes, mut decoder, mut queue, mut done)| async move {
                loop {
                    if let Some(item) = queue.pop_front() {
                        return Some((item, (bytes, decoder, queue, done)));
                    }
                    if done {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            for event in decoder.push(&chunk) {
                                match event {
                                    SseEvent::Token(token) => queue.push_back(Ok(token)),
                                    SseEvent::Done => {
                                        done = true;
                                        break;
                                    }
                                    SseEvent::Error(e) => {
                                        queue.push_back(Err(e));
                                        done = true;
                                        break;
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            queue.push_back(Err(ChatError::from(e)));
                            done = true;
                        }
                        None => done = true,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    fn record_reply(&self, prompt: &str, reply: &str) {
        if let Ok(mut history) = self.history.lock() {
            history.push_back((prompt.to_string(), reply.to_string()));
            while history.len() > MAX_HISTORY_TURNS {
                history.pop_front();
            }
        }
    }
}

/// `Retry-After` in delta-seconds form.  HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<f64>().ok().filter(|s| *s >= 0.0).map(Duration::from_secs_f64)
}

// ---------------------------------------------------------------------------
// SseDecoder
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum SseEvent {
    Token(String),
    Done,
    Error(ChatError),
}

/// Incremental decoder for OpenAI-style `data: {...}` server-sent events.
///
/// Bytes are buffered until a full line is available, so chunk boundaries
/// may fall anywhere (including inside a multi-byte character).
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }

            match serde_json::from_str::<serde_json::Value>(payload) {
                Ok(json) => {
                    if let Some(message) = json["error"]["message"].as_str() {
                        events.push(SseEvent::Error(ChatError::Stream(message.to_string())));
                        continue;
                    }
                    if let Some(token) = json["choices"][0]["delta"]["content"].as_str() {
                        if !token.is_empty() {
                            events.push(SseEvent::Token(token.to_string()));
                        }
                    }
                }
                Err(e) => events.push(SseEvent::Error(ChatError::Stream(e.to_string()))),
            }
        }

        events
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(events: &[SseEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                SseEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn decodes_tokens_and_done() {
        let mut d = SseDecoder::default();
        let events = d.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Grab \"}}]}\n\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"the reader.\"}}]}\n\n\
              data: [DONE]\n\n",
        );
        assert_eq!(tokens(&events), vec!["Grab ", "the reader."]);
        assert!(matches!(events.last(), Some(SseEvent::Done)));
    }

    #[test]
    fn buffers_partial_lines_across_chunks() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"choices\":[{\"delta\":{\"con").is_empty());
        let events = d.push(b"tent\":\"hi\"}}]}\n");
        assert_eq!(tokens(&events), vec!["hi"]);
    }

    #[test]
    fn split_multibyte_character_survives() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n".as_bytes();
        let split = line.len() - 7; // inside the two-byte é
        let mut d = SseDecoder::default();
        assert!(d.push(&line[..split]).is_empty());
        let events = d.push(&line[split..]);
        assert_eq!(tokens(&events), vec!["caf\u{e9}"]);
    }

    #[test]
    fn ignores_comments_and_role_only_deltas() {
        let mut d = SseDecoder::default();
        let events = d.push(b": keep-alive\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n");
        assert!(events.is_empty());
    }

    #[test]
    fn error_payload_becomes_stream_error() {
        let mut d = SseDecoder::default();
        let events = d.push(b"data: {\"error\":{\"message\":\"model overloaded\"}}\n");
        assert!(matches!(&events[0], SseEvent::Error(ChatError::Stream(m)) if m == "model overloaded"));
    }

    #[test]
    fn status_mapping_and_transience() {
        let limited = ChatError::from_status(429, Some(Duration::from_secs(2)), String::new());
        assert!(limited.is_transient());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));

        assert!(ChatError::from_status(503, None, String::new()).is_transient());

        let bad = ChatError::from_status(401, None, "bad key".into());
        assert!(!bad.is_transient());
        assert!(bad.to_string().contains("bad key"));
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn start_rejects_invalid_base_url() {
        let config = LlmConfig {
            base_url: "not a url".into(),
            ..LlmConfig::default()
        };
        let service = ApiChatService::from_config(&config);
        assert!(matches!(
            service.start("seed").await,
            Err(ChatError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn start_builds_handle_for_valid_config() {
        let service = ApiChatService::from_config(&LlmConfig::default());
        let handle = service.start("seed").await.expect("handle");
        handle.record_reply("q", "a");
    }

    #[test]
    fn history_is_bounded() {
        let handle = ApiChatHandle {
            client: reqwest::Client::new(),
            config: LlmConfig::default(),
            url: "http://localhost/v1/chat/completions".into(),
            seed: "seed".into(),
            history: Mutex::new(VecDeque::new()),
        };
        for i in 0..10 {
            handle.record_reply(&format!("q{i}"), &format!("a{i}"));
        }
        let messages = handle.messages("now");
        // seed + 6 turns * 2 + prompt
        assert_eq!(messages.len(), 1 + MAX_HISTORY_TURNS * 2 + 1);
        assert_eq!(messages[1]["content"], "q4");
    }
}
