//! AI interaction layer for the live coach.
//!
//! This module provides:
//! * [`ChatService`] / [`ChatHandle`]: streaming chat collaborator traits.
//! * [`ApiChatService`]: OpenAI-compatible `/v1/chat/completions` SSE client.
//! * [`PromptBuilder`]: session seed and per-interjection prompts.
//! * [`FeedbackStore`] / [`JsonFeedbackStore`]: interaction log and
//!   similar-fix recall.
//! * [`RetryPolicy`]: bounded exponential backoff with jitter.
//! * [`InteractionPipeline`]: recall, prompt, stream with retry, log.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use live_coach::config::CoachConfig;
//! use live_coach::llm::{
//!     ApiChatService, ChatService, InteractionPipeline, JsonFeedbackStore, RetryPolicy,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CoachConfig::default();
//!     let service = ApiChatService::from_config(&config.llm);
//!     let chat = service.start("You are a training coach.").await.unwrap();
//!
//!     let pipeline = InteractionPipeline::new(
//!         Arc::new(JsonFeedbackStore::in_memory()),
//!         RetryPolicy::from_config(&config.retry),
//!     );
//!     # let request: live_coach::llm::InteractionRequest = unimplemented!();
//!     let reply = pipeline
//!         .run(chat.as_ref(), &request, |_| {})
//!         .await
//!         .unwrap();
//!     println!("{}", reply.text);
//! }
//! ```

pub mod chat;
pub mod feedback;
pub mod pipeline;
pub mod prompt;
pub mod retry;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use chat::{ApiChatService, ChatError, ChatHandle, ChatService, TokenStream};
pub use feedback::{
    FeedbackEntry, FeedbackError, FeedbackOutcome, FeedbackStore, InteractionLog,
    JsonFeedbackStore, LogId, RankedFix,
};
pub use pipeline::{InteractionPipeline, InteractionReply, PipelineError, PipelineProgress};
pub use prompt::{InterjectionKind, InteractionRequest, PromptBuilder};
pub use retry::RetryPolicy;
