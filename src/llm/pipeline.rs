//! AI interaction pipeline: recall → prompt → streamed chat with retry → log.
//!
//! ```text
//! InteractionRequest
//!   └─▶ feedback.find_similar_fixes + past_feedback   (failures = no recall)
//!         └─▶ PromptBuilder::build
//!               └─▶ chat.send ─▶ tokens ─▶ on_progress(Token)
//!                     ├─ transient error → on_progress(Retrying) → sleep → send again
//!                     ├─ permanent error → PipelineError::Permanent
//!                     └─ Ok(text) → chat.record_reply + feedback.log_interaction
//! ```
//!
//! The pipeline knows nothing about the interjection lock or coach status;
//! the state machine decides when it may run.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;

use crate::llm::chat::{ChatError, ChatHandle};
use crate::llm::feedback::{FeedbackStore, InteractionLog, LogId};
use crate::llm::prompt::{InteractionRequest, PromptBuilder};
use crate::llm::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A finished interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionReply {
    pub text: String,
    /// `None` when the feedback log could not be written.
    pub log_id: Option<LogId>,
}

/// Observable progress while a reply streams in.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineProgress {
    /// One more chunk of the current attempt's reply.
    Token(String),
    /// The current attempt failed transiently; partial text is void.
    Retrying { attempt: u32, delay: Duration },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("chat service still failing after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: ChatError },

    #[error("chat request rejected: {0}")]
    Permanent(ChatError),
}

impl PipelineError {
    /// What the trainee sees and hears instead of a reply.
    pub fn fallback_message(&self) -> &'static str {
        match self {
            PipelineError::Exhausted { .. } => {
                "The coach is busy right now. Keep going, I will be back in a moment."
            }
            PipelineError::Permanent(_) => {
                "Sorry, I could not come up with an answer. Keep going with the current step."
            }
        }
    }
}

// ---------------------------------------------------------------------------
// InteractionPipeline
// ---------------------------------------------------------------------------

pub struct InteractionPipeline {
    feedback: Arc<dyn FeedbackStore>,
    prompts: PromptBuilder,
    retry: RetryPolicy,
}

impl InteractionPipeline {
    pub fn new(feedback: Arc<dyn FeedbackStore>, retry: RetryPolicy) -> Self {
        Self {
            feedback,
            prompts: PromptBuilder::new(),
            retry,
        }
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    pub fn feedback(&self) -> Arc<dyn FeedbackStore> {
        Arc::clone(&self.feedback)
    }

    /// Run one interaction to completion.
    pub async fn run<F>(
        &self,
        chat: &dyn ChatHandle,
        request: &InteractionRequest,
        mut on_progress: F,
    ) -> Result<InteractionReply, PipelineError>
    where
        F: FnMut(PipelineProgress) + Send,
    {
        let prompt = self.compose(request).await;

        let mut retries = 0u32;
        let text = loop {
            match self.attempt(chat, &prompt, &mut on_progress).await {
                Ok(text) => break text,
                Err(e) if e.is_transient() && retries < self.retry.max_retries => {
                    let delay = self.retry.delay_for(retries, e.retry_after());
                    retries += 1;
                    log::warn!(
                        "pipeline: {} attempt failed ({e}); retry {retries}/{} in {delay:?}",
                        request.kind.as_str(),
                        self.retry.max_retries
                    );
                    on_progress(PipelineProgress::Retrying {
                        attempt: retries,
                        delay,
                    });
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(PipelineError::Exhausted {
                        attempts: retries + 1,
                        source: e,
                    });
                }
                Err(e) => return Err(PipelineError::Permanent(e)),
            }
        };

        chat.record_reply(&prompt, &text);

        let log = InteractionLog {
            module_id: request.module_id.clone(),
            step_index: request.step_index,
            kind: request.kind,
            utterance: request.utterance.clone(),
            prompt,
            response: text.clone(),
        };
        let log_id = match self.feedback.log_interaction(log).await {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("pipeline: could not log interaction: {e}");
                None
            }
        };

        Ok(InteractionReply { text, log_id })
    }

    async fn compose(&self, request: &InteractionRequest) -> String {
        let query = request.recall_query();
        let fixes = self
            .feedback
            .find_similar_fixes(&request.module_id, request.step_index, &query)
            .await
            .unwrap_or_else(|e| {
                log::warn!("pipeline: similar-fix recall failed: {e}");
                Vec::new()
            });
        let past = self
            .feedback
            .past_feedback(&request.module_id, request.step_index)
            .await
            .unwrap_or_else(|e| {
                log::warn!("pipeline: past-feedback recall failed: {e}");
                Vec::new()
            });
        self.prompts.build(request, &fixes, &past)
    }

    async fn attempt<F>(
        &self,
        chat: &dyn ChatHandle,
        prompt: &str,
        on_progress: &mut F,
    ) -> Result<String, ChatError>
    where
        F: FnMut(PipelineProgress) + Send,
    {
        let mut stream = chat.send(prompt).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            text.push_str(&chunk);
            on_progress(PipelineProgress::Token(chunk));
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ChatError::EmptyResponse);
        }
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
