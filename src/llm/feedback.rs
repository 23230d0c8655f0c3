//! Feedback/similarity store: interaction log plus similar-fix recall.
//!
//! Every successful coach interaction is logged with its prompt and
//! response.  When a step is later completed the log entry is marked
//! `resolved`; those resolved entries become the "fixes that worked" the
//! prompt builder recalls for other trainees on the same step.
//!
//! [`JsonFeedbackStore`] keeps the log in memory and (optionally) persists
//! it as JSON after every mutation so recall survives restarts.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::prompt::InterjectionKind;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("feedback log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("feedback log encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unknown feedback log id {0}")]
    UnknownLog(u64),

    #[error("feedback store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogId(pub u64);

/// What happened after an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOutcome {
    /// The trainee completed the step afterwards.
    Resolved,
    /// The trainee still needed help (the hint escalated).
    Unresolved,
}

/// One logged interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionLog {
    pub module_id: String,
    pub step_index: usize,
    pub kind: InterjectionKind,
    pub utterance: Option<String>,
    pub prompt: String,
    pub response: String,
}

/// A past response that resolved the same step, with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFix {
    pub text: String,
    pub score: f32,
}

/// A past interaction on this step whose outcome is known.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEntry {
    pub kind: InterjectionKind,
    pub response: String,
    pub outcome: FeedbackOutcome,
}

// ---------------------------------------------------------------------------
// FeedbackStore trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Resolved responses for `(module, step)`, most similar to `query` first.
    async fn find_similar_fixes(
        &self,
        module_id: &str,
        step_index: usize,
        query: &str,
    ) -> Result<Vec<RankedFix>, FeedbackError>;

    /// Interactions on `(module, step)` with a recorded outcome, newest first.
    async fn past_feedback(
        &self,
        module_id: &str,
        step_index: usize,
    ) -> Result<Vec<FeedbackEntry>, FeedbackError>;

    async fn log_interaction(&self, log: InteractionLog) -> Result<LogId, FeedbackError>;

    async fn update_feedback(
        &self,
        id: LogId,
        outcome: FeedbackOutcome,
    ) -> Result<(), FeedbackError>;
}

// ---------------------------------------------------------------------------
// JsonFeedbackStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredInteraction {
    id: u64,
    timestamp: u64,
    log: InteractionLog,
    outcome: Option<FeedbackOutcome>,
}

pub struct JsonFeedbackStore {
    entries: Mutex<Vec<StoredInteraction>>,
    path: Option<PathBuf>,
}

impl JsonFeedbackStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Load the log from `path`, or start empty when the file does not exist
    /// or cannot be parsed.
    pub fn load_from(path: PathBuf) -> Self {
        let entries = if path.exists() {
            let data = std::fs::read_to_string(&path).unwrap_or_default();
            serde_json::from_str(&data).unwrap_or_else(|e| {
                log::warn!("feedback: ignoring unreadable log {}: {e}", path.display());
                Vec::new()
            })
        } else {
            Vec::new()
        };
        Self {
            entries: Mutex::new(entries),
            path: Some(path),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outcome recorded for `id`, if any.
    pub fn outcome_of(&self, id: LogId) -> Option<FeedbackOutcome> {
        self.entries
            .lock()
            .ok()?
            .iter()
            .find(|e| e.id == id.0)
            .and_then(|e| e.outcome)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<StoredInteraction>>, FeedbackError> {
        self.entries
            .lock()
            .map_err(|e| FeedbackError::Unavailable(e.to_string()))
    }

    fn persist(&self, entries: &[StoredInteraction]) -> Result<(), FeedbackError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}

#[async_trait]
impl FeedbackStore for JsonFeedbackStore {
    async fn find_similar_fixes(
        &self,
        module_id: &str,
        step_index: usize,
        query: &str,
    ) -> Result<Vec<RankedFix>, FeedbackError> {
        let entries = self.lock()?;
        let mut fixes: Vec<(RankedFix, u64)> = entries
            .iter()
            .filter(|e| {
                e.log.module_id == module_id
                    && e.log.step_index == step_index
                    && e.outcome == Some(FeedbackOutcome::Resolved)
            })
            .map(|e| {
                let haystack = match &e.log.utterance {
                    Some(u) => format!("{u} {}", e.log.response),
                    None => e.log.response.clone(),
                };
                (
                    RankedFix {
                        text: e.log.response.clone(),
                        score: similarity(query, &haystack),
                    },
                    e.timestamp,
                )
            })
            .collect();

        // Most similar first; newer wins ties.
        fixes.sort_by(|(a, ta), (b, tb)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(tb.cmp(ta))
        });
        Ok(fixes.into_iter().map(|(fix, _)| fix).collect())
    }

    async fn past_feedback(
        &self,
        module_id: &str,
        step_index: usize,
    ) -> Result<Vec<FeedbackEntry>, FeedbackError> {
        let entries = self.lock()?;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.log.module_id == module_id && e.log.step_index == step_index)
            .filter_map(|e| {
                e.outcome.map(|outcome| FeedbackEntry {
                    kind: e.log.kind,
                    response: e.log.response.clone(),
                    outcome,
                })
            })
            .collect())
    }

    async fn log_interaction(&self, log: InteractionLog) -> Result<LogId, FeedbackError> {
        let mut entries = self.lock()?;
        let id = entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        entries.push(StoredInteraction {
            id,
            timestamp: now_millis(),
            log,
            outcome: None,
        });
        self.persist(&entries)?;
        Ok(LogId(id))
    }

    async fn update_feedback(
        &self,
        id: LogId,
        outcome: FeedbackOutcome,
    ) -> Result<(), FeedbackError> {
        let mut entries = self.lock()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id.0)
            .ok_or(FeedbackError::UnknownLog(id.0))?;
        entry.outcome = Some(outcome);
        self.persist(&entries)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Jaccard overlap of the word sets of `a` and `b` (words of three or more
/// characters, case-insensitive).  Returns 0.0 when either side is empty.
pub fn similarity(a: &str, b: &str) -> f32 {
    let wa = words(a);
    let wb = words(b);
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let common = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    common as f32 / union as f32
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_string)
        .collect()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
