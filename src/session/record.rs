//! Durable session record, partial updates and the coach event log.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SessionToken
// ---------------------------------------------------------------------------

/// Identifies one trainee's run through a module.
///
/// A fresh token is generated for a new session; a resumed session reuses
/// the token handed back by the caller (e.g. from a URL query parameter).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Resume an existing token.  Returns `None` for tokens that are empty or
    /// contain characters outside `[A-Za-z0-9_-]`.
    pub fn resume(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// LiveCoachEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Hint,
    Correction,
    Tutoring,
    StepAdvance,
}

/// Append-only record of coach interventions and step advances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveCoachEvent {
    pub event_type: EventType,
    pub step_index: usize,
    /// Module the step belongs to (primary or remedial).
    #[serde(default)]
    pub module_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl LiveCoachEvent {
    pub fn now(event_type: EventType, module_id: &str, step_index: usize) -> Self {
        Self {
            event_type,
            step_index,
            module_id: module_id.to_string(),
            timestamp: now_millis(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// SessionRecord / SessionUpdate
// ---------------------------------------------------------------------------

/// What survives a page reload or a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub current_step_index: usize,
    pub score: i32,
    #[serde(default)]
    pub live_coach_events: Vec<LiveCoachEvent>,
    #[serde(default)]
    pub is_completed: bool,
}

impl SessionRecord {
    /// Overwrite only the fields present in `update`.
    pub fn apply(&mut self, update: &SessionUpdate) {
        if let Some(step) = update.current_step_index {
            self.current_step_index = step;
        }
        if let Some(score) = update.score {
            self.score = score;
        }
        if let Some(events) = &update.live_coach_events {
            self.live_coach_events = events.clone();
        }
        if let Some(done) = update.is_completed {
            self.is_completed = done;
        }
    }
}

/// A partial write: `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_coach_events: Option<Vec<LiveCoachEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self.current_step_index.is_none()
            && self.score.is_none()
            && self.live_coach_events.is_none()
            && self.is_completed.is_none()
    }

    /// Fold `newer` on top of `self`; fields present in `newer` win.
    pub fn merge(&mut self, newer: SessionUpdate) {
        if newer.current_step_index.is_some() {
            self.current_step_index = newer.current_step_index;
        }
        if newer.score.is_some() {
            self.score = newer.score;
        }
        if newer.live_coach_events.is_some() {
            self.live_coach_events = newer.live_coach_events;
        }
        if newer.is_completed.is_some() {
            self.is_completed = newer.is_completed;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_leaves_missing_fields_untouched() {
        let mut record = SessionRecord {
            current_step_index: 2,
            score: 90,
            live_coach_events: vec![LiveCoachEvent::now(EventType::Hint, "m", 1)],
            is_completed: false,
        };
        record.apply(&SessionUpdate {
            score: Some(85),
            ..Default::default()
        });

        assert_eq!(record.current_step_index, 2);
        assert_eq!(record.score, 85);
        assert_eq!(record.live_coach_events.len(), 1);
    }

    #[test]
    fn merge_prefers_newer_fields() {
        let mut older = SessionUpdate {
            current_step_index: Some(1),
            score: Some(95),
            ..Default::default()
        };
        older.merge(SessionUpdate {
            score: Some(90),
            is_completed: Some(true),
            ..Default::default()
        });

        assert_eq!(older.current_step_index, Some(1));
        assert_eq!(older.score, Some(90));
        assert_eq!(older.is_completed, Some(true));
    }

    #[test]
    fn empty_update_is_detected() {
        assert!(SessionUpdate::default().is_empty());
        assert!(!SessionUpdate {
            is_completed: Some(false),
            ..Default::default()
        }
        .is_empty());
    }

    #[test]
    fn token_validation() {
        assert!(SessionToken::resume("abc-123_X").is_some());
        assert!(SessionToken::resume("").is_none());
        assert!(SessionToken::resume("../etc/passwd").is_none());
        let fresh = SessionToken::generate();
        assert!(SessionToken::resume(fresh.as_str()).is_some());
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_string(&EventType::StepAdvance).unwrap();
        assert_eq!(json, "\"step_advance\"");
    }
}
