//! Speech adapter: transcript events and voice command extraction.
//!
//! The recognizer collaborator streams `(transcript_so_far, is_final)`
//! events.  Interim events are ignored; a final event becomes a
//! [`VoiceCommand`] when it either
//!
//! * is one of the configured advance phrases (`"done"`, `"next"` …), or
//! * contains the wake phrase followed by a non-empty utterance.

use crate::config::VoiceConfig;

/// One recognizer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// A command extracted from speech.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCommand {
    /// Free-form question spoken after the wake phrase.
    Query(String),
    /// Explicit request to advance to the next step.
    AdvanceStep,
}

/// Extracts [`VoiceCommand`]s from final transcripts.
///
/// # Example
/// ```rust
/// use live_coach::config::VoiceConfig;
/// use live_coach::signals::{CommandParser, TranscriptEvent, VoiceCommand};
///
/// let parser = CommandParser::new(&VoiceConfig::default());
/// let cmd = parser.parse(&TranscriptEvent::final_text("Hey coach, where does the knife go?"));
/// assert_eq!(cmd, Some(VoiceCommand::Query("where does the knife go?".into())));
/// ```
#[derive(Debug, Clone)]
pub struct CommandParser {
    wake_phrase: String,
    advance_phrases: Vec<String>,
}

impl CommandParser {
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            wake_phrase: simplify(&config.wake_phrase),
            advance_phrases: config.advance_phrases.iter().map(|p| simplify(p)).collect(),
        }
    }

    pub fn parse(&self, event: &TranscriptEvent) -> Option<VoiceCommand> {
        if !event.is_final {
            return None;
        }

        let spoken = simplify(&event.text);
        if self.is_advance(&spoken) {
            return Some(VoiceCommand::AdvanceStep);
        }

        if self.wake_phrase.is_empty() {
            return None;
        }

        // Match on the lowercased text rather than the simplified one so the
        // question keeps its punctuation.
        let lowered = event.text.to_lowercase();
        let start = find_phrase(&lowered, &self.wake_phrase)?;
        let rest = lowered[start..]
            .trim_start_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
        if rest.is_empty() {
            return None;
        }

        if self.is_advance(&simplify(rest)) {
            return Some(VoiceCommand::AdvanceStep);
        }
        Some(VoiceCommand::Query(rest.to_string()))
    }

    fn is_advance(&self, simplified: &str) -> bool {
        self.advance_phrases.iter().any(|p| p == simplified)
    }
}

/// Lowercase, drop punctuation, collapse whitespace.
fn simplify(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Byte offset in `lowered` just past the words of `phrase`, tolerating
/// punctuation between them ("hey, coach").  Every word must stand on its
/// own: "they coached" does not contain "hey coach".
fn find_phrase(lowered: &str, phrase: &str) -> Option<usize> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let first = *words.first()?;

    let mut search_from = 0;
    while let Some(pos) = lowered[search_from..].find(first) {
        let begin = search_from + pos;
        if starts_word(lowered, begin) {
            if let Some(end) = match_words_at(lowered, begin, &words) {
                return Some(end);
            }
        }
        search_from = begin + first.len();
    }
    None
}

/// `true` when no alphanumeric character precedes byte offset `at`.
fn starts_word(text: &str, at: usize) -> bool {
    text[..at]
        .chars()
        .next_back()
        .map_or(true, |c| !c.is_alphanumeric())
}

/// `true` when no alphanumeric character follows byte offset `at`.
fn ends_word(text: &str, at: usize) -> bool {
    text[at..]
        .chars()
        .next()
        .map_or(true, |c| !c.is_alphanumeric())
}

fn match_words_at(lowered: &str, begin: usize, words: &[&str]) -> Option<usize> {
    let mut cursor = begin;
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            let skipped = lowered[cursor..]
                .find(|c: char| c.is_alphanumeric())
                .unwrap_or(lowered.len() - cursor);
            cursor += skipped;
        }
        if !lowered[cursor..].starts_with(word) {
            return None;
        }
        cursor += word.len();
        if !ends_word(lowered, cursor) {
            return None;
        }
    }
    Some(cursor)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
