//! Output collaborators: the speech synthesizer and the notice sink.
//!
//! The console implementations back the `live-coach` binary; a real
//! deployment plugs in a TTS engine and a toast UI behind the same traits.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;

use crate::config::VoiceConfig;

// ---------------------------------------------------------------------------
// SpeechSynthesizer
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech synthesizer unavailable: {0}")]
    Unavailable(String),

    /// `cancel()` stopped the utterance.
    #[error("utterance interrupted")]
    Interrupted,
}

/// Voice selection passed with every utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceProfile {
    pub name: String,
    /// Speaking rate multiplier; `1.0` is normal speed.
    pub rate: f32,
}

impl VoiceProfile {
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self {
            name: config.voice.clone(),
            rate: config.rate,
        }
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `text`, resolving once the utterance ends or is cancelled.
    async fn speak(&self, text: &str, voice: &VoiceProfile) -> Result<(), SpeechError>;

    /// Stop any in-progress utterance immediately.
    fn cancel(&self);
}

// Compile-time assertion: Box<dyn SpeechSynthesizer> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn SpeechSynthesizer>) {}
};

/// Prints utterances to stdout and "speaks" for roughly as long as a person
/// would take to say them.
///
/// `cancel()` bumps `epoch`; an utterance ends as soon as the epoch it
/// started under is gone.
pub struct ConsoleSynthesizer {
    per_word: Duration,
    epoch: AtomicU64,
    cancelled: Notify,
}

impl ConsoleSynthesizer {
    pub fn new() -> Self {
        Self::with_pace(Duration::from_millis(280))
    }

    pub fn with_pace(per_word: Duration) -> Self {
        Self {
            per_word,
            epoch: AtomicU64::new(0),
            cancelled: Notify::new(),
        }
    }

    fn duration_of(&self, text: &str, voice: &VoiceProfile) -> Duration {
        let words = text.split_whitespace().count() as u32;
        let rate = if voice.rate > 0.0 { voice.rate } else { 1.0 };
        self.per_word.saturating_mul(words).div_f32(rate)
    }
}

impl Default for ConsoleSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for ConsoleSynthesizer {
    async fn speak(&self, text: &str, voice: &VoiceProfile) -> Result<(), SpeechError> {
        if text.trim().is_empty() {
            return Ok(());
        }

        // Register for cancellation before anything is printed so a cancel
        // racing the start of the utterance is not missed.
        let started = self.epoch.load(Ordering::SeqCst);
        let cancelled = self.cancelled.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();
        if self.epoch.load(Ordering::SeqCst) != started {
            return Err(SpeechError::Interrupted);
        }

        {
            let mut out = std::io::stdout().lock();
            writeln!(out, "coach ({}): {text}", voice.name)
                .map_err(|e| SpeechError::Unavailable(e.to_string()))?;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.duration_of(text, voice)) => Ok(()),
            _ = cancelled => Err(SpeechError::Interrupted),
        }
    }

    fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancelled.notify_waiters();
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Sink for short user-visible notices (errors, fallbacks).
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Writes notices to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        log::warn!("notice: {message}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
