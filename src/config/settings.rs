//! Coach settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every numeric constant the orchestrator uses (timer delays, score
//! penalties, retry bounds) lives here rather than in the state machine.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// LlmConfig
// ---------------------------------------------------------------------------

/// Connection settings for the streaming chat service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible endpoint.
    ///
    /// - Ollama default: `http://localhost:11434`
    /// - OpenAI: `https://api.openai.com`
    pub base_url: String,
    /// API key; `None` for local providers.
    pub api_key: Option<String>,
    /// Model identifier sent to the API (e.g. `"qwen2.5:7b"`, `"gpt-4o-mini"`).
    pub model: String,
    /// Sampling temperature (0.0 – 1.0).
    pub temperature: f32,
    /// Maximum seconds to wait for a whole streamed response.
    pub timeout_secs: u64,
    /// Upper bound on generated tokens per interjection.
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            api_key: None,
            model: "qwen2.5:7b".into(),
            temperature: 0.4,
            timeout_secs: 30,
            max_tokens: 220,
        }
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

/// Bounded retry policy for transient chat failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (so `3` means up to four sends).
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every further retry.
    pub base_delay_ms: u64,
    /// Ceiling applied to both computed delays and server `retry-after` hints.
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter added to computed delays.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 16_000,
            jitter_ms: 250,
        }
    }
}

// ---------------------------------------------------------------------------
// TimingConfig
// ---------------------------------------------------------------------------

/// Timer delays driving the proactive need checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How long required items may stay missing before a hint fires.
    pub hint_delay_ms: u64,
    /// How long all required items must stay visible before auto-advance.
    pub completion_delay_ms: u64,
    /// Vision polling interval.
    pub vision_poll_ms: u64,
}

impl TimingConfig {
    pub fn hint_delay(&self) -> Duration {
        Duration::from_millis(self.hint_delay_ms)
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }

    pub fn vision_poll(&self) -> Duration {
        Duration::from_millis(self.vision_poll_ms.max(1))
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            hint_delay_ms: 7_000,
            completion_delay_ms: 3_000,
            vision_poll_ms: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// ScoringConfig
// ---------------------------------------------------------------------------

/// Score bookkeeping.  Penalties are subtracted from `initial`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub initial: i32,
    /// Applied for hints and escalated tutoring.
    pub hint_penalty: i32,
    pub correction_penalty: i32,
    pub branch_penalty: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            initial: 100,
            hint_penalty: 5,
            correction_penalty: 5,
            branch_penalty: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceConfig
// ---------------------------------------------------------------------------

/// Voice command recognition and synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Prefix a trainee must say before a free-form question.
    pub wake_phrase: String,
    /// Whole-utterance phrases that advance the current step.
    pub advance_phrases: Vec<String>,
    /// Voice name handed to the synthesizer.
    pub voice: String,
    /// Speaking rate multiplier handed to the synthesizer.
    pub rate: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            wake_phrase: "hey coach".into(),
            advance_phrases: vec!["done".into(), "next".into(), "next step".into()],
            voice: "default".into(),
            rate: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// CoachConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use live_coach::config::CoachConfig;
///
/// // Load (returns Default when file is missing)
/// let config = CoachConfig::load().unwrap();
/// assert_eq!(config.scoring.initial, 100);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub timing: TimingConfig,
    pub scoring: ScoringConfig,
    pub voice: VoiceConfig,
}

impl CoachConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(CoachConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
