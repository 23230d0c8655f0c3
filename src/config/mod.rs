//! Configuration module for the live coach.
//!
//! Provides `CoachConfig` (top-level settings), sub-configs for each
//! subsystem, `AppPaths` for cross-platform data directories, and TOML
//! persistence via `CoachConfig::load` / `CoachConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    CoachConfig, LlmConfig, RetryConfig, ScoringConfig, TimingConfig, VoiceConfig,
};
