//! Signal adapters over the vision detector and speech recognizer.
//!
//! Both collaborators are normalised into two value streams the coach
//! consumes:
//!
//! ```text
//! FrameSource ─▶ VisionDetector::detect (blocking pool, every poll tick)
//!                   └─▶ Vec<DetectedObject>  ──▶ coach snapshot channel
//!
//! recognizer ─▶ TranscriptEvent { text, is_final } ──▶ coach transcript channel
//!                   └─▶ CommandParser::parse ─▶ VoiceCommand (final events only)
//! ```

pub mod speech;
pub mod vision;

use thiserror::Error;

pub use speech::{CommandParser, TranscriptEvent, VoiceCommand};
pub use vision::{
    BoundingBox, DetectedObject, Frame, FrameSource, VisionDetector, VisionPoller,
};

/// Failures reported by signal collaborators.
#[derive(Debug, Clone, Error)]
pub enum SignalError {
    /// The detector model could not be loaded or started.
    #[error("vision detector unavailable: {0}")]
    VisionUnavailable(String),

    /// The camera produced no usable frames.
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
}
