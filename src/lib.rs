//! Live coach: a camera-and-voice training coach.
//!
//! The coach watches the trainee's workstation through a vision detector,
//! listens for spoken commands, and interjects with hints, corrections and
//! answers generated by a streaming chat model.  Progress, score and coach
//! events are persisted per session so training can resume.
//!
//! * [`catalog`]: training modules, step needs and item matching.
//! * [`signals`]: detection snapshots and transcript parsing.
//! * [`llm`]: chat client, prompts, feedback memory and retry pipeline.
//! * [`session`]: durable session records and write coalescing.
//! * [`coach`]: the state machine and the runtime that drives it.
//! * [`config`]: settings file and data paths.

pub mod catalog;
pub mod coach;
pub mod config;
pub mod llm;
pub mod session;
pub mod signals;
