//! The live coach: state machine, need checker and async runtime.
//!
//! ```text
//!  Detections / Voice / Control / task results
//!            │
//!            ▼
//!  CoachMachine::handle(CoachEvent) ──▶ Vec<Effect>
//!            │                              │
//!            ▼                              ▼
//!        CoachView                 LiveCoach runtime executes:
//!  (SharedView, refreshed           timers, pipeline runs, speech,
//!   after every event)              module loads, session writes
//! ```
//!
//! [`CoachMachine`] is synchronous and owns every rule (lock, generations,
//! scoring, branching).  [`LiveCoach`] owns the I/O and feeds results back
//! as events.

pub mod machine;
pub mod needs;
pub mod outputs;
pub mod runtime;
pub mod state;

pub use machine::{CoachEvent, CoachMachine, Effect};
pub use needs::{NeedCheck, NeedVerdict};
pub use outputs::{
    ConsoleSynthesizer, LogNotifier, Notifier, SpeechError, SpeechSynthesizer, VoiceProfile,
};
pub use runtime::{CoachDeps, ControlCommand, LiveCoach, SessionSummary};
pub use state::{
    new_shared_view, score_percent, ArmedTimer, CoachSession, CoachStatus, CoachView,
    LockHolder, LockPurpose, SharedView, SuspendedModule, TimerKind,
};
