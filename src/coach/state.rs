//! Coach status, in-memory session and the shared view.
//!
//! [`CoachStatus`] is the status slot of the state machine.  [`CoachSession`]
//! is the in-memory source of truth for one live session; the durable
//! [`SessionRecord`](crate::session::SessionRecord) is reconciled to it.
//!
//! [`SharedView`] is a type alias for `Arc<Mutex<CoachView>>`; the runtime
//! refreshes it after every transition so a front-end can render it.

use std::sync::{Arc, Mutex};

use crate::catalog::{CoachModule, Step};
use crate::llm::InterjectionKind;

// ---------------------------------------------------------------------------
// CoachStatus
// ---------------------------------------------------------------------------

/// States of the coach.
///
/// ```text
/// Initializing ──ready──▶ Listening ⇄ { Thinking, Hinting, Correcting,
///                                        Tutoring, Branching }
///                                          ──result──▶ Speaking ──done──▶ Listening
/// Initializing ──chat failed──▶ Idle
/// last step advanced ──▶ Completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoachStatus {
    #[default]
    Initializing,
    Listening,
    /// A trainee query is being answered.
    Thinking,
    Hinting,
    Correcting,
    /// Escalated hint wording.
    Tutoring,
    /// A remedial module is loading.
    Branching,
    Speaking,
    /// Unrecoverable initialization failure.
    Idle,
    Completed,
}

impl CoachStatus {
    /// `true` while an AI interaction or branch load holds the lock.
    ///
    /// ```
    /// use live_coach::coach::CoachStatus;
    ///
    /// assert!(CoachStatus::Hinting.is_interjecting());
    /// assert!(CoachStatus::Branching.is_interjecting());
    /// assert!(!CoachStatus::Speaking.is_interjecting());
    /// assert!(!CoachStatus::Listening.is_interjecting());
    /// ```
    pub fn is_interjecting(&self) -> bool {
        matches!(
            self,
            CoachStatus::Thinking
                | CoachStatus::Hinting
                | CoachStatus::Correcting
                | CoachStatus::Tutoring
                | CoachStatus::Branching
        )
    }

    /// Whether a step advance is accepted in this status.
    pub fn accepts_step_advance(&self) -> bool {
        !matches!(
            self,
            CoachStatus::Initializing | CoachStatus::Idle | CoachStatus::Completed
        )
    }

    /// Status slot used while an interjection of `kind` is in flight.
    pub fn for_interjection(kind: InterjectionKind) -> Self {
        match kind {
            InterjectionKind::Hint => CoachStatus::Hinting,
            InterjectionKind::Correction => CoachStatus::Correcting,
            InterjectionKind::Query => CoachStatus::Thinking,
            InterjectionKind::Tutoring => CoachStatus::Tutoring,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CoachStatus::Initializing => "Starting",
            CoachStatus::Listening => "Listening",
            CoachStatus::Thinking => "Thinking",
            CoachStatus::Hinting => "Hint",
            CoachStatus::Correcting => "Correcting",
            CoachStatus::Tutoring => "Tutoring",
            CoachStatus::Branching => "Branching",
            CoachStatus::Speaking => "Speaking",
            CoachStatus::Idle => "Offline",
            CoachStatus::Completed => "Completed",
        }
    }
}

// ---------------------------------------------------------------------------
// Lock and timers
// ---------------------------------------------------------------------------

/// What currently holds the interjection lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockPurpose {
    Interjection(InterjectionKind),
    Branch {
        module_id: String,
        trigger_item: String,
    },
}

/// The interjection lock, tagged with the generation of the work holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub generation: u64,
    pub purpose: LockPurpose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Hint,
    Completion,
}

/// The single armed timer.  At most one exists at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimer {
    pub kind: TimerKind,
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// CoachSession
// ---------------------------------------------------------------------------

/// The primary flow, suspended while a remedial branch is active.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendedModule {
    pub module: Arc<CoachModule>,
    pub step_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoachSession {
    pub status: CoachStatus,
    pub current_step_index: usize,
    pub score: i32,
    /// Module driving instruction: the primary module or a remedial branch.
    pub active_module: Arc<CoachModule>,
    /// `Some` only while branched; depth never exceeds one.
    pub main_module_state: Option<SuspendedModule>,
}

impl CoachSession {
    pub fn new(module: Arc<CoachModule>, score: i32) -> Self {
        Self {
            status: CoachStatus::Initializing,
            current_step_index: 0,
            score,
            active_module: module,
            main_module_state: None,
        }
    }

    pub fn is_branched(&self) -> bool {
        self.main_module_state.is_some()
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.active_module.step(self.current_step_index)
    }

    /// Id of the primary module, branched or not.
    pub fn primary_module_id(&self) -> &str {
        match &self.main_module_state {
            Some(suspended) => &suspended.module.id,
            None => &self.active_module.id,
        }
    }
}

/// Display percentage of `score` against `initial`, clamped to `0..=100`.
///
/// ```
/// use live_coach::coach::score_percent;
///
/// assert_eq!(score_percent(85, 100), 85);
/// assert_eq!(score_percent(-20, 100), 0);
/// assert_eq!(score_percent(120, 100), 100);
/// ```
pub fn score_percent(score: i32, initial: i32) -> u8 {
    if initial <= 0 {
        return 0;
    }
    let pct = i64::from(score) * 100 / i64::from(initial);
    pct.clamp(0, 100) as u8
}

// ---------------------------------------------------------------------------
// CoachView / SharedView
// ---------------------------------------------------------------------------

/// Everything a front-end needs to render the live session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoachView {
    pub status: CoachStatus,
    pub module_id: String,
    pub module_title: String,
    pub step_index: usize,
    pub step_count: usize,
    pub step_title: String,
    pub instruction: String,
    pub branched: bool,
    pub score: i32,
    pub score_percent: u8,
    /// Reply text streamed so far for the in-flight interaction.
    pub partial_response: String,
    /// The last finished reply (or fallback message).
    pub last_response: Option<String>,
    /// Latest user-visible error, cleared on the next successful transition.
    pub error_message: Option<String>,
    /// Number of coach events logged this session.
    pub event_count: usize,
}

/// Thread-safe handle to [`CoachView`].
///
/// Do not hold the lock across `.await` points.
pub type SharedView = Arc<Mutex<CoachView>>;

pub fn new_shared_view() -> SharedView {
    Arc::new(Mutex::new(CoachView::default()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
