//! The coach state machine: one transition function, `(state, event) →
//! (state', effects)`.
//!
//! [`CoachMachine::handle`] is the only place a live session mutates.  It
//! never performs I/O; it returns [`Effect`]s for the runtime to execute and
//! expects the results back as further [`CoachEvent`]s.
//!
//! # Supersession
//!
//! Every piece of dispatched work (interjection, branch load, timer,
//! utterance) is tagged with a fresh generation from one counter.  The
//! machine remembers the generation of the lock holder, the armed timer and
//! the current utterance; a result whose generation does not match is stale
//! and ignored.  Superseding work is therefore just forgetting its
//! generation.
//!
//! # Flow
//!
//! ```text
//! Detections ─▶ NeedCheck ─▶ ArmTimer / DisarmTimers
//!                        └─▶ Correcting ─▶ RunInteraction
//!                        └─▶ Branching  ─▶ LoadModule
//! TimerFired(Hint)       ─▶ Hinting | Tutoring ─▶ RunInteraction
//! TimerFired(Completion) ─▶ step advance
//! Voice(Query)           ─▶ supersede ─▶ Thinking ─▶ RunInteraction
//! InterjectionFinished   ─▶ score/event ─▶ Speaking ─▶ Speak
//! SpeechFinished         ─▶ Listening
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{CatalogError, CoachModule, ItemMatcher};
use crate::coach::needs::{forbidden_in_view, missing_items, NeedCheck, NeedVerdict};
use crate::coach::state::{
    score_percent, ArmedTimer, CoachSession, CoachStatus, CoachView, LockHolder, LockPurpose,
    SuspendedModule, TimerKind,
};
use crate::config::{CoachConfig, ScoringConfig, TimingConfig};
use crate::llm::{
    ChatError, FeedbackOutcome, InteractionReply, InteractionRequest, InterjectionKind, LogId,
    PipelineError,
};
use crate::session::{EventType, LiveCoachEvent, SessionRecord, SessionUpdate};
use crate::signals::{DetectedObject, SignalError, VoiceCommand};

// ---------------------------------------------------------------------------
// Events and effects
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum CoachEvent {
    /// Collaborator start-up finished.
    Initialized {
        vision: Result<(), SignalError>,
        chat: Result<(), ChatError>,
    },
    /// A new detection snapshot replaced the previous one.
    Detections(Vec<DetectedObject>),
    Voice(VoiceCommand),
    /// Click-equivalent step advance.
    AdvanceRequested,
    TimerFired { kind: TimerKind, generation: u64 },
    InterjectionToken { generation: u64, token: String },
    /// The interaction is retrying; partial text is void.
    InterjectionRetrying { generation: u64 },
    InterjectionFinished {
        generation: u64,
        result: Result<InteractionReply, PipelineError>,
    },
    BranchLoaded {
        generation: u64,
        result: Result<CoachModule, CatalogError>,
    },
    SpeechFinished { generation: u64 },
    Leave,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start timer `kind`, replacing whichever timer is running.
    ArmTimer {
        kind: TimerKind,
        generation: u64,
        delay: Duration,
    },
    DisarmTimers,
    RunInteraction {
        generation: u64,
        request: InteractionRequest,
    },
    LoadModule { generation: u64, module_id: String },
    Speak { generation: u64, text: String },
    CancelSpeech,
    Persist(SessionUpdate),
    RecordOutcome { log_id: LogId, outcome: FeedbackOutcome },
    /// User-visible message (error or fallback).
    Notify(String),
    EndSession { farewell: Option<String> },
}

// ---------------------------------------------------------------------------
// CoachMachine
// ---------------------------------------------------------------------------

pub struct CoachMachine {
    session: CoachSession,
    matcher: ItemMatcher,
    timing: TimingConfig,
    scoring: ScoringConfig,

    generation: u64,
    lock: Option<LockHolder>,
    armed: Option<ArmedTimer>,
    speaking: Option<u64>,
    vision_ready: bool,

    snapshot: Vec<DetectedObject>,
    /// Forbidden items already corrected on the current step.
    acknowledged: HashSet<String>,
    events: Vec<LiveCoachEvent>,
    /// Last logged interaction per `(module, step)`.
    last_log: HashMap<(String, usize), (LogId, InterjectionKind)>,

    partial_response: String,
    last_response: Option<String>,
    error_message: Option<String>,
}

impl CoachMachine {
    /// Build a machine for `module`, hydrated from `record` when resuming.
    ///
    /// The stored step index is clamped to the module; a completed record
    /// starts in [`CoachStatus::Completed`].
    pub fn new(
        module: Arc<CoachModule>,
        matcher: ItemMatcher,
        config: &CoachConfig,
        record: Option<SessionRecord>,
    ) -> Self {
        let mut session = CoachSession::new(module, config.scoring.initial);
        let mut events = Vec::new();

        if let Some(record) = record {
            let last = session.active_module.steps.len().saturating_sub(1);
            session.current_step_index = record.current_step_index.min(last);
            session.score = record.score;
            if record.is_completed {
                session.status = CoachStatus::Completed;
            }
            events = record.live_coach_events;
        }

        Self {
            session,
            matcher,
            timing: config.timing.clone(),
            scoring: config.scoring.clone(),
            generation: 0,
            lock: None,
            armed: None,
            speaking: None,
            vision_ready: false,
            snapshot: Vec::new(),
            acknowledged: HashSet::new(),
            events,
            last_log: HashMap::new(),
            partial_response: String::new(),
            last_response: None,
            error_message: None,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn session(&self) -> &CoachSession {
        &self.session
    }

    pub fn status(&self) -> CoachStatus {
        self.session.status
    }

    pub fn lock(&self) -> Option<&LockHolder> {
        self.lock.as_ref()
    }

    pub fn armed_timer(&self) -> Option<ArmedTimer> {
        self.armed
    }

    pub fn events(&self) -> &[LiveCoachEvent] {
        &self.events
    }

    pub fn score_percent(&self) -> u8 {
        score_percent(self.session.score, self.scoring.initial)
    }

    /// Snapshot for rendering.
    pub fn view(&self) -> CoachView {
        let module = &self.session.active_module;
        let step = self.session.current_step();
        CoachView {
            status: self.session.status,
            module_id: module.id.clone(),
            module_title: module.title.clone(),
            step_index: self.session.current_step_index,
            step_count: module.steps.len(),
            step_title: step.map(|s| s.title.clone()).unwrap_or_default(),
            instruction: step.map(|s| s.instruction.clone()).unwrap_or_default(),
            branched: self.session.is_branched(),
            score: self.session.score,
            score_percent: self.score_percent(),
            partial_response: self.partial_response.clone(),
            last_response: self.last_response.clone(),
            error_message: self.error_message.clone(),
            event_count: self.events.len(),
        }
    }

    // -----------------------------------------------------------------------
    // Transition function
    // -----------------------------------------------------------------------

    pub fn handle(&mut self, event: CoachEvent) -> Vec<Effect> {
        let mut fx = Vec::new();
        match event {
            CoachEvent::Initialized { vision, chat } => self.on_initialized(vision, chat, &mut fx),
            CoachEvent::Detections(snapshot) => self.on_detections(snapshot, &mut fx),
            CoachEvent::Voice(VoiceCommand::Query(text)) => self.on_query(text, &mut fx),
            CoachEvent::Voice(VoiceCommand::AdvanceStep) | CoachEvent::AdvanceRequested => {
                if self.session.status.accepts_step_advance() {
                    self.advance_step(&mut fx);
                }
            }
            CoachEvent::TimerFired { kind, generation } => {
                self.on_timer(kind, generation, &mut fx)
            }
            CoachEvent::InterjectionToken { generation, token } => {
                if self.holds_lock(generation) {
                    self.partial_response.push_str(&token);
                }
            }
            CoachEvent::InterjectionRetrying { generation } => {
                if self.holds_lock(generation) {
                    self.partial_response.clear();
                }
            }
            CoachEvent::InterjectionFinished { generation, result } => {
                self.on_interjection_finished(generation, result, &mut fx)
            }
            CoachEvent::BranchLoaded { generation, result } => {
                self.on_branch_loaded(generation, result, &mut fx)
            }
            CoachEvent::SpeechFinished { generation } => {
                if self.speaking == Some(generation) {
                    self.speaking = None;
                    if self.session.status == CoachStatus::Speaking {
                        self.session.status = CoachStatus::Listening;
                    }
                }
            }
            CoachEvent::Leave => {
                self.supersede(&mut fx);
                fx.push(Effect::EndSession { farewell: None });
            }
        }
        fx
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    fn on_initialized(
        &mut self,
        vision: Result<(), SignalError>,
        chat: Result<(), ChatError>,
        fx: &mut Vec<Effect>,
    ) {
        if self.session.status != CoachStatus::Initializing {
            return;
        }
        if let Err(e) = chat {
            log::error!("coach: chat session failed to start: {e}");
            let message = format!("The coach is offline: {e}");
            self.session.status = CoachStatus::Idle;
            self.error_message = Some(message.clone());
            fx.push(Effect::Notify(message));
            return;
        }
        match vision {
            Ok(()) => self.vision_ready = true,
            Err(e) => log::warn!("coach: vision unavailable, proactive checks disabled: {e}"),
        }
        self.session.status = CoachStatus::Listening;
    }

    fn on_detections(&mut self, snapshot: Vec<DetectedObject>, fx: &mut Vec<Effect>) {
        self.snapshot = snapshot;

        let needs = self.session.active_module.needs(self.session.current_step_index);
        if !self.acknowledged.is_empty() {
            let in_view = forbidden_in_view(needs, &self.snapshot, &self.matcher);
            self.acknowledged.retain(|item| in_view.contains(item));
        }

        if !self.vision_ready
            || self.session.status != CoachStatus::Listening
            || self.lock.is_some()
        {
            return;
        }

        let verdict = NeedCheck {
            needs,
            detections: &self.snapshot,
            matcher: &self.matcher,
            armed: self.armed.map(|t| t.kind),
            branched: self.session.is_branched(),
            acknowledged: &self.acknowledged,
        }
        .evaluate();

        match verdict {
            NeedVerdict::Forbidden {
                item,
                branch_to: Some(module_id),
            } => {
                self.disarm(fx);
                self.start_branch(module_id, item, fx);
            }
            NeedVerdict::Forbidden {
                item,
                branch_to: None,
            } => {
                self.disarm(fx);
                self.acknowledged.insert(item.clone());
                self.start_interjection(InterjectionKind::Correction, Some(item), None, fx);
            }
            NeedVerdict::ArmHint => self.arm(TimerKind::Hint, self.timing.hint_delay(), fx),
            NeedVerdict::ArmCompletion => {
                self.arm(TimerKind::Completion, self.timing.completion_delay(), fx)
            }
            NeedVerdict::Hold => {}
            NeedVerdict::DisarmAll => self.disarm(fx),
        }
    }

    fn on_query(&mut self, text: String, fx: &mut Vec<Effect>) {
        if !self.session.status.accepts_step_advance() {
            return;
        }
        self.supersede(fx);
        self.start_interjection(InterjectionKind::Query, None, Some(text), fx);
    }

    fn on_timer(&mut self, kind: TimerKind, generation: u64, fx: &mut Vec<Effect>) {
        if self.armed != Some(ArmedTimer { kind, generation }) {
            log::debug!("coach: ignoring stale {kind:?} timer #{generation}");
            return;
        }
        self.armed = None;
        if self.session.status != CoachStatus::Listening || self.lock.is_some() {
            return;
        }

        match kind {
            TimerKind::Hint => {
                let module_id = self.session.active_module.id.clone();
                let step = self.session.current_step_index;
                let escalate = self.has_event(EventType::Hint, &module_id, step);
                let kind = if escalate {
                    if let Some((log_id, prior)) = self.last_log.get(&(module_id.clone(), step)) {
                        if matches!(prior, InterjectionKind::Hint | InterjectionKind::Tutoring) {
                            fx.push(Effect::RecordOutcome {
                                log_id: *log_id,
                                outcome: FeedbackOutcome::Unresolved,
                            });
                            self.last_log.remove(&(module_id, step));
                        }
                    }
                    InterjectionKind::Tutoring
                } else {
                    InterjectionKind::Hint
                };
                self.start_interjection(kind, None, None, fx);
            }
            TimerKind::Completion => self.advance_step(fx),
        }
    }

    fn on_interjection_finished(
        &mut self,
        generation: u64,
        result: Result<InteractionReply, PipelineError>,
        fx: &mut Vec<Effect>,
    ) {
        let kind = match &self.lock {
            Some(LockHolder {
                generation: held,
                purpose: LockPurpose::Interjection(kind),
            }) if *held == generation => *kind,
            _ => {
                log::debug!("coach: discarding superseded interaction #{generation}");
                return;
            }
        };
        self.lock = None;
        self.partial_response.clear();

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("coach: {} failed: {e}", kind.as_str());
                let message = e.fallback_message().to_string();
                self.session.status = CoachStatus::Listening;
                self.last_response = Some(message.clone());
                self.error_message = Some(e.to_string());
                fx.push(Effect::Notify(message));
                return;
            }
        };

        let module_id = self.session.active_module.id.clone();
        let step = self.session.current_step_index;
        let scored = match kind {
            InterjectionKind::Hint => Some((EventType::Hint, self.scoring.hint_penalty)),
            InterjectionKind::Tutoring => Some((EventType::Tutoring, self.scoring.hint_penalty)),
            InterjectionKind::Correction => {
                Some((EventType::Correction, self.scoring.correction_penalty))
            }
            InterjectionKind::Query => None,
        };
        if let Some((event_type, penalty)) = scored {
            self.session.score -= penalty;
            self.events
                .push(LiveCoachEvent::now(event_type, &module_id, step));
            fx.push(Effect::Persist(SessionUpdate {
                score: Some(self.session.score),
                live_coach_events: Some(self.events.clone()),
                ..Default::default()
            }));
        }
        if let Some(log_id) = reply.log_id {
            self.last_log.insert((module_id, step), (log_id, kind));
        }

        self.error_message = None;
        self.last_response = Some(reply.text.clone());
        self.speak(reply.text, fx);
    }

    fn on_branch_loaded(
        &mut self,
        generation: u64,
        result: Result<CoachModule, CatalogError>,
        fx: &mut Vec<Effect>,
    ) {
        let (module_id, trigger_item) = match &self.lock {
            Some(LockHolder {
                generation: held,
                purpose:
                    LockPurpose::Branch {
                        module_id,
                        trigger_item,
                    },
            }) if *held == generation => (module_id.clone(), trigger_item.clone()),
            _ => {
                log::debug!("coach: discarding superseded branch load #{generation}");
                return;
            }
        };
        self.lock = None;

        let module = match result {
            Ok(module) if !module.steps.is_empty() && !self.session.is_branched() => module,
            Ok(_) => {
                self.abort_branch(&module_id, "the module has no steps".into(), fx);
                return;
            }
            Err(e) => {
                self.abort_branch(&module_id, e.to_string(), fx);
                return;
            }
        };

        log::info!(
            "coach: branching from {} step {} into {}",
            self.session.active_module.id,
            self.session.current_step_index,
            module.id
        );
        let suspended = SuspendedModule {
            module: Arc::clone(&self.session.active_module),
            step_index: self.session.current_step_index,
        };
        let intro = format!(
            "Let's pause {}. Because of the {trigger_item}, we need to review {} first. {}",
            suspended.module.title,
            module.title,
            step_line(&module, 0)
        );

        self.session.main_module_state = Some(suspended);
        self.session.active_module = Arc::new(module);
        self.session.current_step_index = 0;
        self.session.score -= self.scoring.branch_penalty;
        self.acknowledged.clear();
        self.error_message = None;

        fx.push(Effect::Persist(SessionUpdate {
            score: Some(self.session.score),
            ..Default::default()
        }));
        self.last_response = Some(intro.clone());
        self.speak(intro, fx);
    }

    // -----------------------------------------------------------------------
    // Step advance and branching
    // -----------------------------------------------------------------------

    fn advance_step(&mut self, fx: &mut Vec<Effect>) {
        self.supersede(fx);
        self.acknowledged.clear();

        let module_id = self.session.active_module.id.clone();
        let step = self.session.current_step_index;
        self.events
            .push(LiveCoachEvent::now(EventType::StepAdvance, &module_id, step));
        if let Some((log_id, _)) = self.last_log.remove(&(module_id, step)) {
            fx.push(Effect::RecordOutcome {
                log_id,
                outcome: FeedbackOutcome::Resolved,
            });
        }

        let on_last = self.session.active_module.is_last_step(step);
        match (self.session.main_module_state.take(), on_last) {
            (Some(suspended), true) => self.end_branch(suspended, fx),
            (Some(suspended), false) => {
                self.session.main_module_state = Some(suspended);
                self.session.current_step_index = step + 1;
                fx.push(Effect::Persist(SessionUpdate {
                    score: Some(self.session.score),
                    live_coach_events: Some(self.events.clone()),
                    ..Default::default()
                }));
                let line = step_line(&self.session.active_module, step + 1);
                self.speak(line, fx);
            }
            (None, true) => {
                log::info!(
                    "coach: {} completed with score {}",
                    self.session.active_module.id,
                    self.session.score
                );
                self.session.status = CoachStatus::Completed;
                fx.push(Effect::Persist(SessionUpdate {
                    current_step_index: Some(step),
                    score: Some(self.session.score),
                    live_coach_events: Some(self.events.clone()),
                    is_completed: Some(true),
                }));
                fx.push(Effect::EndSession {
                    farewell: Some(format!(
                        "That was the last step. Well done, your score is {} percent.",
                        self.score_percent()
                    )),
                });
            }
            (None, false) => {
                self.session.current_step_index = step + 1;
                fx.push(Effect::Persist(SessionUpdate {
                    current_step_index: Some(step + 1),
                    score: Some(self.session.score),
                    live_coach_events: Some(self.events.clone()),
                    ..Default::default()
                }));
                let line = step_line(&self.session.active_module, step + 1);
                self.speak(line, fx);
            }
        }
    }

    fn start_branch(&mut self, module_id: String, trigger_item: String, fx: &mut Vec<Effect>) {
        if self.session.is_branched() {
            return;
        }
        self.generation += 1;
        self.lock = Some(LockHolder {
            generation: self.generation,
            purpose: LockPurpose::Branch {
                module_id: module_id.clone(),
                trigger_item,
            },
        });
        self.session.status = CoachStatus::Branching;
        fx.push(Effect::LoadModule {
            generation: self.generation,
            module_id,
        });
    }

    fn abort_branch(&mut self, module_id: &str, reason: String, fx: &mut Vec<Effect>) {
        log::warn!("coach: cannot branch into {module_id}: {reason}");
        let message = format!("Could not open the review module {module_id}.");
        self.session.status = CoachStatus::Listening;
        self.error_message = Some(format!("{message} {reason}"));
        fx.push(Effect::Notify(message));
    }

    fn end_branch(&mut self, suspended: SuspendedModule, fx: &mut Vec<Effect>) {
        log::info!(
            "coach: branch {} finished, resuming {} step {}",
            self.session.active_module.id,
            suspended.module.id,
            suspended.step_index
        );
        let line = format!(
            "Review finished. Back to {}. {}",
            suspended.module.title,
            step_line(&suspended.module, suspended.step_index)
        );
        self.session.active_module = suspended.module;
        self.session.current_step_index = suspended.step_index;

        fx.push(Effect::Persist(SessionUpdate {
            current_step_index: Some(suspended.step_index),
            score: Some(self.session.score),
            live_coach_events: Some(self.events.clone()),
            ..Default::default()
        }));
        self.speak(line, fx);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn start_interjection(
        &mut self,
        kind: InterjectionKind,
        trigger_item: Option<String>,
        utterance: Option<String>,
        fx: &mut Vec<Effect>,
    ) {
        self.generation += 1;
        self.lock = Some(LockHolder {
            generation: self.generation,
            purpose: LockPurpose::Interjection(kind),
        });
        self.session.status = CoachStatus::for_interjection(kind);
        self.partial_response.clear();

        let request = self.request(kind, trigger_item, utterance);
        fx.push(Effect::RunInteraction {
            generation: self.generation,
            request,
        });
    }

    fn request(
        &self,
        kind: InterjectionKind,
        trigger_item: Option<String>,
        utterance: Option<String>,
    ) -> InteractionRequest {
        let module = &self.session.active_module;
        let index = self.session.current_step_index;
        let step = module.step(index);
        let needs = module.needs(index);
        InteractionRequest {
            kind,
            module_id: module.id.clone(),
            module_title: module.title.clone(),
            step_index: index,
            step_count: module.steps.len(),
            step_title: step.map(|s| s.title.clone()).unwrap_or_default(),
            instruction: step.map(|s| s.instruction.clone()).unwrap_or_default(),
            required: needs.required.clone(),
            missing: missing_items(needs, &self.snapshot, &self.matcher),
            detected: self.snapshot.iter().map(|d| d.label.clone()).collect(),
            trigger_item,
            utterance,
        }
    }

    fn speak(&mut self, text: String, fx: &mut Vec<Effect>) {
        self.generation += 1;
        self.speaking = Some(self.generation);
        self.session.status = CoachStatus::Speaking;
        fx.push(Effect::Speak {
            generation: self.generation,
            text,
        });
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration, fx: &mut Vec<Effect>) {
        self.generation += 1;
        self.armed = Some(ArmedTimer {
            kind,
            generation: self.generation,
        });
        fx.push(Effect::ArmTimer {
            kind,
            generation: self.generation,
            delay,
        });
    }

    fn disarm(&mut self, fx: &mut Vec<Effect>) {
        if self.armed.take().is_some() {
            fx.push(Effect::DisarmTimers);
        }
    }

    /// Forget all in-flight work: lock, timers and the current utterance.
    fn supersede(&mut self, fx: &mut Vec<Effect>) {
        if let Some(holder) = self.lock.take() {
            log::debug!("coach: superseding {:?} #{}", holder.purpose, holder.generation);
        }
        self.disarm(fx);
        if self.speaking.take().is_some() {
            fx.push(Effect::CancelSpeech);
        }
        self.partial_response.clear();
    }

    fn holds_lock(&self, generation: u64) -> bool {
        self.lock.as_ref().map(|l| l.generation) == Some(generation)
    }

    /// Whether an event of `event_type` was logged for `(module, step)`.
    /// Events from records written before events carried a module id
    /// belong to the primary module.
    fn has_event(&self, event_type: EventType, module_id: &str, step: usize) -> bool {
        let primary = self.session.primary_module_id();
        self.events.iter().any(|e| {
            let owner = if e.module_id.is_empty() {
                primary
            } else {
                e.module_id.as_str()
            };
            e.event_type == event_type && e.step_index == step && owner == module_id
        })
    }
}

/// Spoken line introducing step `index` of `module`.
fn step_line(module: &CoachModule, index: usize) -> String {
    match module.step(index) {
        Some(step) => format!("Step {}: {}. {}", index + 1, step.title, step.instruction),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
