//! Live coach runtime: drives a [`CoachMachine`] from real inputs.
//!
//! ```text
//!   vision poll task ──snapshots──┐
//!   recognizer ──transcripts──────┤                       ┌─▶ timers (sleep tasks)
//!   front-end ──ControlCommand────┼─▶ select! ─▶ machine ─┼─▶ pipeline tasks
//!   spawned tasks ──internal──────┘     │                 ├─▶ speech tasks
//!                                       ▼                 ├─▶ session writes
//!                                   SharedView            └─▶ module loads
//! ```
//!
//! The `select!` loop is the only place the machine is touched.  Every
//! spawned task reports back through the internal channel, tagged with the
//! generation the machine handed out.  Leaving the session aborts every
//! task, cancels speech and flushes the session record.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};

use crate::catalog::{CoachModule, ItemMatcher, ModuleSource};
use crate::coach::machine::{CoachEvent, CoachMachine, Effect};
use crate::coach::outputs::{Notifier, SpeechSynthesizer, VoiceProfile};
use crate::coach::state::{CoachStatus, SharedView};
use crate::config::CoachConfig;
use crate::llm::{
    ChatError, ChatHandle, ChatService, FeedbackStore, InteractionPipeline, PipelineError,
    PipelineProgress, RetryPolicy,
};
use crate::session::{PendingWrite, SessionPersistence, SessionStore, SessionToken, StoreError};
use crate::signals::{
    CommandParser, DetectedObject, FrameSource, TranscriptEvent, VisionDetector, VisionPoller,
};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Commands from the front-end (buttons, keyboard).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Click-equivalent of "next step".
    Advance,
    Leave,
}

/// Collaborators one session talks to.
#[derive(Clone)]
pub struct CoachDeps {
    pub modules: Arc<dyn ModuleSource>,
    pub matcher: ItemMatcher,
    pub chat: Arc<dyn ChatService>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub notifier: Arc<dyn Notifier>,
    pub detector: Arc<dyn VisionDetector>,
    pub frames: Arc<dyn FrameSource>,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub token: SessionToken,
    pub module_id: String,
    pub status: CoachStatus,
    pub step_index: usize,
    pub score: i32,
    pub score_percent: u8,
    pub completed: bool,
}

// ---------------------------------------------------------------------------
// LiveCoach
// ---------------------------------------------------------------------------

/// One live coaching session.
///
/// ```rust,no_run
/// # async fn example(deps: live_coach::coach::CoachDeps,
/// #                  module: std::sync::Arc<live_coach::catalog::CoachModule>) {
/// use live_coach::coach::{ControlCommand, LiveCoach};
/// use live_coach::config::CoachConfig;
/// use live_coach::session::SessionToken;
///
/// let coach = LiveCoach::new(CoachConfig::default(), deps, module, SessionToken::generate());
/// let view = coach.view();
///
/// let (_transcript_tx, transcript_rx) = tokio::sync::mpsc::channel(32);
/// let (control_tx, control_rx) = tokio::sync::mpsc::channel(8);
/// let session = tokio::spawn(coach.run(transcript_rx, control_rx));
///
/// control_tx.send(ControlCommand::Leave).await.unwrap();
/// let summary = session.await.unwrap();
/// println!("{} ended at {}%", summary.module_id, summary.score_percent);
/// # let _ = view;
/// # }
/// ```
pub struct LiveCoach {
    config: CoachConfig,
    deps: CoachDeps,
    module: Arc<CoachModule>,
    token: SessionToken,
    view: SharedView,
}

/// Messages from spawned tasks back to the loop.
enum Internal {
    Coach(CoachEvent),
    WriteDone {
        generation: u64,
        result: Result<(), StoreError>,
    },
}

impl LiveCoach {
    pub fn new(
        config: CoachConfig,
        deps: CoachDeps,
        module: Arc<CoachModule>,
        token: SessionToken,
    ) -> Self {
        Self {
            config,
            deps,
            module,
            token,
            view: crate::coach::state::new_shared_view(),
        }
    }

    /// Handle to the view the session keeps current.
    pub fn view(&self) -> SharedView {
        Arc::clone(&self.view)
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Run the session until the trainee leaves, the module is completed
    /// or `control` is closed.
    pub async fn run(
        self,
        mut transcripts: mpsc::Receiver<TranscriptEvent>,
        mut control: mpsc::Receiver<ControlCommand>,
    ) -> SessionSummary {
        let LiveCoach {
            config,
            deps,
            module,
            token,
            view,
        } = self;

        // ── 1. Hydrate ──────────────────────────────────────────────────
        let persistence = SessionPersistence::new(Arc::clone(&deps.sessions), &module.id, token);
        let record = match persistence.load().await {
            Ok(record) => record,
            Err(e) => {
                log::warn!("session: could not load {}: {e}", persistence.token());
                None
            }
        };
        let resumed = record.is_some();
        let machine = CoachMachine::new(
            Arc::clone(&module),
            deps.matcher.clone(),
            &config,
            record,
        );
        log::info!(
            "coach: session {} for {} ({})",
            persistence.token(),
            module.id,
            if resumed { "resumed" } else { "new" }
        );

        let (tx, mut internal) = mpsc::unbounded_channel();
        let pipeline = Arc::new(InteractionPipeline::new(
            Arc::clone(&deps.feedback),
            RetryPolicy::from_config(&config.retry),
        ));
        let mut driver = Driver {
            machine,
            persistence,
            pipeline,
            chat: None,
            voice: VoiceProfile::from_config(&config.voice),
            deps,
            tx,
            tasks: JoinSet::new(),
            timer: None,
            speech: SpeechSlot::default(),
            view,
            ending: None,
        };
        driver.sync_view();

        if driver.machine.status() == CoachStatus::Completed {
            log::info!("coach: session already completed, nothing to do");
            return driver.summary();
        }

        // ── 2. Initialize collaborators ─────────────────────────────────
        let detector = Arc::clone(&driver.deps.detector);
        let vision = match tokio::task::spawn_blocking(move || detector.initialize()).await {
            Ok(result) => result,
            Err(e) => Err(crate::signals::SignalError::VisionUnavailable(e.to_string())),
        };
        let seed = driver.pipeline.prompts().session_seed(&module);
        let chat = match driver.deps.chat.start(&seed).await {
            Ok(handle) => {
                driver.chat = Some(handle);
                Ok(())
            }
            Err(e) => Err(e),
        };

        let (snapshot_tx, mut snapshots) = mpsc::channel::<Vec<DetectedObject>>(4);
        let poller = if vision.is_ok() && chat.is_ok() {
            Some(VisionPoller::start(
                Arc::clone(&driver.deps.detector),
                Arc::clone(&driver.deps.frames),
                config.timing.vision_poll(),
                snapshot_tx,
            ))
        } else {
            drop(snapshot_tx);
            None
        };
        driver.apply(CoachEvent::Initialized { vision, chat });

        // ── 3. Event loop ───────────────────────────────────────────────
        let parser = CommandParser::new(&config.voice);
        let mut transcripts_open = true;
        let mut snapshots_open = poller.is_some();

        while driver.ending.is_none() {
            tokio::select! {
                Some(message) = internal.recv() => match message {
                    Internal::Coach(event) => driver.apply(event),
                    Internal::WriteDone { generation, result } => {
                        if let Some(next) = driver.persistence.complete(generation, result) {
                            driver.spawn_write(next);
                        }
                    }
                },
                command = control.recv() => match command {
                    Some(ControlCommand::Advance) => driver.apply(CoachEvent::AdvanceRequested),
                    Some(ControlCommand::Leave) | None => driver.apply(CoachEvent::Leave),
                },
                event = transcripts.recv(), if transcripts_open => match event {
                    Some(event) => {
                        if let Some(command) = parser.parse(&event) {
                            log::debug!("coach: voice command {command:?}");
                            driver.apply(CoachEvent::Voice(command));
                        }
                    }
                    None => {
                        log::debug!("coach: transcript stream closed");
                        transcripts_open = false;
                    }
                },
                snapshot = snapshots.recv(), if snapshots_open => match snapshot {
                    Some(snapshot) => driver.apply(CoachEvent::Detections(snapshot)),
                    None => snapshots_open = false,
                },
                Some(joined) = driver.tasks.join_next(), if !driver.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            log::error!("coach: background task panicked: {e}");
                        }
                    }
                }
            }
        }

        // ── 4. Teardown ─────────────────────────────────────────────────
        if let Some(poller) = &poller {
            poller.stop();
        }
        let farewell = driver.ending.take().flatten();
        driver.teardown(farewell).await;
        log::info!("coach: session {} closed", driver.persistence.token());
        driver.summary()
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Loop-owned state: the machine plus everything needed to run its effects.
struct Driver {
    machine: CoachMachine,
    persistence: SessionPersistence,
    pipeline: Arc<InteractionPipeline>,
    chat: Option<Arc<dyn ChatHandle>>,
    voice: VoiceProfile,
    deps: CoachDeps,
    tx: mpsc::UnboundedSender<Internal>,
    tasks: JoinSet<()>,
    timer: Option<JoinHandle<()>>,
    speech: SpeechSlot,
    view: SharedView,
    /// `Some(farewell)` once the machine asked to end the session.
    ending: Option<Option<String>>,
}

/// The task speaking the current utterance.
///
/// Cancelling aborts the task as well as the synthesizer, so an utterance
/// whose task has not started yet never plays.
#[derive(Default)]
struct SpeechSlot {
    current: Option<AbortHandle>,
}

impl SpeechSlot {
    fn start(&mut self, handle: AbortHandle) {
        self.current = Some(handle);
    }

    fn cancel(&mut self, synthesizer: &dyn SpeechSynthesizer) {
        if let Some(handle) = self.current.take() {
            handle.abort();
        }
        synthesizer.cancel();
    }
}

impl Driver {
    fn apply(&mut self, event: CoachEvent) {
        let effects = self.machine.handle(event);
        for effect in effects {
            self.execute(effect);
        }
        self.sync_view();
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::ArmTimer {
                kind,
                generation,
                delay,
            } => {
                self.cancel_timer();
                let tx = self.tx.clone();
                self.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::Coach(CoachEvent::TimerFired { kind, generation }));
                }));
            }
            Effect::DisarmTimers => self.cancel_timer(),
            Effect::RunInteraction {
                generation,
                request,
            } => {
                let Some(chat) = self.chat.clone() else {
                    let _ = self.tx.send(Internal::Coach(CoachEvent::InterjectionFinished {
                        generation,
                        result: Err(PipelineError::Permanent(ChatError::Unavailable(
                            "no chat session".into(),
                        ))),
                    }));
                    return;
                };
                let pipeline = Arc::clone(&self.pipeline);
                let tx = self.tx.clone();
                self.tasks.spawn(async move {
                    let progress_tx = tx.clone();
                    let result = pipeline
                        .run(chat.as_ref(), &request, move |progress| {
                            let event = match progress {
                                PipelineProgress::Token(token) => {
                                    CoachEvent::InterjectionToken { generation, token }
                                }
                                PipelineProgress::Retrying { .. } => {
                                    CoachEvent::InterjectionRetrying { generation }
                                }
                            };
                            let _ = progress_tx.send(Internal::Coach(event));
                        })
                        .await;
                    let _ = tx.send(Internal::Coach(CoachEvent::InterjectionFinished {
                        generation,
                        result,
                    }));
                });
            }
            Effect::LoadModule {
                generation,
                module_id,
            } => {
                let modules = Arc::clone(&self.deps.modules);
                let tx = self.tx.clone();
                self.tasks.spawn(async move {
                    let result = modules.load_module(&module_id).await;
                    let _ = tx.send(Internal::Coach(CoachEvent::BranchLoaded { generation, result }));
                });
            }
            Effect::Speak { generation, text } => {
                let synthesizer = Arc::clone(&self.deps.synthesizer);
                let voice = self.voice.clone();
                let tx = self.tx.clone();
                let handle = self.tasks.spawn(async move {
                    if let Err(e) = synthesizer.speak(&text, &voice).await {
                        log::debug!("coach: utterance #{generation} ended early: {e}");
                    }
                    let _ = tx.send(Internal::Coach(CoachEvent::SpeechFinished { generation }));
                });
                self.speech.start(handle);
            }
            Effect::CancelSpeech => self.speech.cancel(self.deps.synthesizer.as_ref()),
            Effect::Persist(update) => {
                if let Some(write) = self.persistence.save(update) {
                    self.spawn_write(write);
                }
            }
            Effect::RecordOutcome { log_id, outcome } => {
                let feedback = Arc::clone(&self.deps.feedback);
                self.tasks.spawn(async move {
                    if let Err(e) = feedback.update_feedback(log_id, outcome).await {
                        log::warn!("coach: could not record {outcome:?} for {log_id:?}: {e}");
                    }
                });
            }
            Effect::Notify(message) => self.deps.notifier.notify(&message),
            Effect::EndSession { farewell } => self.ending = Some(farewell),
        }
    }

    fn spawn_write(&mut self, write: PendingWrite) {
        let store = self.persistence.store();
        let module_id = self.persistence.module_id().to_string();
        let token = self.persistence.token().clone();
        let tx = self.tx.clone();
        self.tasks.spawn(async move {
            let result = store.put(&module_id, &token, &write.update).await;
            let _ = tx.send(Internal::WriteDone {
                generation: write.generation,
                result,
            });
        });
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn sync_view(&self) {
        if let Ok(mut view) = self.view.lock() {
            *view = self.machine.view();
        }
    }

    /// Stop all background work, say goodbye and flush the session record.
    async fn teardown(&mut self, farewell: Option<String>) {
        self.cancel_timer();
        self.speech.cancel(self.deps.synthesizer.as_ref());
        self.tasks.shutdown().await;

        if let Some(text) = farewell {
            if let Err(e) = self.deps.synthesizer.speak(&text, &self.voice).await {
                log::debug!("coach: farewell not spoken: {e}");
            }
        }

        let unflushed = self.persistence.take_unflushed();
        if !unflushed.is_empty() {
            if let Err(e) = self.persistence.write_now(&unflushed).await {
                log::error!("session: final write failed: {e}");
            }
        }
        self.sync_view();
    }

    fn summary(&self) -> SessionSummary {
        let session = self.machine.session();
        SessionSummary {
            token: self.persistence.token().clone(),
            module_id: self.persistence.module_id().to_string(),
            status: session.status,
            step_index: session.current_step_index,
            score: session.score,
            score_percent: self.machine.score_percent(),
            completed: session.status == CoachStatus::Completed,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NeedCatalog;
    use crate::coach::outputs::SpeechError;
    use crate::llm::{JsonFeedbackStore, TokenStream};
    use crate::session::{EventType, MemorySessionStore, SessionRecord};
    use crate::signals::{Frame, SignalError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    // ---- test doubles ---

    struct EchoChat;

    #[async_trait]
    impl ChatHandle for EchoChat {
        async fn send(&self, prompt: &str) -> Result<TokenStream, ChatError> {
            let reply = if prompt.contains("asked you a question") {
                "Answer from coach."
            } else {
                "Hint from coach."
            };
            let chunks: Vec<Result<String, ChatError>> = reply
                .split_inclusive(' ')
                .map(|s| Ok(s.to_string()))
                .collect();
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
    }

    struct FakeChatService {
        fail: bool,
    }

    #[async_trait]
    impl ChatService for FakeChatService {
        async fn start(&self, _seed: &str) -> Result<Arc<dyn ChatHandle>, ChatError> {
            if self.fail {
                Err(ChatError::Unavailable("no model".into()))
            } else {
                Ok(Arc::new(EchoChat))
            }
        }
    }

    #[derive(Default)]
    struct RecordingSynth {
        spoken: Mutex<Vec<String>>,
        cancels: AtomicUsize,
    }

    impl RecordingSynth {
        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }

        fn cancels(&self) -> usize {
            self.cancels.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynth {
        async fn speak(&self, text: &str, _voice: &VoiceProfile) -> Result<(), SpeechError> {
            self.spoken.lock().unwrap().push(text.to_string());
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) {
            self.notices.lock().unwrap().push(message.to_string());
        }
    }

    /// Camera whose visible labels the test sets directly.
    #[derive(Default)]
    struct Scene {
        labels: Mutex<Vec<String>>,
    }

    impl Scene {
        fn show(&self, labels: &[&str]) {
            *self.labels.lock().unwrap() = labels.iter().map(|s| s.to_string()).collect();
        }
    }

    impl FrameSource for Scene {
        fn capture(&self) -> Option<Frame> {
            Some(Frame {
                width: 1,
                height: 1,
                data: vec![0],
            })
        }
    }

    impl VisionDetector for Scene {
        fn initialize(&self) -> Result<(), SignalError> {
            Ok(())
        }

        fn detect(&self, _frame: &Frame) -> Vec<DetectedObject> {
            self.labels
                .lock()
                .unwrap()
                .iter()
                .map(DetectedObject::labelled)
                .collect()
        }
    }

    const CATALOG: &str = r#"{
        "modules": [
            {
                "id": "food-prep",
                "title": "Food prep",
                "steps": [
                    { "title": "Scan badge", "instruction": "Scan your badge",
                      "needs": { "required": ["reader"] } },
                    { "title": "Plate", "instruction": "Plate the salad" }
                ]
            }
        ]
    }"#;

    struct Harness {
        synth: Arc<RecordingSynth>,
        notifier: Arc<RecordingNotifier>,
        scene: Arc<Scene>,
        store: Arc<MemorySessionStore>,
        feedback: Arc<JsonFeedbackStore>,
        token: SessionToken,
        module: Arc<CoachModule>,
        deps: CoachDeps,
    }

    fn harness(chat_fails: bool) -> Harness {
        let catalog = Arc::new(NeedCatalog::from_json(CATALOG).unwrap());
        let module = Arc::new(catalog.module("food-prep").unwrap().clone());
        let synth = Arc::new(RecordingSynth::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let scene = Arc::new(Scene::default());
        let store = Arc::new(MemorySessionStore::new());
        let feedback = Arc::new(JsonFeedbackStore::in_memory());
        let deps = CoachDeps {
            modules: catalog.clone(),
            matcher: catalog.matcher().clone(),
            chat: Arc::new(FakeChatService { fail: chat_fails }),
            feedback: feedback.clone(),
            sessions: store.clone(),
            synthesizer: synth.clone(),
            notifier: notifier.clone(),
            detector: scene.clone(),
            frames: scene.clone(),
        };
        Harness {
            synth,
            notifier,
            scene,
            store,
            feedback,
            token: SessionToken::resume("test-session").unwrap(),
            module,
            deps,
        }
    }

    fn fast_config() -> CoachConfig {
        let mut config = CoachConfig::default();
        config.timing.hint_delay_ms = 50;
        config.timing.completion_delay_ms = 30;
        config.timing.vision_poll_ms = 10;
        config.retry.base_delay_ms = 1;
        config.retry.jitter_ms = 0;
        config
    }

    struct Running {
        view: SharedView,
        transcripts: mpsc::Sender<TranscriptEvent>,
        control: mpsc::Sender<ControlCommand>,
        session: JoinHandle<SessionSummary>,
    }

    fn start(h: &Harness) -> Running {
        let coach = LiveCoach::new(
            fast_config(),
            h.deps.clone(),
            Arc::clone(&h.module),
            h.token.clone(),
        );
        let view = coach.view();
        let (transcripts, transcript_rx) = mpsc::channel(8);
        let (control, control_rx) = mpsc::channel(8);
        let session = tokio::spawn(coach.run(transcript_rx, control_rx));
        Running {
            view,
            transcripts,
            control,
            session,
        }
    }

    async fn wait_until(what: &str, cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    async fn leave(run: Running) -> SessionSummary {
        run.control.send(ControlCommand::Leave).await.unwrap();
        tokio::time::timeout(Duration::from_secs(3), run.session)
            .await
            .expect("session ended")
            .expect("session task joined")
    }

    // ---- tests ---

    #[tokio::test]
    async fn missing_item_triggers_a_spoken_hint() {
        let h = harness(false);
        let run = start(&h);

        let synth = Arc::clone(&h.synth);
        wait_until("hint spoken", || {
            synth.spoken().iter().any(|s| s == "Hint from coach.")
        })
        .await;
        let summary = leave(run).await;

        let record = h.store.snapshot("food-prep", &h.token).expect("record written");
        let hints = record
            .live_coach_events
            .iter()
            .filter(|e| e.event_type == EventType::Hint)
            .count();
        assert_eq!(hints, 1);
        assert!(summary.score <= 95);
        assert!(!h.feedback.is_empty());
    }

    #[tokio::test]
    async fn required_items_in_view_advance_the_step() {
        let h = harness(false);
        h.scene.show(&["badge reader"]);
        let run = start(&h);

        let view = Arc::clone(&run.view);
        wait_until("step advanced", || view.lock().unwrap().step_index == 1).await;
        let synth = Arc::clone(&h.synth);
        wait_until("next step announced", || {
            synth.spoken().iter().any(|s| s.starts_with("Step 2: Plate"))
        })
        .await;
        let summary = leave(run).await;

        assert_eq!(summary.step_index, 1);
        let record = h.store.snapshot("food-prep", &h.token).unwrap();
        assert_eq!(record.current_step_index, 1);
        assert!(!record.is_completed);
    }

    #[tokio::test]
    async fn voice_query_is_answered() {
        let h = harness(false);
        h.scene.show(&["badge reader"]);
        let run = start(&h);

        run.transcripts
            .send(TranscriptEvent::interim("hey coach where"))
            .await
            .unwrap();
        run.transcripts
            .send(TranscriptEvent::final_text("Hey coach, where is the reader?"))
            .await
            .unwrap();

        let synth = Arc::clone(&h.synth);
        wait_until("answer spoken", || {
            synth.spoken().iter().any(|s| s == "Answer from coach.")
        })
        .await;
        let view = Arc::clone(&run.view);
        wait_until("last response shown", || {
            view.lock().unwrap().last_response.is_some()
        })
        .await;
        let summary = leave(run).await;
        assert_eq!(summary.score, 100, "queries are free");
    }

    #[tokio::test]
    async fn chat_failure_leaves_session_idle() {
        let h = harness(true);
        let run = start(&h);

        let view = Arc::clone(&run.view);
        wait_until("idle", || view.lock().unwrap().status == CoachStatus::Idle).await;
        assert_eq!(h.notifier.notices.lock().unwrap().len(), 1);

        let summary = leave(run).await;
        assert_eq!(summary.status, CoachStatus::Idle);
        assert!(h.synth.spoken().is_empty());
    }

    #[tokio::test]
    async fn advancing_the_last_step_completes_and_says_goodbye() {
        let h = harness(false);
        h.store.insert(
            "food-prep",
            &h.token,
            SessionRecord {
                current_step_index: 1,
                score: 90,
                ..Default::default()
            },
        );
        let run = start(&h);

        let view = Arc::clone(&run.view);
        wait_until("listening", || {
            view.lock().unwrap().status == CoachStatus::Listening
        })
        .await;
        assert_eq!(view.lock().unwrap().step_index, 1);

        run.control.send(ControlCommand::Advance).await.unwrap();
        let summary = tokio::time::timeout(Duration::from_secs(3), run.session)
            .await
            .expect("session ended on its own")
            .unwrap();

        assert!(summary.completed);
        assert_eq!(summary.score_percent, 90);
        let record = h.store.snapshot("food-prep", &h.token).unwrap();
        assert!(record.is_completed);
        assert!(h
            .synth
            .spoken()
            .last()
            .is_some_and(|s| s.contains("last step")));
    }

    #[tokio::test]
    async fn completed_session_returns_immediately() {
        let h = harness(false);
        h.store.insert(
            "food-prep",
            &h.token,
            SessionRecord {
                current_step_index: 1,
                score: 80,
                is_completed: true,
                ..Default::default()
            },
        );
        let run = start(&h);
        let summary = tokio::time::timeout(Duration::from_secs(1), run.session)
            .await
            .expect("returned")
            .unwrap();
        assert!(summary.completed);
        assert_eq!(summary.score, 80);
    }

    #[tokio::test]
    async fn closing_control_channel_leaves() {
        let h = harness(false);
        let run = start(&h);
        drop(run.control);
        let summary = tokio::time::timeout(Duration::from_secs(3), run.session)
            .await
            .expect("session ended")
            .unwrap();
        assert!(!summary.completed);
    }

    #[tokio::test]
    async fn cancelled_utterance_never_starts() {
        let synth = RecordingSynth::default();
        let mut tasks = JoinSet::new();
        let mut slot = SpeechSlot::default();
        let started = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&started);
        slot.start(tasks.spawn(async move {
            flag.store(true, Ordering::SeqCst);
        }));
        slot.cancel(&synth);

        let joined = tasks.join_next().await.expect("task joined");
        assert!(joined.unwrap_err().is_cancelled());
        assert!(!started.load(Ordering::SeqCst));
        assert_eq!(synth.cancels(), 1);
    }
}
