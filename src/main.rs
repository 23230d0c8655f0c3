//! Application entry point: console live coach.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`CoachConfig`] from disk (returns default on first run).
//! 3. Load the module catalog and pick the module from `--module <id>`.
//! 4. Establish the session token (`--session <token>` resumes).
//! 5. Wire the API chat service, JSON stores and console outputs.
//! 6. Spawn the stdin reader, which stands in for the recognizer and the
//!    camera:
//!    * `/see a, b` sets the labels the simulated camera reports;
//!    * `/next` advances the step, `/quit` leaves;
//!    * any other line is a final transcript.
//! 7. Run the session until it completes or the trainee leaves.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use live_coach::{
    catalog::NeedCatalog,
    coach::{CoachDeps, ConsoleSynthesizer, ControlCommand, LiveCoach, LogNotifier},
    config::{AppPaths, CoachConfig},
    llm::{ApiChatService, JsonFeedbackStore},
    session::{JsonSessionStore, SessionToken},
    signals::{DetectedObject, Frame, FrameSource, SignalError, TranscriptEvent, VisionDetector},
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

struct Args {
    module: String,
    session: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut module = None;
    let mut session = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--module" => module = args.next(),
            "--session" => session = args.next(),
            "-h" | "--help" => {
                println!("usage: live-coach --module <id> [--session <token>]");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    let Some(module) = module else {
        bail!("missing --module <id>");
    };
    Ok(Args { module, session })
}

// ---------------------------------------------------------------------------
// Simulated camera
// ---------------------------------------------------------------------------

/// Camera and detector in one: reports whatever labels `/see` last set.
#[derive(Default)]
struct ManualScene {
    labels: Mutex<Vec<String>>,
}

impl ManualScene {
    fn set(&self, line: &str) {
        let labels = line
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if let Ok(mut current) = self.labels.lock() {
            *current = labels;
        }
    }
}

impl FrameSource for ManualScene {
    fn capture(&self) -> Option<Frame> {
        Some(Frame {
            width: 0,
            height: 0,
            data: Vec::new(),
        })
    }
}

impl VisionDetector for ManualScene {
    fn initialize(&self) -> Result<(), SignalError> {
        Ok(())
    }

    fn detect(&self, _frame: &Frame) -> Vec<DetectedObject> {
        self.labels
            .lock()
            .map(|labels| labels.iter().map(DetectedObject::labelled).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// stdin front-end
// ---------------------------------------------------------------------------

async fn read_console(
    scene: Arc<ManualScene>,
    transcripts: mpsc::Sender<TranscriptEvent>,
    control: mpsc::Sender<ControlCommand>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::warn!("console: stdin read failed: {e}");
                break;
            }
        };
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("/see") {
            scene.set(rest);
        } else if line == "/next" {
            if control.send(ControlCommand::Advance).await.is_err() {
                return;
            }
        } else if line == "/quit" {
            break;
        } else if !line.is_empty()
            && transcripts
                .send(TranscriptEvent::final_text(line))
                .await
                .is_err()
        {
            return;
        }
    }
    let _ = control.send(ControlCommand::Leave).await;
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args()?;

    // 2. Configuration
    let paths = AppPaths::new();
    let config = CoachConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        CoachConfig::default()
    });

    // 3. Catalog and module
    let catalog = Arc::new(
        NeedCatalog::load_from(&paths.catalog_file)
            .with_context(|| format!("loading catalog {}", paths.catalog_file.display()))?,
    );
    let module = catalog
        .module(&args.module)
        .cloned()
        .with_context(|| format!("module {} is not in the catalog", args.module))?;
    if module.steps.is_empty() {
        bail!("module {} has no steps", module.id);
    }

    // 4. Session token
    let token = match &args.session {
        Some(raw) => SessionToken::resume(raw)
            .with_context(|| format!("invalid session token {raw:?}"))?,
        None => SessionToken::generate(),
    };
    log::info!("Live coach starting: module {}, session {token}", module.id);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let summary = rt.block_on(async move {
        // 5. Collaborators
        let scene = Arc::new(ManualScene::default());
        let deps = CoachDeps {
            modules: catalog.clone(),
            matcher: catalog.matcher().clone(),
            chat: Arc::new(ApiChatService::from_config(&config.llm)),
            feedback: Arc::new(JsonFeedbackStore::load_from(paths.feedback_file.clone())),
            sessions: Arc::new(JsonSessionStore::new(paths.sessions_dir.clone())),
            synthesizer: Arc::new(ConsoleSynthesizer::new()),
            notifier: Arc::new(LogNotifier),
            detector: scene.clone(),
            frames: scene.clone(),
        };

        // 6. Console front-end
        let (transcript_tx, transcript_rx) = mpsc::channel(32);
        let (control_tx, control_rx) = mpsc::channel(8);
        tokio::spawn(read_console(scene, transcript_tx, control_tx));

        // 7. Run
        let coach = LiveCoach::new(config, deps, Arc::new(module), token);
        coach.run(transcript_rx, control_rx).await
    });
    // The stdin reader sits in a blocking read that cannot be cancelled.
    rt.shutdown_background();

    println!(
        "Session {} for {}: {} (step {}, score {}%)",
        summary.token,
        summary.module_id,
        summary.status.label(),
        summary.step_index + 1,
        summary.score_percent
    );
    if !summary.completed {
        println!(
            "Resume with: live-coach --module {} --session {}",
            summary.module_id, summary.token
        );
    }
    Ok(())
}
