//! Vision adapter: detector trait, detection snapshots and the poll task.
//!
//! # Design
//!
//! The detector is synchronous per call and may be expensive, so the poll
//! task runs every `detect` on the blocking pool (the same way the STT
//! engine is driven elsewhere in the ecosystem) and pushes only the latest
//! snapshot into the coach's channel.  A snapshot replaces the previous one;
//! the coach never keeps a history.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::signals::SignalError;

// ---------------------------------------------------------------------------
// Detection types
// ---------------------------------------------------------------------------

/// Axis-aligned box in normalised image coordinates (0.0 – 1.0).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One momentary observation from the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    /// Detector confidence, when the model reports one.
    pub score: Option<f32>,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl DetectedObject {
    /// An observation carrying only a label (no score, empty box).
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            score: None,
            bbox: BoundingBox::default(),
        }
    }
}

/// A captured camera frame.  The coach treats pixel data as opaque.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Supplies the most recent camera frame, or `None` while no frame is ready.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Option<Frame>;
}

/// Object detector collaborator.
///
/// `initialize` is called once at session start; a failure degrades the
/// session (no proactive checks) rather than ending it.
pub trait VisionDetector: Send + Sync {
    fn initialize(&self) -> Result<(), SignalError>;

    /// Detect objects in `frame`.  Synchronous; called from the blocking pool.
    fn detect(&self, frame: &Frame) -> Vec<DetectedObject>;
}

// Compile-time assertion: Box<dyn VisionDetector> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn VisionDetector>) {}
};

// ---------------------------------------------------------------------------
// VisionPoller
// ---------------------------------------------------------------------------

/// Handle to the periodic detection task.  Dropping it stops polling.
pub struct VisionPoller {
    handle: JoinHandle<()>,
}

impl VisionPoller {
    /// Poll `detector` every `interval`, sending each snapshot to `tx`.
    ///
    /// Ticks that arrive while a detection is still running are skipped
    /// rather than queued.  The task ends when `tx` is closed.
    pub fn start(
        detector: Arc<dyn VisionDetector>,
        frames: Arc<dyn FrameSource>,
        interval: Duration,
        tx: mpsc::Sender<Vec<DetectedObject>>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let Some(frame) = frames.capture() else {
                    continue;
                };

                let detector = Arc::clone(&detector);
                let snapshot =
                    match tokio::task::spawn_blocking(move || detector.detect(&frame)).await {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            log::warn!("vision: detect task failed: {e}");
                            continue;
                        }
                    };

                if tx.send(snapshot).await.is_err() {
                    log::debug!("vision: snapshot channel closed, stopping poll");
                    break;
                }
            }
        });

        Self { handle }
    }

    /// Stop polling immediately.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for VisionPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BlankFrames;

    impl FrameSource for BlankFrames {
        fn capture(&self) -> Option<Frame> {
            Some(Frame::default())
        }
    }

    struct NoFrames;

    impl FrameSource for NoFrames {
        fn capture(&self) -> Option<Frame> {
            None
        }
    }

    struct CountingDetector(AtomicUsize);

    impl VisionDetector for CountingDetector {
        fn initialize(&self) -> Result<(), SignalError> {
            Ok(())
        }

        fn detect(&self, _frame: &Frame) -> Vec<DetectedObject> {
            self.0.fetch_add(1, Ordering::SeqCst);
            vec![DetectedObject::labelled("knife")]
        }
    }

    #[tokio::test]
    async fn poller_delivers_snapshots() {
        let (tx, mut rx) = mpsc::channel(4);
        let detector = Arc::new(CountingDetector(AtomicUsize::new(0)));
        let _poller = VisionPoller::start(
            detector.clone(),
            Arc::new(BlankFrames),
            Duration::from_millis(5),
            tx,
        );

        let first = rx.recv().await.expect("snapshot");
        assert_eq!(first[0].label, "knife");
        let _second = rx.recv().await.expect("snapshot");
        assert!(detector.0.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn poller_skips_ticks_without_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let detector = Arc::new(CountingDetector(AtomicUsize::new(0)));
        let _poller =
            VisionPoller::start(detector.clone(), Arc::new(NoFrames), Duration::from_millis(2), tx);

        let got = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(got.is_err(), "no snapshot expected without frames");
        assert_eq!(detector.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_poller_stops_task() {
        let (tx, mut rx) = mpsc::channel(1);
        let poller = VisionPoller::start(
            Arc::new(CountingDetector(AtomicUsize::new(0))),
            Arc::new(BlankFrames),
            Duration::from_millis(1),
            tx,
        );
        drop(poller);

        // Once the task is gone its sender is dropped and the channel drains.
        let deadline = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(deadline.is_ok());
    }

    #[test]
    fn detected_object_deserializes_box_field() {
        let json = r#"{"label":"cup","score":0.9,"box":{"x":0.1,"y":0.2,"width":0.3,"height":0.4}}"#;
        let obj: DetectedObject = serde_json::from_str(json).unwrap();
        assert_eq!(obj.label, "cup");
        assert_eq!(obj.score, Some(0.9));
        assert!((obj.bbox.height - 0.4).abs() < f32::EPSILON);
    }
}
