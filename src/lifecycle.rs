//! Lifecycle controller: the two-state machine that owns the capture thread.
//!
//! `start` opens the camera on the caller's thread, so an unavailable device
//! is reported to whoever asked for the start. The running loop owns the
//! camera handle; `stop` joins the loop before closing the handle it returns,
//! so the device is never released while the loop might still touch it.
//!
//! The inference backend is shared with the loop rather than moved into it,
//! which lets [`Controller::analyze`] score uploaded images at any time.

use crate::annotator::Annotator;
use crate::camera::CameraSource;
use crate::constants::WARMUP_FRAME_SIZE;
use crate::emotion::{EmotionSnapshot, EmotionStatus};
use crate::frame::{DisplayFrame, Frame};
use crate::inference::{EmotionInference, SharedInference};
use crate::pipeline::{CaptureLoop, FrameScheduler, LoopExit, PipelineSettings};
use crate::shared_state::SharedState;
use crate::utils::clip_detections;
use crate::{Error, Result};
use image::RgbImage;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Whether the capture loop is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No loop, camera released
    Stopped,
    /// Loop running, camera held
    Running,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Result of scoring one uploaded image
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Status projection of the image's snapshot
    pub status: EmotionStatus,
    /// The annotated image
    pub image: DisplayFrame,
}

struct Worker {
    stop: Arc<AtomicBool>,
    // yields `None` only if the loop never reached the thread
    handle: JoinHandle<Option<LoopExit>>,
}

/// Starts and stops the capture loop
pub struct Controller {
    camera: Box<dyn CameraSource>,
    inference: SharedInference,
    annotator: Annotator,
    settings: PipelineSettings,
    scheduler: FrameScheduler,
    state: Arc<SharedState>,
    worker: Mutex<Option<Worker>>,
}

impl Controller {
    /// Create a stopped controller
    ///
    /// # Errors
    ///
    /// Returns an error if `settings` are invalid
    pub fn new(
        camera: Box<dyn CameraSource>,
        inference: Box<dyn EmotionInference>,
        annotator: Annotator,
        settings: PipelineSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let scheduler = FrameScheduler::new(settings.skip_interval)?;
        Ok(Self {
            camera,
            inference: SharedInference::new(inference),
            annotator,
            settings,
            scheduler,
            state: Arc::new(SharedState::new()),
            worker: Mutex::new(None),
        })
    }

    /// Shared state the loop publishes into
    #[must_use]
    pub fn shared_state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    /// Status projection of the latest snapshot
    #[must_use]
    pub fn status(&self) -> EmotionStatus {
        self.state.status()
    }

    /// Current state; a loop that ended on its own counts as stopped
    #[must_use]
    pub fn run_state(&self) -> RunState {
        let mut worker = self.worker.lock();
        Self::reap_finished(&mut worker);
        if worker.is_some() {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }

    /// Open the camera and spawn the loop; no-op if already running
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capture`] if the camera cannot be opened, or
    /// [`Error::PipelineError`] if the loop thread cannot be spawned. The
    /// camera is closed again before either error is returned.
    pub fn start(&self) -> Result<RunState> {
        let mut worker = self.worker.lock();
        Self::reap_finished(&mut worker);
        if worker.is_some() {
            return Ok(RunState::Running);
        }

        info!("Starting capture on {}", self.camera.describe());
        let camera = self.camera.open().map_err(|e| {
            error!("Failed to start capture: {e}");
            e
        })?;
        let capture = CaptureLoop::with_scheduler(
            camera,
            self.inference.clone(),
            self.annotator.clone(),
            Arc::clone(&self.state),
            self.settings.clone(),
            self.scheduler,
        );

        // the thread takes the loop out of the slot, so a failed spawn leaves it here
        let slot = Arc::new(Mutex::new(Some(capture)));
        let thread_slot = Arc::clone(&slot);
        let stop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop);
        let spawned = std::thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || {
                let capture = thread_slot.lock().take();
                capture.map(|capture| capture.run(&loop_stop))
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(Worker { stop, handle });
                info!("Capture running");
                Ok(RunState::Running)
            }
            Err(e) => {
                error!("Failed to spawn capture thread: {e}");
                let capture = slot.lock().take();
                if let Some(capture) = capture {
                    capture.discard();
                }
                Err(Error::PipelineError(format!("failed to spawn capture thread: {e}")))
            }
        }
    }

    /// Signal the loop, wait for it to exit, then release the camera
    ///
    /// No-op if already stopped. Never fails: close errors are logged.
    pub fn stop(&self) -> RunState {
        let mut worker = self.worker.lock();
        let Some(running) = worker.take() else {
            return RunState::Stopped;
        };

        info!("Stopping capture");
        running.stop.store(true, Ordering::Release);
        Self::finish(running.handle);
        info!("Capture stopped");
        RunState::Stopped
    }

    /// Score one image with the shared backend and annotate it
    ///
    /// Runs alongside the capture loop and publishes nothing to the shared
    /// state. Boxes are clipped to the image like the loop's.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an image without pixels, an
    /// [`Error::Inference`] if the backend fails, or an encoding error
    pub fn analyze(&self, image: RgbImage) -> Result<Analysis> {
        let frame = Frame::new(image, 0);
        if frame.is_empty() {
            return Err(Error::InvalidInput("image has no pixels".to_string()));
        }
        let (width, height) = frame.dimensions();
        let detections = clip_detections(self.inference.infer(&frame)?, width, height);
        let snapshot = EmotionSnapshot::from_detections(frame.sequence(), detections);
        let image = self
            .annotator
            .annotate(&frame, Some(&snapshot), self.settings.jpeg_quality)?;
        debug!("Analyzed {width}x{height} upload, {} faces", snapshot.detections().len());
        Ok(Analysis {
            status: snapshot.status(),
            image,
        })
    }

    /// Push one blank frame through the backend and return its name
    ///
    /// # Errors
    ///
    /// Returns an [`Error::Inference`] if the backend fails
    pub fn warmup(&self) -> Result<&'static str> {
        let frame = Frame::new(RgbImage::new(WARMUP_FRAME_SIZE, WARMUP_FRAME_SIZE), 0);
        self.inference.infer(&frame)?;
        let name = self.inference.name();
        info!("Inference backend {name} warmed up");
        Ok(name)
    }

    /// Join a loop thread and close whatever camera it hands back
    fn finish(handle: JoinHandle<Option<LoopExit>>) {
        match handle.join() {
            Ok(Some(exit)) => {
                if let Some(mut camera) = exit.camera {
                    if let Err(e) = camera.close() {
                        warn!("Ignoring camera close error: {e}");
                    }
                }
                if let Some(fault) = exit.fault {
                    warn!("Capture run ended with: {fault}");
                }
            }
            Ok(None) => {}
            Err(_) => error!("Capture thread panicked"),
        }
    }

    fn reap_finished(worker: &mut Option<Worker>) {
        if !worker.as_ref().is_some_and(|w| w.handle.is_finished()) {
            return;
        }
        if let Some(finished) = worker.take() {
            Self::finish(finished.handle);
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}
