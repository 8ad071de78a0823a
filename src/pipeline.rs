//! The capture/inference loop.
//!
//! Each cycle pulls one frame, optionally runs inference on it (every
//! `skip_interval`-th cycle), annotates it with the newest snapshot and
//! publishes the result. A [`CaptureError`] ends the run; an inference error
//! only turns that cycle's snapshot into "no face". A panic inside a cycle is
//! caught and ends the run like a capture fault, so the camera is still closed.

use crate::annotator::Annotator;
use crate::camera::CameraHandle;
use crate::constants::{DEFAULT_JPEG_QUALITY, DEFAULT_READ_TIMEOUT_MS, DEFAULT_SKIP_INTERVAL, STATS_LOG_INTERVAL_SECS};
use crate::emotion::EmotionSnapshot;
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::inference::{EmotionInference, SharedInference};
use crate::shared_state::SharedState;
use crate::utils::clip_detections;
use crate::{Error, Result};
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Settings fixed for the lifetime of a capture run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Cycles between two inference runs
    pub skip_interval: u32,
    /// Flip frames horizontally right after capture
    pub mirror: bool,
    /// Upper bound on one camera pull
    pub read_timeout: Duration,
    /// JPEG quality of display frames
    pub jpeg_quality: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            skip_interval: DEFAULT_SKIP_INTERVAL,
            mirror: true,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl PipelineSettings {
    /// Check the settings before starting a run
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a zero skip interval, a zero read
    /// timeout, or a JPEG quality outside 1..=100
    pub fn validate(&self) -> Result<()> {
        if self.skip_interval == 0 {
            return Err(Error::InvalidInput("skip interval must be positive".to_string()));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::InvalidInput("read timeout must be positive".to_string()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::InvalidInput(format!(
                "JPEG quality must be in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

/// Fixed frame-skip policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameScheduler {
    interval: u32,
}

impl FrameScheduler {
    /// Infer on every `interval`-th cycle
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `interval` is zero
    pub fn new(interval: u32) -> Result<Self> {
        if interval == 0 {
            return Err(Error::InvalidInput("skip interval must be positive".to_string()));
        }
        Ok(Self { interval })
    }

    /// Whether cycle number `cycle` (0-based within a run) runs inference
    #[must_use]
    pub const fn should_infer(&self, cycle: u64) -> bool {
        cycle % self.interval as u64 == 0
    }

    /// Configured interval
    #[must_use]
    pub const fn interval(&self) -> u32 {
        self.interval
    }
}

/// Counters collected over one run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopStats {
    /// Frames pulled and published
    pub frames: u64,
    /// Inference invocations
    pub inferences: u64,
    /// Inference invocations that failed
    pub inference_failures: u64,
    /// Wall time of the run so far
    pub elapsed: Duration,
}

impl LoopStats {
    /// Average frames per second over the run
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Sequence number of the captured frame
    pub sequence: u64,
    /// Whether inference ran on it
    pub inferred: bool,
    /// Faces in the snapshot used for annotation
    pub faces: usize,
}

/// Everything the loop hands back when it exits
pub struct LoopExit {
    /// The inference backend the run used
    pub inference: SharedInference,
    /// The still-open camera after a requested stop; `None` when the loop
    /// already closed it after a capture fault
    pub camera: Option<Box<dyn CameraHandle>>,
    /// The capture error that ended the run, if any
    pub fault: Option<CaptureError>,
    /// Run statistics
    pub stats: LoopStats,
}

/// One capture run: owns the camera handle and the inference backend
pub struct CaptureLoop {
    camera: Box<dyn CameraHandle>,
    inference: SharedInference,
    annotator: Annotator,
    state: Arc<SharedState>,
    settings: PipelineSettings,
    scheduler: FrameScheduler,
    cycle: u64,
    next_sequence: u64,
    geometry: Option<(u32, u32)>,
    current: Option<Arc<EmotionSnapshot>>,
    stats: LoopStats,
}

impl CaptureLoop {
    /// Prepare a run on an already opened camera
    ///
    /// Sequence numbers continue after whatever `state` last published.
    ///
    /// # Errors
    ///
    /// Returns an error if `settings` are invalid
    pub fn new(
        camera: Box<dyn CameraHandle>,
        inference: Box<dyn EmotionInference>,
        annotator: Annotator,
        state: Arc<SharedState>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let scheduler = FrameScheduler::new(settings.skip_interval)?;
        Ok(Self::with_scheduler(
            camera,
            SharedInference::new(inference),
            annotator,
            state,
            settings,
            scheduler,
        ))
    }

    /// Prepare a run from settings that were already validated
    pub(crate) fn with_scheduler(
        camera: Box<dyn CameraHandle>,
        inference: SharedInference,
        annotator: Annotator,
        state: Arc<SharedState>,
        settings: PipelineSettings,
        scheduler: FrameScheduler,
    ) -> Self {
        let next_sequence = state.next_sequence();
        Self {
            camera,
            inference,
            annotator,
            state,
            settings,
            scheduler,
            cycle: 0,
            next_sequence,
            geometry: None,
            current: None,
            stats: LoopStats::default(),
        }
    }

    /// Statistics so far
    #[must_use]
    pub const fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Run exactly one capture cycle
    ///
    /// # Errors
    ///
    /// Returns a [`CaptureError`] if no usable frame could be pulled
    pub fn run_cycle(&mut self) -> std::result::Result<CycleReport, CaptureError> {
        let image = self.camera.read(self.settings.read_timeout)?;
        let mut frame = Frame::new(image, self.next_sequence);
        if frame.is_empty() {
            return Err(CaptureError::NoFrame);
        }
        match self.geometry {
            None => self.geometry = Some(frame.dimensions()),
            Some(expected) if expected != frame.dimensions() => {
                return Err(CaptureError::FrameGeometry {
                    expected,
                    actual: frame.dimensions(),
                });
            }
            Some(_) => {}
        }
        self.next_sequence += 1;
        self.stats.frames += 1;

        if self.settings.mirror {
            frame = frame.into_mirrored();
        }

        let inferred = self.scheduler.should_infer(self.cycle);
        self.cycle += 1;
        if inferred {
            self.infer(&frame);
        }

        let snapshot = self.current.as_deref();
        let faces = snapshot.map_or(0, |s| s.detections().len());
        match self.annotator.annotate(&frame, snapshot, self.settings.jpeg_quality) {
            Ok(display) => self.state.publish_frame(display),
            Err(e) => warn!("Dropping frame {}: {e}", frame.sequence()),
        }

        Ok(CycleReport {
            sequence: frame.sequence(),
            inferred,
            faces,
        })
    }

    fn infer(&mut self, frame: &Frame) {
        self.stats.inferences += 1;
        let (width, height) = frame.dimensions();
        let snapshot = match self.inference.infer(frame) {
            Ok(detections) => {
                EmotionSnapshot::from_detections(frame.sequence(), clip_detections(detections, width, height))
            }
            Err(e) => {
                self.stats.inference_failures += 1;
                warn!("Inference failed on frame {}: {e}", frame.sequence());
                EmotionSnapshot::no_face(frame.sequence())
            }
        };
        if let Some(published) = self.state.publish_snapshot(snapshot) {
            self.current = Some(published);
        }
    }

    /// Cycle until `stop` is set or the camera fails
    ///
    /// `stop` is checked between cycles, so exit happens within one camera
    /// pull plus one inference call. After a capture fault the camera is
    /// closed here and [`LoopExit::camera`] is `None`.
    pub fn run(mut self, stop: &AtomicBool) -> LoopExit {
        info!(
            "Capture loop started (inference: {}, skip interval: {}, mirror: {})",
            self.inference.name(),
            self.scheduler.interval(),
            self.settings.mirror
        );
        let started = Instant::now();
        let mut last_log = started;
        let log_interval = Duration::from_secs(STATS_LOG_INTERVAL_SECS);

        let fault = loop {
            if stop.load(Ordering::Acquire) {
                break None;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle())) {
                Ok(Ok(report)) => debug!(
                    "Frame {} (inferred: {}, faces: {})",
                    report.sequence, report.inferred, report.faces
                ),
                Ok(Err(e)) => {
                    error!("Capture failed, stopping loop: {e}");
                    break Some(e);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("Capture cycle panicked, stopping loop: {message}");
                    break Some(CaptureError::Panicked(message));
                }
            }

            if last_log.elapsed() >= log_interval {
                self.stats.elapsed = started.elapsed();
                debug!(
                    "{} frames, {} inferences ({} failed), {:.1} fps",
                    self.stats.frames,
                    self.stats.inferences,
                    self.stats.inference_failures,
                    self.stats.fps()
                );
                last_log = Instant::now();
            }
        };
        self.stats.elapsed = started.elapsed();
        info!(
            "Capture loop exited after {} frames ({:.1} fps)",
            self.stats.frames,
            self.stats.fps()
        );

        let camera = if fault.is_some() {
            let mut camera = self.camera;
            if let Err(e) = camera.close() {
                warn!("Ignoring camera close error: {e}");
            }
            None
        } else {
            Some(self.camera)
        };

        LoopExit {
            inference: self.inference,
            camera,
            fault,
            stats: self.stats,
        }
    }

    /// Close the camera of a run that will never start
    pub fn discard(mut self) {
        if let Err(e) = self.camera.close() {
            warn!("Ignoring camera close error: {e}");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraSource, PatternCamera};
    use crate::emotion::{BoundingBox, Detection, EmotionScores};
    use crate::error::InferenceError;
    use image::{Rgb, RgbImage};

    fn settings(skip_interval: u32, mirror: bool) -> PipelineSettings {
        PipelineSettings {
            skip_interval,
            mirror,
            read_timeout: Duration::from_millis(200),
            jpeg_quality: 60,
        }
    }

    /// Camera yielding a fixed queue of images, then disconnecting
    struct QueueCamera(Vec<RgbImage>);

    impl CameraHandle for QueueCamera {
        fn read(&mut self, _timeout: Duration) -> std::result::Result<RgbImage, CaptureError> {
            if self.0.is_empty() {
                Err(CaptureError::Disconnected)
            } else {
                Ok(self.0.remove(0))
            }
        }

        fn close(&mut self) -> std::result::Result<(), CaptureError> {
            Ok(())
        }
    }

    /// Reports one face whose box starts at the first red pixel of row 0
    struct RedPixelFinder;

    impl EmotionInference for RedPixelFinder {
        fn infer(&mut self, frame: &Frame) -> std::result::Result<Vec<Detection>, InferenceError> {
            let x = (0..frame.width())
                .find(|&x| frame.image().get_pixel(x, 0)[0] == 255)
                .ok_or(InferenceError::Output("no marker".to_string()))?;
            let scores = EmotionScores::new([0.9, 0.0, 0.0, 0.0, 0.0, 0.0, 0.1])?;
            Ok(vec![Detection::new(
                BoundingBox::new(i32::try_from(x).unwrap_or(0), 0, 1, 1),
                scores,
            )])
        }
    }

    fn marked_frame() -> RgbImage {
        let mut image = RgbImage::new(16, 8);
        image.put_pixel(2, 0, Rgb([255, 0, 0]));
        image
    }

    fn capture_loop(camera: Box<dyn CameraHandle>, inference: Box<dyn EmotionInference>, settings: PipelineSettings) -> (CaptureLoop, Arc<SharedState>) {
        let state = Arc::new(SharedState::new());
        let capture = CaptureLoop::new(camera, inference, Annotator::new(), Arc::clone(&state), settings).unwrap();
        (capture, state)
    }

    #[test]
    fn test_scheduler_runs_first_cycle_and_every_kth() {
        let scheduler = FrameScheduler::new(3).unwrap();
        let hits: Vec<u64> = (0..10).filter(|&c| scheduler.should_infer(c)).collect();
        assert_eq!(hits, vec![0, 3, 6, 9]);
        assert!((0..5).all(|c| FrameScheduler::new(1).unwrap().should_infer(c)));
        assert!(FrameScheduler::new(0).is_err());
    }

    #[test]
    fn test_settings_validation() {
        assert!(PipelineSettings::default().validate().is_ok());
        assert!(settings(0, true).validate().is_err());
        let mut bad = settings(3, true);
        bad.jpeg_quality = 0;
        assert!(bad.validate().is_err());
        bad = settings(3, true);
        bad.read_timeout = Duration::ZERO;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_mirror_applies_before_inference() {
        let camera = Box::new(QueueCamera(vec![marked_frame()]));
        let (mut capture, state) = capture_loop(camera, Box::new(RedPixelFinder), settings(1, true));
        let report = capture.run_cycle().unwrap();
        assert!(report.inferred);
        let snapshot = state.read_snapshot().unwrap();
        // 16 px wide: x = 2 mirrors to x = 13
        assert_eq!(snapshot.primary().unwrap().bbox.x, 13);
    }

    #[test]
    fn test_without_mirror_coordinates_are_raw() {
        let camera = Box::new(QueueCamera(vec![marked_frame()]));
        let (mut capture, state) = capture_loop(camera, Box::new(RedPixelFinder), settings(1, false));
        capture.run_cycle().unwrap();
        assert_eq!(state.read_snapshot().unwrap().primary().unwrap().bbox.x, 2);
    }

    #[test]
    fn test_inference_error_publishes_no_face() {
        // blank frame has no marker, so the finder errors
        let camera = Box::new(QueueCamera(vec![RgbImage::new(16, 8)]));
        let (mut capture, state) = capture_loop(camera, Box::new(RedPixelFinder), settings(1, false));
        capture.run_cycle().unwrap();
        let snapshot = state.read_snapshot().unwrap();
        assert!(!snapshot.face_detected());
        assert_eq!(capture.stats().inference_failures, 1);
        assert!(state.read_frame().is_some());
    }

    #[test]
    fn test_geometry_change_is_fatal() {
        let camera = Box::new(QueueCamera(vec![RgbImage::new(16, 8), RgbImage::new(8, 8)]));
        let (mut capture, _state) = capture_loop(camera, Box::new(RedPixelFinder), settings(3, false));
        capture.run_cycle().unwrap();
        assert!(matches!(
            capture.run_cycle(),
            Err(CaptureError::FrameGeometry {
                expected: (16, 8),
                actual: (8, 8)
            })
        ));
    }

    #[test]
    fn test_run_stops_on_flag() {
        let camera = PatternCamera::new(32, 24, 0).open().unwrap();
        let (capture, state) = capture_loop(camera, Box::new(crate::inference::NoopInference), settings(2, true));
        let stop = AtomicBool::new(true);
        let exit = capture.run(&stop);
        assert!(exit.fault.is_none());
        assert!(exit.camera.is_some());
        assert_eq!(exit.stats.frames, 0);
        assert!(state.read_frame().is_none());
    }

    #[test]
    fn test_run_exits_on_capture_error() {
        let camera = Box::new(QueueCamera(vec![RgbImage::new(16, 8); 4]));
        let (capture, state) = capture_loop(camera, Box::new(crate::inference::NoopInference), settings(2, false));
        let exit = capture.run(&AtomicBool::new(false));
        assert!(matches!(exit.fault, Some(CaptureError::Disconnected)));
        assert!(exit.camera.is_none());
        assert_eq!(exit.stats.frames, 4);
        assert_eq!(exit.stats.inferences, 2);
        assert_eq!(state.read_frame().unwrap().sequence(), 3);
    }

    struct PanickingInference;

    impl EmotionInference for PanickingInference {
        fn infer(&mut self, _frame: &Frame) -> std::result::Result<Vec<Detection>, InferenceError> {
            panic!("backend bug");
        }
    }

    #[test]
    fn test_panicking_cycle_ends_run_as_fault() {
        let camera = Box::new(QueueCamera(vec![RgbImage::new(16, 8); 3]));
        let (capture, _state) = capture_loop(camera, Box::new(PanickingInference), settings(1, false));
        let exit = capture.run(&AtomicBool::new(false));
        match exit.fault {
            Some(CaptureError::Panicked(message)) => assert_eq!(message, "backend bug"),
            other => panic!("expected a panic fault, got {other:?}"),
        }
        assert!(exit.camera.is_none());
    }

    #[test]
    fn test_sequence_continues_from_state() {
        let state = Arc::new(SharedState::new());
        state.publish_snapshot(EmotionSnapshot::no_face(41));
        let camera = Box::new(QueueCamera(vec![RgbImage::new(4, 4)]));
        let mut capture = CaptureLoop::new(
            camera,
            Box::new(crate::inference::NoopInference),
            Annotator::new(),
            Arc::clone(&state),
            settings(1, false),
        )
        .unwrap();
        assert_eq!(capture.run_cycle().unwrap().sequence, 42);
        assert_eq!(state.read_snapshot().unwrap().sequence(), 42);
    }
}
