//! Real-time emotion detection over a live webcam stream.
//!
//! The library captures frames, runs face detection and emotion
//! classification on every N-th frame, draws the results onto the video and
//! publishes the newest annotated frame and emotion snapshot for concurrent
//! readers:
//! 1. A [`camera::CameraSource`] is opened by the [`lifecycle::Controller`]
//! 2. The [`pipeline::CaptureLoop`] pulls frames and calls the
//!    [`inference::EmotionInference`] backend per the frame-skip policy
//! 3. The [`annotator::Annotator`] overlays boxes, labels and score bars
//! 4. Results land in the [`shared_state::SharedState`] cell, where the HTTP
//!    layer in [`server`] picks them up
//!
//! # Examples
//!
//! ## Running the pipeline without hardware
//!
//! ```no_run
//! use emotion_stream::{
//!     annotator::Annotator,
//!     camera::PatternCamera,
//!     inference::NoopInference,
//!     lifecycle::Controller,
//!     pipeline::PipelineSettings,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = Controller::new(
//!     Box::new(PatternCamera::new(640, 480, 30)),
//!     Box::new(NoopInference),
//!     Annotator::new(),
//!     PipelineSettings::default(),
//! )?;
//!
//! controller.start()?;
//! std::thread::sleep(std::time::Duration::from_millis(500));
//!
//! let state = controller.shared_state();
//! if let Some(frame) = state.read_frame() {
//!     println!("frame {} is {} bytes of JPEG", frame.sequence(), frame.jpeg().len());
//! }
//! println!("{:?}", controller.status());
//!
//! controller.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Dominant emotion of a snapshot
//!
//! ```
//! use emotion_stream::emotion::{BoundingBox, Detection, Emotion, EmotionScores, EmotionSnapshot};
//!
//! let scores = EmotionScores::new([0.85, 0.02, 0.01, 0.05, 0.01, 0.01, 0.05]).unwrap();
//! let snapshot = EmotionSnapshot::from_detections(
//!     0,
//!     vec![Detection::new(BoundingBox::new(10, 10, 64, 64), scores)],
//! );
//! assert_eq!(snapshot.dominant(), Some((Emotion::Happy, 0.85)));
//! ```

/// Overlay drawing for faces and the score panel
pub mod annotator;

/// Camera abstraction and backends
pub mod camera;

/// Configuration management
pub mod config;

/// Constants used throughout the application
pub mod constants;

/// Emotion labels, scores, detections and snapshots
pub mod emotion;

/// Error types and result handling
pub mod error;

/// Captured and display frames
pub mod frame;

/// Face detection and emotion classification backends
pub mod inference;

/// Start/stop state machine around the capture loop
pub mod lifecycle;

/// Frame-skip policy and the capture/inference loop
pub mod pipeline;

/// HTTP streaming and status endpoints
pub mod server;

/// Latest-value hand-off between the loop and readers
pub mod shared_state;

/// Utility functions for coordinates and image conversions
pub mod utils;

pub use error::{Error, Result};
