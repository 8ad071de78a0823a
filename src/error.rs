//! Error types for the emotion streaming pipeline.
//!
//! Capture and inference failures are separate types because the capture loop
//! treats them differently: a [`CaptureError`] ends the current run, an
//! [`InferenceError`] only costs one emotion update.

use crate::emotion::Emotion;
use std::time::Duration;
use thiserror::Error;

/// Camera acquisition or frame pull failure. Fatal to the current run.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The camera could not be opened
    #[error("failed to open camera {device}: {reason}")]
    Open {
        /// Human-readable device description
        device: String,
        /// Backend-specific reason
        reason: String,
    },

    /// The camera went away while the loop was running
    #[error("camera disconnected")]
    Disconnected,

    /// No frame arrived within the bounded wait
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    /// The backend returned an empty frame
    #[error("camera returned an empty frame")]
    NoFrame,

    /// Frame size changed in the middle of a camera session
    #[error("frame geometry changed from {expected:?} to {actual:?}")]
    FrameGeometry {
        /// Size of the first frame of the session
        expected: (u32, u32),
        /// Size of the offending frame
        actual: (u32, u32),
    },

    /// A capture cycle panicked
    #[error("capture cycle panicked: {0}")]
    Panicked(String),

    /// Releasing the camera failed
    #[error("failed to release camera: {0}")]
    Close(String),

    /// `OpenCV` capture backend failure
    #[cfg(feature = "opencv")]
    #[error("OpenCV capture error: {0}")]
    OpenCV(#[from] opencv::Error),
}

/// Face detection or emotion classification failure on one frame. Non-fatal.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// The frame had no pixels
    #[error("cannot run inference on an empty frame")]
    EmptyFrame,

    /// A model produced a score outside [0, 1]
    #[error("score for {emotion} out of range: {value}")]
    InvalidScore {
        /// Label whose score was rejected
        emotion: Emotion,
        /// The rejected value
        value: f32,
    },

    /// Model output did not have the expected layout
    #[error("unexpected model output: {0}")]
    Output(String),

    /// Generic backend failure
    #[error("inference backend error: {0}")]
    Backend(String),

    /// `OpenCV` face detection failure
    #[cfg(feature = "opencv")]
    #[error("OpenCV inference error: {0}")]
    OpenCV(#[from] opencv::Error),

    /// `ONNX` Runtime classification failure
    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::OrtError),
}

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Camera failure
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Inference failure
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding failed
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// `OpenCV` operation failed outside the capture/inference paths
    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCV(#[from] opencv::Error),

    /// `ONNX` Runtime model loading failed
    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::OrtError),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Model loading error
    #[error("Model error: {0}")]
    ModelError(String),

    /// Font could not be loaded
    #[error("Font error: {0}")]
    FontError(String),

    /// Capture loop could not be started
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// HTTP transport error
    #[error("Server error: {0}")]
    ServerError(String),
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
