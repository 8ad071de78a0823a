//! Emotion inference backends.
//!
//! The capture loop only sees the [`EmotionInference`] trait: one frame in,
//! zero or more [`Detection`]s out. An empty list means no face and is not an
//! error.

use crate::emotion::Detection;
use crate::error::InferenceError;
use crate::frame::Frame;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "onnx")]
pub mod onnx;

/// Face detection plus emotion classification on a single frame
///
/// Implementations must not keep references into `frame` after returning.
pub trait EmotionInference: Send {
    /// Detect faces in `frame` and score each one
    ///
    /// # Errors
    ///
    /// Returns an [`InferenceError`] if the backend fails on this frame
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str {
        "unnamed"
    }
}

impl<T: EmotionInference + ?Sized> EmotionInference for Box<T> {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        (**self).infer(frame)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// One backend shared between the capture loop and one-off requests
///
/// Calls are serialized. The lock does not poison, so a panicking call leaves
/// the backend usable for the next one.
#[derive(Clone)]
pub struct SharedInference(Arc<Mutex<Box<dyn EmotionInference>>>);

impl SharedInference {
    /// Wrap `backend` for sharing
    #[must_use]
    pub fn new(backend: Box<dyn EmotionInference>) -> Self {
        Self(Arc::new(Mutex::new(backend)))
    }

    /// Run the backend on `frame`, waiting for any call in progress
    ///
    /// # Errors
    ///
    /// Returns whatever the backend returns
    pub fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        self.0.lock().infer(frame)
    }

    /// Backend name
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.0.lock().name()
    }
}

impl fmt::Debug for SharedInference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedInference").field(&self.name()).finish()
    }
}

/// Backend used when no models are configured: never finds a face
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInference;

impl EmotionInference for NoopInference {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        if frame.is_empty() {
            return Err(InferenceError::EmptyFrame);
        }
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Turn raw classifier output into a probability distribution
///
/// Values that already lie in [0, 1] and sum to 1 are returned unchanged;
/// anything else is treated as logits and passed through softmax.
#[must_use]
pub fn normalize_scores(raw: &[f32]) -> Vec<f32> {
    let in_range = raw.iter().all(|v| (0.0..=1.0).contains(v));
    let sum: f32 = raw.iter().sum();
    if in_range && (sum - 1.0).abs() <= crate::constants::PROBABILITY_SUM_TOLERANCE {
        return raw.to_vec();
    }

    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    if total > 0.0 && total.is_finite() {
        exps.into_iter().map(|e| e / total).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_noop_reports_no_face() {
        let mut backend = NoopInference;
        let frame = Frame::new(RgbImage::new(4, 4), 0);
        assert!(backend.infer(&frame).unwrap().is_empty());
        assert_eq!(backend.name(), "disabled");
    }

    #[test]
    fn test_noop_rejects_empty_frame() {
        let mut backend = NoopInference;
        let frame = Frame::new(RgbImage::new(0, 0), 0);
        assert!(matches!(backend.infer(&frame), Err(InferenceError::EmptyFrame)));
    }

    #[test]
    fn test_boxed_backend_delegates() {
        let mut backend: Box<dyn EmotionInference> = Box::new(NoopInference);
        assert_eq!(backend.name(), "disabled");
        assert!(backend.infer(&Frame::new(RgbImage::new(2, 2), 1)).unwrap().is_empty());
    }

    struct PanicOnce(bool);

    impl EmotionInference for PanicOnce {
        fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
            if !self.0 {
                self.0 = true;
                panic!("first call blows up");
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_shared_backend_survives_panic() {
        let shared = SharedInference::new(Box::new(PanicOnce(false)));
        let frame = Frame::new(RgbImage::new(2, 2), 0);
        let worker = shared.clone();
        let frame_copy = frame.clone();
        assert!(std::thread::spawn(move || worker.infer(&frame_copy)).join().is_err());
        assert!(shared.infer(&frame).unwrap().is_empty());
        assert_eq!(shared.name(), "unnamed");
    }

    #[test]
    fn test_probabilities_pass_through() {
        let probs = [0.1, 0.2, 0.7];
        assert_eq!(normalize_scores(&probs), probs.to_vec());
    }

    #[test]
    fn test_logits_become_distribution() {
        let out = normalize_scores(&[2.0, -1.0, 0.5, 4.0]);
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
        // ordering is preserved
        assert!(out[3] > out[0] && out[0] > out[2] && out[2] > out[1]);
    }
}
