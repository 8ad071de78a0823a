//! Haar cascade face detection followed by an ONNX emotion classifier.
//!
//! Faces are found on an equalized grayscale copy of the frame, each face crop
//! is scored by the classifier, and the FER label order is mapped onto
//! [`Emotion`]'s canonical order.

use super::{normalize_scores, EmotionInference};
use crate::emotion::{BoundingBox, Detection, Emotion, EmotionScores};
use crate::error::InferenceError;
use crate::frame::Frame;
use crate::utils::clip_box;
use crate::utils::image_conversion::rgb_image_to_mat;
use crate::utils::safe_cast::{i32_to_u32, u32_to_i32};
use crate::Result;
use ndarray::{Array4, CowArray};
use opencv::core::{Mat, Rect, Size, Vector};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use ort::{Environment, Session, Value};
use std::path::Path;
use std::sync::Arc;

/// Classifier input size used when the model leaves it dynamic
const DEFAULT_CLASSIFIER_INPUT_SIZE: i32 = 48;

/// Label order of FER-2013 style classifiers
const FER_LABELS: [Emotion; Emotion::COUNT] = [
    Emotion::Angry,
    Emotion::Disgust,
    Emotion::Fear,
    Emotion::Happy,
    Emotion::Sad,
    Emotion::Surprise,
    Emotion::Neutral,
];

/// Haar cascade face detector on grayscale frames
pub struct HaarFaceDetector {
    classifier: CascadeClassifier,
    scale_factor: f64,
    min_neighbors: i32,
    min_size: i32,
}

impl HaarFaceDetector {
    /// Load a cascade XML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or holds no cascade
    pub fn new<P: AsRef<Path>>(cascade_path: P) -> Result<Self> {
        let path = cascade_path.as_ref();
        log::info!("Loading face cascade: {}", path.display());

        let path_str = path
            .to_str()
            .ok_or_else(|| crate::Error::ModelError(format!("Non UTF-8 cascade path: {}", path.display())))?;
        let classifier = CascadeClassifier::new(path_str)?;
        if classifier.empty()? {
            return Err(crate::Error::ModelError(format!(
                "Face cascade {} is empty",
                path.display()
            )));
        }

        Ok(Self {
            classifier,
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: 30,
        })
    }

    /// Face rectangles in a grayscale image
    ///
    /// # Errors
    ///
    /// Returns an error if `OpenCV` detection fails
    pub fn detect(&mut self, gray: &Mat) -> std::result::Result<Vec<Rect>, InferenceError> {
        let mut faces = Vector::<Rect>::new();
        self.classifier.detect_multi_scale(
            gray,
            &mut faces,
            self.scale_factor,
            self.min_neighbors,
            0,
            Size::new(self.min_size, self.min_size),
            Size::new(0, 0),
        )?;
        Ok(faces.to_vec())
    }
}

/// Tensor layout expected by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Nchw,
    Nhwc,
}

/// ONNX emotion classifier over cropped grayscale faces
pub struct EmotionClassifier {
    session: Session,
    layout: Layout,
    channels: usize,
    input_size: (i32, i32),
}

impl EmotionClassifier {
    /// Load a 7-class emotion model
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The ONNX runtime environment cannot be created
    /// - The model file cannot be loaded
    /// - The model has no inputs
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        log::info!(
            "Initializing EmotionClassifier with model: {}",
            model_path.as_ref().display()
        );
        let environment = Arc::new(
            Environment::builder()
                .with_name("emotion_classifier")
                .with_log_level(ort::LoggingLevel::Warning)
                .build()?,
        );

        let session = ort::SessionBuilder::new(&environment)?
            .with_optimization_level(ort::GraphOptimizationLevel::Level3)?
            .with_model_from_file(model_path)?;

        let input_meta = session
            .inputs
            .first()
            .ok_or_else(|| crate::Error::ModelError("Model has no inputs".to_string()))?;
        let dims: Vec<Option<u32>> = input_meta.dimensions.clone();

        // [batch, 1|3, h, w] or [batch, h, w, 1|3]; anything else falls back to 48x48 gray
        let dim = |i: usize| dims.get(i).copied().flatten();
        let (layout, channels, height, width) = match (dim(1), dim(3)) {
            (Some(c @ (1 | 3)), _) => (Layout::Nchw, c, dim(2), dim(3)),
            (_, Some(c @ (1 | 3))) => (Layout::Nhwc, c, dim(1), dim(2)),
            _ => (Layout::Nchw, 1, None, None),
        };
        let side = |d: Option<u32>| {
            d.and_then(|v| u32_to_i32(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_CLASSIFIER_INPUT_SIZE)
        };
        let input_size = (side(width), side(height));
        log::debug!("Classifier input {layout:?} {channels}ch {}x{}", input_size.0, input_size.1);

        Ok(Self {
            session,
            layout,
            channels: channels as usize,
            input_size,
        })
    }

    /// Score one cropped grayscale face
    ///
    /// # Errors
    ///
    /// Returns an error if preprocessing or inference fails, or the model
    /// does not return exactly seven scores
    pub fn classify(&self, face: &Mat) -> std::result::Result<EmotionScores, InferenceError> {
        let input = self.preprocess(face)?;
        let raw = self.forward(input)?;
        if raw.len() != Emotion::COUNT {
            return Err(InferenceError::Output(format!(
                "expected {} scores, got {}",
                Emotion::COUNT,
                raw.len()
            )));
        }

        let probabilities = normalize_scores(&raw);
        let mut values = [0.0f32; Emotion::COUNT];
        for (label, p) in FER_LABELS.iter().zip(probabilities) {
            values[label.index()] = p;
        }
        EmotionScores::new(values)
    }

    #[allow(clippy::cast_sign_loss)] // input sizes are positive
    fn preprocess(&self, face: &Mat) -> std::result::Result<Array4<f32>, InferenceError> {
        let (width, height) = self.input_size;
        let mut resized = Mat::default();
        imgproc::resize(
            face,
            &mut resized,
            Size::new(width, height),
            0.0,
            0.0,
            InterpolationFlags::INTER_AREA as i32,
        )?;

        let (w, h) = (width as usize, height as usize);
        let pixels = resized.data_bytes()?;
        if pixels.len() != w * h {
            return Err(InferenceError::Output(format!(
                "resized face has {} bytes, expected {}",
                pixels.len(),
                w * h
            )));
        }

        let shape = match self.layout {
            Layout::Nchw => (1, self.channels, h, w),
            Layout::Nhwc => (1, h, w, self.channels),
        };
        let mut array = Array4::<f32>::zeros(shape);
        for row in 0..h {
            for col in 0..w {
                let value = (f32::from(pixels[row * w + col]) - 127.5) / 128.0;
                for ch in 0..self.channels {
                    match self.layout {
                        Layout::Nchw => array[[0, ch, row, col]] = value,
                        Layout::Nhwc => array[[0, row, col, ch]] = value,
                    }
                }
            }
        }
        Ok(array)
    }

    fn forward(&self, input: Array4<f32>) -> std::result::Result<Vec<f32>, InferenceError> {
        let cow_array = CowArray::from(input.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input_tensor])?;
        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::Output("No output from model".to_string()))?;

        let tensor = output.try_extract::<f32>()?;
        let view = tensor.view();
        Ok(view.iter().copied().collect())
    }
}

/// Haar detection followed by per-face ONNX classification
pub struct OnnxEmotionAdapter {
    detector: HaarFaceDetector,
    classifier: EmotionClassifier,
}

impl OnnxEmotionAdapter {
    /// Load both models
    ///
    /// # Errors
    ///
    /// Returns an error if either model fails to load
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(cascade_path: P, model_path: Q) -> Result<Self> {
        Ok(Self {
            detector: HaarFaceDetector::new(cascade_path)?,
            classifier: EmotionClassifier::new(model_path)?,
        })
    }
}

impl EmotionInference for OnnxEmotionAdapter {
    fn infer(&mut self, frame: &Frame) -> std::result::Result<Vec<Detection>, InferenceError> {
        if frame.is_empty() {
            return Err(InferenceError::EmptyFrame);
        }

        let rgb = rgb_image_to_mat(frame.image())?;
        let mut gray = Mat::default();
        imgproc::cvt_color(&rgb, &mut gray, imgproc::COLOR_RGB2GRAY, 0)?;
        let mut equalized = Mat::default();
        imgproc::equalize_hist(&gray, &mut equalized)?;

        let faces = self.detector.detect(&equalized)?;
        let mut detections = Vec::with_capacity(faces.len());
        for rect in faces {
            let (Ok(width), Ok(height)) = (i32_to_u32(rect.width), i32_to_u32(rect.height)) else {
                continue;
            };
            let Some(bbox) = clip_box(BoundingBox::new(rect.x, rect.y, width, height), frame.width(), frame.height())
            else {
                continue;
            };

            let roi_rect = Rect::new(
                bbox.x,
                bbox.y,
                u32_to_i32(bbox.width).map_err(|e| InferenceError::Backend(e.to_string()))?,
                u32_to_i32(bbox.height).map_err(|e| InferenceError::Backend(e.to_string()))?,
            );
            let face = Mat::roi(&gray, roi_rect)?.try_clone()?;
            let scores = self.classifier.classify(&face)?;
            detections.push(Detection::new(bbox, scores));
        }

        log::debug!("Frame {}: {} face(s)", frame.sequence(), detections.len());
        Ok(detections)
    }

    fn name(&self) -> &'static str {
        "haar+onnx"
    }
}
