//! Emotion labels, per-face detections and the snapshots published to readers.
//!
//! A snapshot is built once from the detections of one inference cycle and is
//! never modified afterwards. When several faces are found the face with the
//! largest bounding box is the primary face; its scores drive the dominant
//! label reported to status consumers.

use crate::error::InferenceError;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The fixed, ordered set of emotion labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    /// Happy
    Happy,
    /// Sad
    Sad,
    /// Angry
    Angry,
    /// Surprise
    Surprise,
    /// Fear
    Fear,
    /// Disgust
    Disgust,
    /// Neutral
    Neutral,
}

impl Emotion {
    /// Number of labels
    pub const COUNT: usize = 7;

    /// All labels in canonical order
    pub const ALL: [Self; Self::COUNT] = [
        Self::Happy,
        Self::Sad,
        Self::Angry,
        Self::Surprise,
        Self::Fear,
        Self::Disgust,
        Self::Neutral,
    ];

    /// Position of this label in [`Emotion::ALL`]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Lowercase label used on the wire
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Surprise => "surprise",
            Self::Fear => "fear",
            Self::Disgust => "disgust",
            Self::Neutral => "neutral",
        }
    }

    /// Short text emoticon shown next to the label in the overlay
    #[must_use]
    pub const fn emoticon(self) -> &'static str {
        match self {
            Self::Happy => ":)",
            Self::Sad => ":(",
            Self::Angry => ">:(",
            Self::Surprise => ":O",
            Self::Fear => "D:",
            Self::Disgust => ":P",
            Self::Neutral => ":|",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Emotion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|emotion| emotion.label() == lower)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown emotion label: {s}")))
    }
}

/// Per-label confidences in canonical label order, each in [0, 1]
///
/// Values are not required to sum to one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionScores([f32; Emotion::COUNT]);

impl EmotionScores {
    /// Build scores indexed by [`Emotion::ALL`]
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::InvalidScore`] if any value is non-finite or
    /// outside [0, 1].
    pub fn new(values: [f32; Emotion::COUNT]) -> std::result::Result<Self, InferenceError> {
        for (emotion, &value) in Emotion::ALL.iter().zip(values.iter()) {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(InferenceError::InvalidScore {
                    emotion: *emotion,
                    value,
                });
            }
        }
        Ok(Self(values))
    }

    /// Confidence for one label
    #[must_use]
    pub fn get(&self, emotion: Emotion) -> f32 {
        self.0[emotion.index()]
    }

    /// Iterate `(label, score)` in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.iter().copied().zip(self.0.iter().copied())
    }

    /// Label with the highest score; ties resolve to the earliest label
    #[must_use]
    pub fn dominant(&self) -> (Emotion, f32) {
        let mut best = (Emotion::ALL[0], self.0[0]);
        for (emotion, score) in self.iter().skip(1) {
            if score > best.1 {
                best = (emotion, score);
            }
        }
        best
    }

    /// Labels sorted by descending score, canonical order among equals
    #[must_use]
    pub fn ranked(&self) -> Vec<(Emotion, f32)> {
        let mut ranked: Vec<_> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// Scores keyed by label
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<Emotion, f32> {
        self.iter().collect()
    }
}

/// Face region in pixel coordinates of the (mirrored) frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge, may be negative for faces cut by the frame border
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl BoundingBox {
    /// Create a bounding box
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Area in square pixels
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// One located face plus its per-emotion confidences
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Face region
    pub bbox: BoundingBox,
    /// Emotion confidences for this face
    pub scores: EmotionScores,
}

impl Detection {
    /// Create a detection
    #[must_use]
    pub const fn new(bbox: BoundingBox, scores: EmotionScores) -> Self {
        Self { bbox, scores }
    }

    /// Dominant label of this face
    #[must_use]
    pub fn dominant(&self) -> (Emotion, f32) {
        self.scores.dominant()
    }
}

/// Index of the face with the largest bounding box, earliest on ties
#[must_use]
pub fn primary_face(detections: &[Detection]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (idx, detection) in detections.iter().enumerate() {
        let area = detection.bbox.area();
        match best {
            Some((_, best_area)) if area <= best_area => {}
            _ => best = Some((idx, area)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Result of one completed inference cycle
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionSnapshot {
    sequence: u64,
    detections: Vec<Detection>,
    primary: Option<usize>,
}

impl EmotionSnapshot {
    /// Build a snapshot from the detections computed on frame `sequence`
    #[must_use]
    pub fn from_detections(sequence: u64, detections: Vec<Detection>) -> Self {
        let primary = primary_face(&detections);
        Self {
            sequence,
            detections,
            primary,
        }
    }

    /// Snapshot stating that no face was seen on frame `sequence`
    #[must_use]
    pub fn no_face(sequence: u64) -> Self {
        Self::from_detections(sequence, Vec::new())
    }

    /// Sequence number of the frame this snapshot was computed from
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// All faces found in that frame
    #[must_use]
    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    /// Whether at least one face was found
    #[must_use]
    pub fn face_detected(&self) -> bool {
        self.primary.is_some()
    }

    /// The face whose scores are reported
    #[must_use]
    pub fn primary(&self) -> Option<&Detection> {
        self.primary.and_then(|idx| self.detections.get(idx))
    }

    /// Scores of the primary face
    #[must_use]
    pub fn scores(&self) -> Option<&EmotionScores> {
        self.primary().map(|detection| &detection.scores)
    }

    /// Dominant label and its confidence, `None` without a face
    #[must_use]
    pub fn dominant(&self) -> Option<(Emotion, f32)> {
        self.scores().map(EmotionScores::dominant)
    }

    /// Project into the structure served to status pollers
    #[must_use]
    pub fn status(&self) -> EmotionStatus {
        match self.scores() {
            Some(scores) => {
                let (dominant, confidence) = scores.dominant();
                EmotionStatus {
                    emotions: scores.to_map(),
                    dominant: Some(dominant),
                    confidence,
                    face_detected: true,
                }
            }
            None => EmotionStatus::unavailable(),
        }
    }
}

/// Status payload exposed to JSON pollers
///
/// Without a face (or before the first inference) `emotions` is empty,
/// `dominant` is `null` and `confidence` is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionStatus {
    /// Scores of the primary face
    pub emotions: BTreeMap<Emotion, f32>,
    /// Dominant label
    pub dominant: Option<Emotion>,
    /// Confidence of the dominant label
    pub confidence: f32,
    /// Whether a face was found
    pub face_detected: bool,
}

impl EmotionStatus {
    /// The "no face / not yet available" status
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            emotions: BTreeMap::new(),
            dominant: None,
            confidence: 0.0,
            face_detected: false,
        }
    }

    /// Project an optional snapshot
    #[must_use]
    pub fn from_snapshot(snapshot: Option<&EmotionSnapshot>) -> Self {
        snapshot.map_or_else(Self::unavailable, EmotionSnapshot::status)
    }
}

impl Default for EmotionStatus {
    fn default() -> Self {
        Self::unavailable()
    }
}
