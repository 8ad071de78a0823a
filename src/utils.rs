//! Utility functions for pixel coordinates and image conversions.

pub mod safe_cast;

#[cfg(feature = "opencv")]
pub mod image_conversion;

use crate::emotion::{BoundingBox, Detection};
use safe_cast::{i32_to_u32, u32_to_i32_saturating};

/// Clip a bounding box to the frame, `None` if nothing visible remains
#[must_use]
pub fn clip_box(bbox: BoundingBox, frame_width: u32, frame_height: u32) -> Option<BoundingBox> {
    let max_x = u32_to_i32_saturating(frame_width);
    let max_y = u32_to_i32_saturating(frame_height);

    let x0 = bbox.x.clamp(0, max_x);
    let y0 = bbox.y.clamp(0, max_y);
    let x1 = bbox
        .x
        .saturating_add(u32_to_i32_saturating(bbox.width))
        .clamp(0, max_x);
    let y1 = bbox
        .y
        .saturating_add(u32_to_i32_saturating(bbox.height))
        .clamp(0, max_y);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(BoundingBox::new(
        x0,
        y0,
        i32_to_u32(x1 - x0).ok()?,
        i32_to_u32(y1 - y0).ok()?,
    ))
}

/// Clip every detection to the frame, dropping faces with nothing visible
#[must_use]
pub fn clip_detections(detections: Vec<Detection>, frame_width: u32, frame_height: u32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter_map(|detection| {
            clip_box(detection.bbox, frame_width, frame_height).map(|bbox| Detection { bbox, ..detection })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_box_inside() {
        let bbox = BoundingBox::new(10, 10, 50, 50);
        assert_eq!(clip_box(bbox, 200, 200), Some(bbox));
    }

    #[test]
    fn test_clip_box_edge_boundaries() {
        let clipped = clip_box(BoundingBox::new(190, -5, 20, 20), 200, 200).unwrap();
        assert_eq!(clipped, BoundingBox::new(190, 0, 10, 15));

        let clipped = clip_box(BoundingBox::new(-30, -30, 40, 40), 200, 200).unwrap();
        assert_eq!(clipped, BoundingBox::new(0, 0, 10, 10));
    }

    #[test]
    fn test_clip_box_extreme_values() {
        assert!(clip_box(BoundingBox::new(i32::MIN, 0, 10, 10), 64, 48).is_none());
        assert_eq!(
            clip_box(BoundingBox::new(0, 0, u32::MAX, u32::MAX), 64, 48),
            Some(BoundingBox::new(0, 0, 64, 48))
        );
        assert_eq!(
            clip_box(BoundingBox::new(i32::MAX, i32::MAX, u32::MAX, u32::MAX), 64, 48),
            None
        );
    }

    #[test]
    fn test_clip_detections_drops_invisible_faces() {
        let scores = crate::emotion::EmotionScores::new([0.5, 0.1, 0.1, 0.1, 0.1, 0.05, 0.05]).unwrap();
        let detections = vec![
            Detection::new(BoundingBox::new(i32::MIN, 0, 10, 10), scores),
            Detection::new(BoundingBox::new(-5, 40, 20, 20), scores),
        ];
        let clipped = clip_detections(detections, 64, 48);
        assert_eq!(clipped.len(), 1);
        assert_eq!(clipped[0].bbox, BoundingBox::new(0, 40, 15, 8));
        assert_eq!(clipped[0].scores, scores);
    }

    #[test]
    fn test_clip_box_outside_or_empty() {
        assert!(clip_box(BoundingBox::new(300, 300, 20, 20), 200, 200).is_none());
        assert!(clip_box(BoundingBox::new(-50, 10, 20, 20), 200, 200).is_none());
        assert!(clip_box(BoundingBox::new(10, 10, 0, 20), 200, 200).is_none());
    }
}
