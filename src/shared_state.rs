//! Hand-off point between the capture loop and any number of readers.
//!
//! Each slot holds an `Arc` to an immutable value. Publishing swaps the `Arc`
//! under a short write lock; reading clones it under a short read lock. A
//! reader therefore sees either the old or the new value in full, and keeps a
//! handle that stays valid after later publishes. Neither side ever waits for
//! the other beyond the pointer swap.

use crate::emotion::{EmotionSnapshot, EmotionStatus};
use crate::frame::DisplayFrame;
use log::warn;
use parking_lot::RwLock;
use std::sync::Arc;

/// Latest display frame and latest emotion snapshot
#[derive(Debug, Default)]
pub struct SharedState {
    frame: RwLock<Option<Arc<DisplayFrame>>>,
    snapshot: RwLock<Option<Arc<EmotionSnapshot>>>,
}

impl SharedState {
    /// Empty state: both reads return `None` until the first publish
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current display frame
    pub fn publish_frame(&self, frame: DisplayFrame) {
        let frame = Arc::new(frame);
        *self.frame.write() = Some(frame);
    }

    /// Replace the current snapshot unless it is older than the one published
    ///
    /// Returns the published handle, or `None` if `snapshot` was stale and
    /// dropped.
    pub fn publish_snapshot(&self, snapshot: EmotionSnapshot) -> Option<Arc<EmotionSnapshot>> {
        let snapshot = Arc::new(snapshot);
        let mut slot = self.snapshot.write();
        if let Some(current) = slot.as_ref() {
            if snapshot.sequence() < current.sequence() {
                warn!(
                    "Dropping stale snapshot {} (current {})",
                    snapshot.sequence(),
                    current.sequence()
                );
                return None;
            }
        }
        *slot = Some(Arc::clone(&snapshot));
        Some(snapshot)
    }

    /// Most recently published display frame
    #[must_use]
    pub fn read_frame(&self) -> Option<Arc<DisplayFrame>> {
        self.frame.read().clone()
    }

    /// Most recently published snapshot
    #[must_use]
    pub fn read_snapshot(&self) -> Option<Arc<EmotionSnapshot>> {
        self.snapshot.read().clone()
    }

    /// Status projection of the latest snapshot
    #[must_use]
    pub fn status(&self) -> EmotionStatus {
        EmotionStatus::from_snapshot(self.read_snapshot().as_deref())
    }

    /// First sequence number a new capture run should use
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        let frame = self.frame.read().as_ref().map(|f| f.sequence());
        let snapshot = self.snapshot.read().as_ref().map(|s| s.sequence());
        frame.max(snapshot).map_or(0, |last| last + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn display(sequence: u64) -> DisplayFrame {
        DisplayFrame::encode(&RgbImage::new(8, 8), sequence, false, 50).unwrap()
    }

    #[test]
    fn test_reads_before_publish_are_empty() {
        let state = SharedState::new();
        assert!(state.read_frame().is_none());
        assert!(state.read_snapshot().is_none());
        assert!(!state.status().face_detected);
        assert_eq!(state.next_sequence(), 0);
    }

    #[test]
    fn test_latest_value_wins() {
        let state = SharedState::new();
        state.publish_frame(display(1));
        state.publish_frame(display(2));
        assert_eq!(state.read_frame().unwrap().sequence(), 2);

        state.publish_snapshot(EmotionSnapshot::no_face(3));
        assert_eq!(state.read_snapshot().unwrap().sequence(), 3);
        assert_eq!(state.next_sequence(), 4);
    }

    #[test]
    fn test_stale_snapshot_is_dropped() {
        let state = SharedState::new();
        assert!(state.publish_snapshot(EmotionSnapshot::no_face(9)).is_some());
        assert!(state.publish_snapshot(EmotionSnapshot::no_face(4)).is_none());
        assert_eq!(state.read_snapshot().unwrap().sequence(), 9);
        // equal sequence is accepted
        assert!(state.publish_snapshot(EmotionSnapshot::no_face(9)).is_some());
    }

    #[test]
    fn test_reader_handle_survives_publish() {
        let state = SharedState::new();
        state.publish_frame(display(1));
        let held = state.read_frame().unwrap();
        state.publish_frame(display(2));
        assert_eq!(held.sequence(), 1);
        assert_eq!(state.read_frame().unwrap().sequence(), 2);
    }
}
