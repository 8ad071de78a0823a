//! Camera resource abstraction.
//!
//! A [`CameraSource`] describes a device and opens it; the returned
//! [`CameraHandle`] is owned exclusively by the capture loop for the lifetime
//! of one run and is closed exactly once by the lifecycle controller (or by
//! the loop itself when the camera fails).

use crate::error::CaptureError;
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};

#[cfg(feature = "opencv")]
pub mod webcam;

/// A camera device that can be opened repeatedly
pub trait CameraSource: Send + Sync {
    /// Acquire the device
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Open`] if the device is unavailable
    fn open(&self) -> Result<Box<dyn CameraHandle>, CaptureError>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// An opened camera
pub trait CameraHandle: Send {
    /// Pull the next frame, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// Returns a [`CaptureError`] if the camera is disconnected, returns an
    /// empty frame, or no frame arrives in time
    fn read(&mut self, timeout: Duration) -> Result<RgbImage, CaptureError>;

    /// Release the device. Calling it twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Close`] if the backend reports a failure
    fn close(&mut self) -> Result<(), CaptureError>;
}

/// Synthetic camera producing a moving gradient at a fixed frame rate
///
/// Useful for running the whole pipeline without hardware.
#[derive(Debug, Clone)]
pub struct PatternCamera {
    width: u32,
    height: u32,
    fps: u32,
}

impl PatternCamera {
    /// Create a pattern source; `fps == 0` means unpaced
    #[must_use]
    pub const fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }
}

impl CameraSource for PatternCamera {
    fn open(&self) -> Result<Box<dyn CameraHandle>, CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Open {
                device: self.describe(),
                reason: "zero-sized frames requested".to_string(),
            });
        }
        let interval = if self.fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / self.fps
        };
        Ok(Box::new(PatternHandle {
            width: self.width,
            height: self.height,
            interval,
            next_due: Instant::now(),
            tick: 0,
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        format!("test pattern {}x{}@{}fps", self.width, self.height, self.fps)
    }
}

struct PatternHandle {
    width: u32,
    height: u32,
    interval: Duration,
    next_due: Instant,
    tick: u64,
    closed: bool,
}

impl PatternHandle {
    #[allow(clippy::cast_possible_truncation)]
    fn render(&self) -> RgbImage {
        let shift = (self.tick * 4 % 256) as u32;
        let height = self.height.max(1);
        RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                (y * 255 / height) as u8,
                128,
            ])
        })
    }
}

impl CameraHandle for PatternHandle {
    fn read(&mut self, timeout: Duration) -> Result<RgbImage, CaptureError> {
        if self.closed {
            return Err(CaptureError::Disconnected);
        }

        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Err(CaptureError::Timeout(timeout));
            }
            std::thread::sleep(wait);
        }
        self.next_due = self.next_due.max(now) + self.interval;

        let image = self.render();
        self.tick += 1;
        Ok(image)
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        self.closed = true;
        Ok(())
    }
}
