//! Webcam capture through `OpenCV`'s `videoio`.
//!
//! `VideoCapture::read` blocks without a deadline, so the device lives on a
//! dedicated grabber thread that hands frames over a one-slot channel. The
//! capture loop then waits on the channel with a timeout, which turns a
//! stalled camera into [`CaptureError::Timeout`] instead of a hung loop.

use super::{CameraHandle, CameraSource};
use crate::error::CaptureError;
use crate::utils::image_conversion::bgr_mat_to_rgb_image;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use image::RgbImage;
use log::{debug, info, warn};
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, CAP_PROP_BUFFERSIZE, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long `open` waits for the device to come up
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// `OpenCV` webcam selected by device index
#[derive(Debug, Clone)]
pub struct WebcamCamera {
    device: i32,
    width: u32,
    height: u32,
}

impl WebcamCamera {
    /// Camera `device` with a requested resolution
    #[must_use]
    pub const fn new(device: i32, width: u32, height: u32) -> Self {
        Self { device, width, height }
    }
}

impl CameraSource for WebcamCamera {
    fn open(&self) -> Result<Box<dyn CameraHandle>, CaptureError> {
        info!("Opening camera {}", self.device);

        let (frame_tx, frame_rx) = bounded::<Result<RgbImage, CaptureError>>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), CaptureError>>(1);
        let running = Arc::new(AtomicBool::new(true));

        let device = self.device;
        let (width, height) = (self.width, self.height);
        let grabber_running = Arc::clone(&running);
        let grabber = std::thread::Builder::new()
            .name(format!("camera-{device}"))
            .spawn(move || {
                let mut capture = match open_capture(device, width, height) {
                    Ok(capture) => {
                        let _ = ready_tx.send(Ok(()));
                        capture
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut mat = Mat::default();
                while grabber_running.load(Ordering::Acquire) {
                    let result = match capture.read(&mut mat) {
                        Ok(true) if !mat.empty() => bgr_mat_to_rgb_image(&mat).map_err(CaptureError::from),
                        Ok(_) => Err(CaptureError::NoFrame),
                        Err(e) => Err(CaptureError::from(e)),
                    };
                    let failed = result.is_err();
                    // blocks while one frame is already waiting; fails once the handle is closed
                    if frame_tx.send(result).is_err() || failed {
                        break;
                    }
                }

                if let Err(e) = capture.release() {
                    warn!("Failed to release camera {device}: {e}");
                }
                debug!("Camera {device} grabber exited");
            })
            .map_err(|e| CaptureError::Open {
                device: self.describe(),
                reason: format!("failed to spawn grabber thread: {e}"),
            })?;

        let mut handle = WebcamHandle {
            device,
            running,
            frames: Some(frame_rx),
            grabber: Some(grabber),
        };

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                info!("Camera {device} opened");
                Ok(Box::new(handle))
            }
            Ok(Err(e)) => {
                let _ = handle.close();
                Err(e)
            }
            Err(_) => {
                let _ = handle.close();
                Err(CaptureError::Open {
                    device: self.describe(),
                    reason: format!("device did not open within {OPEN_TIMEOUT:?}"),
                })
            }
        }
    }

    fn describe(&self) -> String {
        format!("webcam #{} ({}x{})", self.device, self.width, self.height)
    }
}

fn open_capture(device: i32, width: u32, height: u32) -> Result<VideoCapture, CaptureError> {
    let mut capture = VideoCapture::new(device, videoio::CAP_ANY)?;
    if !capture.is_opened()? {
        return Err(CaptureError::Open {
            device: format!("webcam #{device}"),
            reason: "device could not be opened (missing or in use by another application)".to_string(),
        });
    }

    capture.set(CAP_PROP_FRAME_WIDTH, f64::from(width))?;
    capture.set(CAP_PROP_FRAME_HEIGHT, f64::from(height))?;
    // Keep latency low: only the newest frame is buffered by the driver
    capture.set(CAP_PROP_BUFFERSIZE, 1.0)?;
    Ok(capture)
}

struct WebcamHandle {
    device: i32,
    running: Arc<AtomicBool>,
    frames: Option<Receiver<Result<RgbImage, CaptureError>>>,
    grabber: Option<JoinHandle<()>>,
}

impl CameraHandle for WebcamHandle {
    fn read(&mut self, timeout: Duration) -> Result<RgbImage, CaptureError> {
        let frames = self.frames.as_ref().ok_or(CaptureError::Disconnected)?;
        match frames.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Disconnected),
        }
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::Release);
        // Dropping the receiver unblocks a grabber waiting to hand over a frame
        self.frames = None;
        match self.grabber.take() {
            Some(grabber) => {
                grabber
                    .join()
                    .map_err(|_| CaptureError::Close(format!("grabber for camera {} panicked", self.device)))?;
                info!("Camera {} released", self.device);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for WebcamHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{e}");
        }
    }
}
