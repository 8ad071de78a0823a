//! Conversions between OpenCV `Mat` buffers and `image` RGB buffers.
//!
//! Both directions go through a freshly allocated, continuous buffer so the
//! returned value never aliases the source.

use image::RgbImage;
use opencv::core::{self, Mat, Scalar, CV_8UC3};
use opencv::imgproc;
use opencv::prelude::*;

fn bad_arg(message: String) -> opencv::Error {
    opencv::Error::new(core::StsBadArg, message)
}

/// Convert an 8-bit BGR `Mat` (as delivered by `videoio`) into an RGB image
///
/// # Errors
///
/// Returns an error if the `Mat` is empty, is not 8-bit 3-channel, or the
/// colour conversion fails
pub fn bgr_mat_to_rgb_image(mat: &Mat) -> opencv::Result<RgbImage> {
    if mat.empty() {
        return Err(bad_arg("empty Mat".to_string()));
    }
    if mat.typ() != CV_8UC3 {
        return Err(bad_arg(format!("expected CV_8UC3 Mat, got type {}", mat.typ())));
    }

    let mut rgb = Mat::default();
    imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

    let width = u32::try_from(rgb.cols()).map_err(|_| bad_arg(format!("invalid width {}", rgb.cols())))?;
    let height = u32::try_from(rgb.rows()).map_err(|_| bad_arg(format!("invalid height {}", rgb.rows())))?;
    let bytes = rgb.data_bytes()?.to_vec();

    RgbImage::from_raw(width, height, bytes)
        .ok_or_else(|| bad_arg(format!("buffer does not match {width}x{height} RGB")))
}

/// Copy an RGB image into a new 8-bit 3-channel `Mat` (RGB channel order)
///
/// # Errors
///
/// Returns an error if the image dimensions do not fit OpenCV's `i32` sizes
/// or the `Mat` cannot be allocated
pub fn rgb_image_to_mat(image: &RgbImage) -> opencv::Result<Mat> {
    let rows = i32::try_from(image.height()).map_err(|_| bad_arg(format!("image too tall: {}", image.height())))?;
    let cols = i32::try_from(image.width()).map_err(|_| bad_arg(format!("image too wide: {}", image.width())))?;

    let mut mat = Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::all(0.0))?;
    let dst = mat.data_bytes_mut()?;
    if dst.len() != image.as_raw().len() {
        return Err(bad_arg(format!(
            "Mat buffer has {} bytes, image has {}",
            dst.len(),
            image.as_raw().len()
        )));
    }
    dst.copy_from_slice(image.as_raw());
    Ok(mat)
}
