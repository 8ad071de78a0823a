//! Overlay rendering for display frames.
//!
//! The annotator never touches the frame it is given: it draws on a copy so the
//! next inference cycle always sees raw pixels. Shapes are always drawn; text
//! needs a TrueType font and is skipped without one.

use crate::{
    constants::{
        BAR_HEIGHT, BAR_WIDTH, LABEL_BOX_HEIGHT, LABEL_BOX_OFFSET, LABEL_PADDING, LABEL_TEXT_SCALE,
        OUTLINE_THICKNESS, PANEL_FIRST_ROW, PANEL_HEIGHT, PANEL_MARGIN_RIGHT, PANEL_OPACITY,
        PANEL_ROW_STEP, PANEL_TOP, PANEL_WIDTH, ROW_TEXT_SCALE, TITLE_TEXT_SCALE,
    },
    emotion::{Detection, Emotion, EmotionScores, EmotionSnapshot},
    frame::{DisplayFrame, Frame},
    utils::{
        clip_box,
        safe_cast::{f32_to_u32_clamp, u32_to_i32_saturating},
    },
    Error, Result,
};
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use std::path::Path;

const PANEL_BACKGROUND: Rgb<u8> = Rgb([30, 30, 30]);
const PANEL_SEPARATOR: Rgb<u8> = Rgb([100, 100, 100]);
const BAR_BACKGROUND: Rgb<u8> = Rgb([50, 50, 50]);
const TEXT_LIGHT: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_DARK: Rgb<u8> = Rgb([0, 0, 0]);

/// Fixed label to colour table
#[must_use]
pub const fn emotion_color(emotion: Emotion) -> Rgb<u8> {
    match emotion {
        Emotion::Happy => Rgb([255, 255, 0]),
        Emotion::Sad => Rgb([100, 100, 255]),
        Emotion::Angry => Rgb([255, 0, 0]),
        Emotion::Surprise => Rgb([255, 0, 255]),
        Emotion::Fear => Rgb([128, 0, 128]),
        Emotion::Disgust => Rgb([0, 128, 0]),
        Emotion::Neutral => Rgb([200, 200, 200]),
    }
}

/// Draws face outlines, dominant labels and the per-emotion bar panel
#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
    hide_panel: bool,
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("font", &self.font.is_some())
            .field("hide_panel", &self.hide_panel)
            .finish()
    }
}

impl Annotator {
    /// Annotator without text rendering
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotator drawing text with `font`
    #[must_use]
    pub fn with_font(font: FontArc) -> Self {
        Self {
            font: Some(font),
            hide_panel: false,
        }
    }

    /// Load a TrueType/OpenType font from disk
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid font
    pub fn from_font_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| Error::FontError(format!("{}: {e}", path.as_ref().display())))?;
        Ok(Self::with_font(font))
    }

    /// Enable or disable the side panel
    #[must_use]
    pub fn show_panel(mut self, show: bool) -> Self {
        self.hide_panel = !show;
        self
    }

    /// Whether labels are rendered as text
    #[must_use]
    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw the overlay for `snapshot` onto a copy of `frame`
    ///
    /// Without a snapshot, or with a "no face" snapshot, the copy is returned
    /// untouched.
    #[must_use]
    pub fn render(&self, frame: &Frame, snapshot: Option<&EmotionSnapshot>) -> RgbImage {
        let mut canvas = frame.image().clone();
        let Some(snapshot) = snapshot.filter(|s| s.face_detected()) else {
            return canvas;
        };

        for detection in snapshot.detections() {
            self.draw_face(&mut canvas, detection);
        }
        if !self.hide_panel {
            if let Some(scores) = snapshot.scores() {
                self.draw_panel(&mut canvas, scores);
            }
        }
        canvas
    }

    /// Render and JPEG-encode `frame` for transport
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails
    pub fn annotate(
        &self,
        frame: &Frame,
        snapshot: Option<&EmotionSnapshot>,
        jpeg_quality: u8,
    ) -> Result<DisplayFrame> {
        let annotated = snapshot.is_some_and(EmotionSnapshot::face_detected);
        let canvas = self.render(frame, snapshot);
        DisplayFrame::encode(&canvas, frame.sequence(), annotated, jpeg_quality)
    }

    fn draw_face(&self, canvas: &mut RgbImage, detection: &Detection) {
        let (dominant, confidence) = detection.dominant();
        let color = emotion_color(dominant);
        let Some(bbox) = clip_box(detection.bbox, canvas.width(), canvas.height()) else {
            return;
        };
        let (x, y) = (bbox.x, bbox.y);
        let (w, h) = (u32_to_i32_saturating(bbox.width), u32_to_i32_saturating(bbox.height));

        for t in 0..OUTLINE_THICKNESS {
            stroke_rect(
                canvas,
                x.saturating_sub(t),
                y.saturating_sub(t),
                w.saturating_add(2 * t),
                h.saturating_add(2 * t),
                color,
            );
        }

        let label = format!(
            "{} {} ({}%)",
            dominant.label().to_uppercase(),
            dominant.emoticon(),
            percent(confidence)
        );
        let scale = PxScale::from(LABEL_TEXT_SCALE);
        let label_width = match &self.font {
            Some(font) => u32_to_i32_saturating(text_size(scale, font, &label).0),
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            None => label.len() as i32 * 12,
        };
        let label_y = y.saturating_sub(LABEL_BOX_OFFSET);
        fill_rect(
            canvas,
            x,
            label_y,
            label_width.saturating_add(2 * LABEL_PADDING),
            LABEL_BOX_HEIGHT,
            color,
        );
        self.text(canvas, TEXT_DARK, x + LABEL_PADDING, label_y + 3, scale, &label);
    }

    fn draw_panel(&self, canvas: &mut RgbImage, scores: &EmotionScores) {
        let x0 = u32_to_i32_saturating(canvas.width()) - PANEL_MARGIN_RIGHT;
        blend_rect(
            canvas,
            x0,
            PANEL_TOP,
            PANEL_WIDTH,
            PANEL_HEIGHT,
            PANEL_BACKGROUND,
            PANEL_OPACITY,
        );

        self.text(
            canvas,
            TEXT_LIGHT,
            x0 + 20,
            38,
            PxScale::from(TITLE_TEXT_SCALE),
            "EMOTION DETECTOR",
        );
        #[allow(clippy::cast_precision_loss)]
        for dy in 0..2 {
            let line_y = (70 + dy) as f32;
            draw_line_segment_mut(
                canvas,
                ((x0 + 10) as f32, line_y),
                ((x0 + PANEL_WIDTH - 10) as f32, line_y),
                PANEL_SEPARATOR,
            );
        }

        let row_scale = PxScale::from(ROW_TEXT_SCALE);
        let bar_x = x0 + 15;
        let mut y_pos = PANEL_FIRST_ROW;
        for (emotion, score) in scores.ranked() {
            let color = emotion_color(emotion);
            let name = format!("{} {}", emotion.label().to_uppercase(), emotion.emoticon());
            self.text(canvas, color, bar_x, y_pos - 12, row_scale, &name);

            fill_rect(
                canvas,
                bar_x,
                y_pos + 5,
                u32_to_i32_saturating(BAR_WIDTH),
                u32_to_i32_saturating(BAR_HEIGHT),
                BAR_BACKGROUND,
            );
            #[allow(clippy::cast_precision_loss)]
            let fill = f32_to_u32_clamp(BAR_WIDTH as f32 * score, 0, BAR_WIDTH);
            fill_rect(
                canvas,
                bar_x,
                y_pos + 5,
                u32_to_i32_saturating(fill),
                u32_to_i32_saturating(BAR_HEIGHT),
                color,
            );

            let pct = format!("{}%", percent(score));
            let pct_x = bar_x + u32_to_i32_saturating(BAR_WIDTH) + 5;
            self.text(canvas, TEXT_LIGHT, pct_x, y_pos + 3, row_scale, &pct);

            y_pos += PANEL_ROW_STEP;
        }
    }

    fn text(&self, canvas: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, scale: PxScale, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(canvas, color, x, y, scale, font, text);
        }
    }
}

/// Whole-number percentage, truncated like the on-screen readout
#[allow(clippy::cast_possible_truncation)]
fn percent(score: f32) -> i32 {
    (score * 100.0) as i32
}

fn fill_rect(canvas: &mut RgbImage, x: i32, y: i32, w: i32, h: i32, color: Rgb<u8>) {
    if w <= 0 || h <= 0 {
        return;
    }
    #[allow(clippy::cast_sign_loss)]
    draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(w as u32, h as u32), color);
}

fn stroke_rect(canvas: &mut RgbImage, x: i32, y: i32, w: i32, h: i32, color: Rgb<u8>) {
    if w <= 0 || h <= 0 {
        return;
    }
    #[allow(clippy::cast_sign_loss)]
    draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(w as u32, h as u32), color);
}

/// Alpha-blend a solid rectangle over the canvas, clipped to its bounds
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn blend_rect(canvas: &mut RgbImage, x: i32, y: i32, w: i32, h: i32, color: Rgb<u8>, alpha: f32) {
    let x_start = x.max(0);
    let y_start = y.max(0);
    let x_end = (x + w).min(u32_to_i32_saturating(canvas.width()));
    let y_end = (y + h).min(u32_to_i32_saturating(canvas.height()));
    if x_start >= x_end || y_start >= y_end {
        return;
    }

    for py in y_start as u32..y_end as u32 {
        for px in x_start as u32..x_end as u32 {
            let pixel = canvas.get_pixel_mut(px, py);
            for (channel, target) in pixel.0.iter_mut().zip(color.0) {
                let mixed = f32::from(target) * alpha + f32::from(*channel) * (1.0 - alpha);
                *channel = mixed.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::BoundingBox;

    fn snapshot_with_face(bbox: BoundingBox) -> EmotionSnapshot {
        let scores = EmotionScores::new([0.85, 0.02, 0.01, 0.05, 0.01, 0.01, 0.05]).unwrap();
        EmotionSnapshot::from_detections(0, vec![Detection::new(bbox, scores)])
    }

    fn black_frame() -> Frame {
        Frame::new(RgbImage::new(640, 480), 0)
    }

    #[test]
    fn test_no_face_leaves_frame_untouched() {
        let frame = black_frame();
        let annotator = Annotator::new();

        let rendered = annotator.render(&frame, None);
        assert_eq!(rendered.as_raw(), frame.image().as_raw());

        let rendered = annotator.render(&frame, Some(&EmotionSnapshot::no_face(0)));
        assert_eq!(rendered.as_raw(), frame.image().as_raw());
    }

    #[test]
    fn test_face_outline_uses_dominant_color() {
        let frame = black_frame();
        let snapshot = snapshot_with_face(BoundingBox::new(50, 80, 100, 100));
        let rendered = Annotator::new().render(&frame, Some(&snapshot));

        let happy = emotion_color(Emotion::Happy);
        assert_eq!(*rendered.get_pixel(50, 130), happy);
        assert_eq!(*rendered.get_pixel(48, 130), happy);
        // inside of the box stays raw
        assert_eq!(*rendered.get_pixel(100, 130), Rgb([0, 0, 0]));
        // label box above the face
        assert_eq!(*rendered.get_pixel(52, 60), happy);
    }

    #[test]
    fn test_input_frame_not_mutated() {
        let frame = black_frame();
        let before = frame.image().clone();
        let snapshot = snapshot_with_face(BoundingBox::new(10, 40, 60, 60));
        let _ = Annotator::new().render(&frame, Some(&snapshot));
        assert_eq!(frame.image().as_raw(), before.as_raw());
    }

    #[test]
    fn test_panel_bars_scale_with_confidence() {
        let frame = black_frame();
        let snapshot = snapshot_with_face(BoundingBox::new(10, 40, 60, 60));
        let rendered = Annotator::new().render(&frame, Some(&snapshot));

        let bar_x = 640 - PANEL_MARGIN_RIGHT + 15;
        let bar_y = u32::try_from(PANEL_FIRST_ROW + 5 + 6).unwrap();
        let bar_x = u32::try_from(bar_x).unwrap();
        // first row is happy at 0.85 -> 153 px filled
        assert_eq!(*rendered.get_pixel(bar_x + 10, bar_y), emotion_color(Emotion::Happy));
        assert_eq!(*rendered.get_pixel(bar_x + 152, bar_y), emotion_color(Emotion::Happy));
        assert_eq!(*rendered.get_pixel(bar_x + 170, bar_y), BAR_BACKGROUND);

        // blended background where nothing else is drawn
        let bg = rendered.get_pixel(u32::try_from(640 - PANEL_MARGIN_RIGHT + 2).unwrap(), 25);
        assert_eq!(*bg, Rgb([21, 21, 21]));
    }

    #[test]
    fn test_panel_can_be_hidden() {
        let frame = black_frame();
        let snapshot = snapshot_with_face(BoundingBox::new(10, 40, 60, 60));
        let rendered = Annotator::new().show_panel(false).render(&frame, Some(&snapshot));
        let bg = rendered.get_pixel(u32::try_from(640 - PANEL_MARGIN_RIGHT + 2).unwrap(), 25);
        assert_eq!(*bg, Rgb([0, 0, 0]));
    }

    #[test]
    fn test_small_frames_and_edge_boxes_do_not_panic() {
        let frame = Frame::new(RgbImage::new(32, 24), 0);
        let snapshot = snapshot_with_face(BoundingBox::new(-20, -10, 100, 100));
        let rendered = Annotator::new().render(&frame, Some(&snapshot));
        assert_eq!(rendered.dimensions(), (32, 24));

        let zero = snapshot_with_face(BoundingBox::new(5, 5, 0, 0));
        let _ = Annotator::new().render(&frame, Some(&zero));
    }

    #[test]
    fn test_extreme_boxes_are_clipped() {
        let frame = Frame::new(RgbImage::new(64, 48), 0);
        let annotator = Annotator::new();

        // entirely off-canvas: nothing to draw
        let far_left = snapshot_with_face(BoundingBox::new(i32::MIN, 0, 10, 10));
        let rendered = annotator.render(&frame, Some(&far_left));
        assert_eq!(rendered.as_raw(), frame.image().as_raw());

        // covers far more than the canvas: outline lands on the frame edge
        let huge = snapshot_with_face(BoundingBox::new(0, 0, u32::MAX, u32::MAX));
        let rendered = annotator.show_panel(false).render(&frame, Some(&huge));
        let happy = emotion_color(Emotion::Happy);
        assert_eq!(*rendered.get_pixel(63, 20), happy);
        assert_eq!(*rendered.get_pixel(0, 20), happy);
        assert_eq!(*rendered.get_pixel(30, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_annotate_marks_display_frame() {
        let frame = black_frame();
        let annotator = Annotator::new();
        let plain = annotator.annotate(&frame, None, 80).unwrap();
        assert!(!plain.is_annotated());

        let snapshot = snapshot_with_face(BoundingBox::new(10, 40, 60, 60));
        let marked = annotator.annotate(&frame, Some(&snapshot), 80).unwrap();
        assert!(marked.is_annotated());
    }

    #[test]
    fn test_missing_font_file_is_an_error() {
        assert!(Annotator::from_font_file("/nonexistent/font.ttf").is_err());
    }
}
