//! Draw detections over the video.
//!
//! Every render first lays the batch out as an `Overlay` and then paints that overlay onto
//! a transparent surface sized to the frame. Nothing from a previous render survives.

use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};

use super::detector::{BBox, Detection, DetectionBatch};
use super::Frame;
use crate::module::define;
use crate::module::error::ViewerError;

const STROKE: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BADGE: Rgba<u8> = Rgba([255, 0, 0, 255]);
const TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);
const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
const LABEL_PAD: u32 = 2;
// Shipped under asset/font so labels never depend on the host's fonts.
const BUNDLED_FONT: &[u8] = include_bytes!("../../../asset/font/DejaVuSans.ttf");

/// Where a label sits relative to its box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelPlacement {
    Above,
    Inside, // box too close to the top edge
}

/// A class label on its badge.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMark {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: u32,
    pub height: u32,
    pub placement: LabelPlacement,
}

/// One annotated detection.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxMark {
    pub bbox: BBox,
    pub label: LabelMark,
}

/// Everything painted by the last render.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Overlay {
    pub size: (u32, u32),
    pub marks: Vec<BoxMark>,
}

/// Renders detection batches onto a drawing surface.
///
pub struct Annotator {
    surface: Option<RgbaImage>, // None once detached
    font: Option<Font<'static>>,
    label_size: f32,
    overlay: Overlay,
}

impl Annotator {
    /// Annotator with the default surface size. Labels are drawn as plain badges without a font.
    pub fn new(font: Option<Font<'static>>, label_size: f32) -> Self {
        let (w, h) = define::vision::DEFAULT_SURFACE;
        Self {
            surface: Some(RgbaImage::new(w, h)),
            font,
            label_size,
            overlay: Overlay {
                size: (w, h),
                marks: vec![],
            },
        }
    }

    /// Load a TrueType font for labels, falling back to the bundled DejaVu Sans.
    pub fn load_font(path: &str) -> Option<Font<'static>> {
        if let Some(font) = std::fs::read(path).ok().and_then(Font::try_from_vec) {
            return Some(font);
        }
        log::warn!("Label font {} unavailable, using {}", path, define::path::LABEL_FONT);
        let font = Font::try_from_bytes(BUNDLED_FONT);
        if font.is_none() {
            log::error!("Bundled label font is corrupt, labels drawn without text");
        }
        font
    }

    /// Paint a batch on a surface resized to `size`, replacing whatever was there.
    pub fn render(&mut self, batch: &DetectionBatch, size: (u32, u32)) -> Result<&Overlay, ViewerError> {
        let (w, h) = size;
        if w == 0 || h == 0 {
            return Err(ViewerError::RenderSurfaceMissing);
        }
        let marks: Vec<BoxMark> = batch.iter().map(|det| self.layout(det)).collect();
        let surface = self
            .surface
            .as_mut()
            .ok_or(ViewerError::RenderSurfaceMissing)?;

        if surface.dimensions() != size {
            *surface = RgbaImage::new(w, h);
        } else {
            surface.pixels_mut().for_each(|p| *p = CLEAR);
        }

        let scale = Scale::uniform(self.label_size);
        for mark in &marks {
            stroke_rect(surface, &mark.bbox, define::vision::STROKE_WIDTH);
            paint_label(surface, &mark.label, self.font.as_ref(), scale);
        }

        self.overlay = Overlay { size, marks };
        Ok(&self.overlay)
    }

    /// The overlay of the last render.
    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// The drawing surface, if attached.
    pub fn surface(&self) -> Option<&RgbaImage> {
        self.surface.as_ref()
    }

    /// The frame with the current surface composited on top.
    pub fn annotated(&self, frame: &Frame) -> Option<RgbaImage> {
        let surface = self.surface.as_ref()?;
        let mut base = DynamicImage::ImageRgb8(frame.image.clone()).to_rgba8();
        image::imageops::overlay(&mut base, surface, 0, 0);
        Some(base)
    }

    /// Drop the surface. Later renders fail with `RenderSurfaceMissing`.
    pub fn detach(&mut self) {
        self.surface = None;
        self.overlay = Overlay::default();
    }

    fn layout(&self, det: &Detection) -> BoxMark {
        let text = det.class_name.clone();
        let text_width = match &self.font {
            Some(font) => text_size(Scale::uniform(self.label_size), font, &text).0.max(0) as u32,
            None => (text.chars().count() as f32 * self.label_size * 0.6).ceil() as u32,
        };
        let width = text_width + 2 * LABEL_PAD;
        let height = self.label_size.ceil() as u32 + 2 * LABEL_PAD;

        let (placement, y) = if det.bbox.y > define::vision::LABEL_TOP_MARGIN {
            (LabelPlacement::Above, (det.bbox.y - height as f32).max(0.0))
        } else {
            (LabelPlacement::Inside, det.bbox.y)
        };
        BoxMark {
            bbox: det.bbox,
            label: LabelMark {
                text,
                x: det.bbox.x,
                y,
                width,
                height,
                placement,
            },
        }
    }
}

/// Draw a hollow box `width` pixels thick, growing inwards.
fn stroke_rect(img: &mut RgbaImage, bbox: &BBox, width: u32) {
    let (x, y) = (bbox.x.round() as i32, bbox.y.round() as i32);
    let (w, h) = (bbox.width.round() as i64, bbox.height.round() as i64);
    for t in 0..width as i64 {
        let (rw, rh) = (w - 2 * t, h - 2 * t);
        if rw <= 0 || rh <= 0 {
            break;
        }
        let rect = Rect::at(x + t as i32, y + t as i32).of_size(rw as u32, rh as u32);
        draw_hollow_rect_mut(img, rect, STROKE);
    }
}

fn paint_label(img: &mut RgbaImage, label: &LabelMark, font: Option<&Font<'static>>, scale: Scale) {
    let (x, y) = (label.x.round() as i32, label.y.round() as i32);
    draw_filled_rect_mut(img, Rect::at(x, y).of_size(label.width, label.height), BADGE);
    if let Some(font) = font {
        let pad = LABEL_PAD as i32;
        draw_text_mut(img, TEXT, x + pad, y + pad, scale, font, &label.text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn person() -> DetectionBatch {
        DetectionBatch::filter(
            vec![Detection::new("person", 0.92, BBox::new(10.0, 10.0, 50.0, 100.0))],
            0.5,
        )
    }

    #[test]
    fn render_person_test() {
        let mut annotator = Annotator::new(None, 16.0);
        let overlay = annotator.render(&person(), (640, 480)).unwrap().clone();
        assert_eq!(overlay.size, (640, 480));
        assert_eq!(overlay.marks.len(), 1);
        assert_eq!(overlay.marks[0].bbox, BBox::new(10.0, 10.0, 50.0, 100.0));
        assert_eq!(overlay.marks[0].label.text, "person");
        // Top edge within 10 px of the surface top: label goes inside.
        assert_eq!(overlay.marks[0].label.placement, LabelPlacement::Inside);
        assert_eq!(overlay.marks[0].label.y, 10.0);

        let surface = annotator.surface().unwrap();
        assert_eq!(*surface.get_pixel(10, 60), STROKE); // left edge
        assert_eq!(*surface.get_pixel(59, 60), STROKE); // right edge
        assert_eq!(*surface.get_pixel(30, 60), CLEAR); // inside the box
    }

    #[test]
    fn render_clears_previous_test() {
        let mut annotator = Annotator::new(None, 16.0);
        annotator.render(&person(), (640, 480)).unwrap();
        let overlay = annotator.render(&DetectionBatch::default(), (640, 480)).unwrap();
        assert!(overlay.marks.is_empty());
        assert!(annotator.surface().unwrap().pixels().all(|p| *p == CLEAR));

        let moved = DetectionBatch::filter(
            vec![Detection::new("dog", 0.8, BBox::new(200.0, 200.0, 40.0, 40.0))],
            0.5,
        );
        annotator.render(&person(), (640, 480)).unwrap();
        annotator.render(&moved, (640, 480)).unwrap();
        let surface = annotator.surface().unwrap();
        assert_eq!(*surface.get_pixel(10, 60), CLEAR);
        assert_eq!(*surface.get_pixel(200, 220), STROKE);
    }

    #[test]
    fn label_above_test() {
        let mut annotator = Annotator::new(None, 16.0);
        let batch = DetectionBatch::filter(
            vec![
                Detection::new("cup", 0.7, BBox::new(100.0, 60.0, 30.0, 30.0)),
                Detection::new("cup", 0.6, BBox::new(300.0, 11.0, 30.0, 30.0)),
            ],
            0.5,
        );
        let overlay = annotator.render(&batch, (640, 480)).unwrap();
        let label = &overlay.marks[0].label;
        assert_eq!(label.placement, LabelPlacement::Above);
        assert_eq!(label.height, 20);
        assert_eq!(label.y, 40.0);
        // Above, clamped to the surface top.
        assert_eq!(overlay.marks[1].label.placement, LabelPlacement::Above);
        assert_eq!(overlay.marks[1].label.y, 0.0);
    }

    #[test]
    fn surface_tracks_frame_size_test() {
        let mut annotator = Annotator::new(None, 16.0);
        assert_eq!(annotator.surface().unwrap().dimensions(), (640, 480));
        annotator.render(&person(), (320, 240)).unwrap();
        assert_eq!(annotator.surface().unwrap().dimensions(), (320, 240));
        annotator.render(&person(), (1280, 720)).unwrap();
        assert_eq!(annotator.surface().unwrap().dimensions(), (1280, 720));
    }

    #[test]
    fn surface_missing_test() {
        let mut annotator = Annotator::new(None, 16.0);
        assert!(matches!(
            annotator.render(&person(), (0, 480)),
            Err(ViewerError::RenderSurfaceMissing)
        ));
        annotator.detach();
        assert!(matches!(
            annotator.render(&person(), (640, 480)),
            Err(ViewerError::RenderSurfaceMissing)
        ));
        assert!(annotator
            .annotated(&Frame::new(RgbImage::new(640, 480)))
            .is_none());
    }

    #[test]
    fn annotated_frame_test() {
        let mut annotator = Annotator::new(None, 16.0);
        annotator.render(&person(), (640, 480)).unwrap();
        let frame = Frame::new(RgbImage::new(640, 480));
        let annotated = annotator.annotated(&frame).unwrap();
        assert_eq!(annotated.dimensions(), (640, 480));
        assert_eq!(*annotated.get_pixel(10, 60), STROKE);
        assert_eq!(*annotated.get_pixel(300, 300), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn missing_font_test() {
        // Falls back to the bundled font.
        assert!(Annotator::load_font("/nonexistent/font.ttf").is_some());
    }

    #[test]
    fn render_label_text_test() {
        let font = Annotator::load_font(define::path::LABEL_FONT);
        assert!(font.is_some());
        let mut annotator = Annotator::new(font, 16.0);
        let overlay = annotator.render(&person(), (640, 480)).unwrap().clone();
        let label = &overlay.marks[0].label;
        assert!(label.width > 2 * LABEL_PAD);

        // The badge is pure red, so any green in it comes from the white glyphs.
        let surface = annotator.surface().unwrap();
        let (x0, y0) = (label.x as u32, label.y as u32);
        let mut glyph_pixels = 0;
        let mut white_pixels = 0;
        for y in y0..y0 + label.height {
            for x in x0..x0 + label.width {
                let p = surface.get_pixel(x, y);
                if p[1] > 0 {
                    glyph_pixels += 1;
                }
                if p[1] >= 250 && p[2] >= 250 {
                    white_pixels += 1;
                }
            }
        }
        assert!(glyph_pixels > 20, "only {} glyph pixels", glyph_pixels);
        assert!(white_pixels > 0);
        // The padding corner stays badge colored.
        assert_eq!(*surface.get_pixel(x0, y0), BADGE);
    }
}
