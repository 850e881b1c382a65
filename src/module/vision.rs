//! Processing related to visual information.
//!
use image::RgbImage;

pub mod annotator;
pub mod camera;
pub mod detector;
pub mod session;

/// One decoded camera frame.
///
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Native resolution of the frame.
    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// A frame is usable once it has pixels in it.
    pub fn is_ready(&self) -> bool {
        let (w, h) = self.size();
        w > 0 && h > 0
    }
}
