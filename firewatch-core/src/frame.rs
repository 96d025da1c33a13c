use chrono::{DateTime, Utc};
use image::RgbImage;

/// A decoded camera frame.
///
/// Owned by whichever queue slot holds it; nothing keeps a copy once it has
/// been handed to the annotation stage.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Zero-sized frames come from broken decodes and are never processed.
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}
