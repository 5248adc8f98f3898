use crate::error::Result;
use image::RgbImage;

/// Decides whether an image may be processed at all.
pub trait ContentFilter: Send + Sync {
    fn is_safe(&self, image: &RgbImage) -> Result<bool>;
}

/// Accepts every image.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ContentFilter for AllowAll {
    fn is_safe(&self, _image: &RgbImage) -> Result<bool> {
        Ok(true)
    }
}
