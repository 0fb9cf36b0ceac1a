//! Scene images: a calibrated color frame plus the helpers that produce the
//! grayscale buffers the dense pipeline works on.

use crate::camera::Camera;
use crate::{Error, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// A calibrated input image.
#[derive(Debug, Clone)]
pub struct SceneImage {
    pub id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Full-resolution calibration.
    pub camera: Camera,
    pub color: Option<RgbImage>,
    /// Optional label image for the ignore mask.
    pub mask: Option<GrayImage>,
}

impl SceneImage {
    pub fn new(id: u32, name: impl Into<String>, width: u32, height: u32, camera: Camera) -> Self {
        Self {
            id,
            name: name.into(),
            width,
            height,
            camera,
            color: None,
            mask: None,
        }
    }

    pub fn with_color(mut self, color: RgbImage) -> Self {
        debug_assert_eq!((color.width(), color.height()), (self.width, self.height));
        self.color = Some(color);
        self
    }

    pub fn with_mask(mut self, mask: GrayImage) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Target size of this image resized by `scale`.
    pub fn size_at_scale(&self, scale: f64) -> (u32, u32) {
        (
            ((self.width as f64 * scale).round() as u32).max(1),
            ((self.height as f64 * scale).round() as u32).max(1),
        )
    }

    /// Grayscale buffer at the given scale, together with the camera rebuilt
    /// for the resized frame.
    pub fn gray_at_scale(&self, scale: f64) -> Result<(GrayImage, Camera)> {
        let color = self
            .color
            .as_ref()
            .ok_or_else(|| Error::ImageLoadFailed(self.id, "color buffer not loaded".into()))?;
        let gray = imageops::grayscale(color);
        if (scale - 1.0).abs() < f64::EPSILON {
            return Ok((gray, self.camera));
        }
        let (w, h) = self.size_at_scale(scale);
        let resized = imageops::resize(&gray, w, h, FilterType::Triangle);
        Ok((resized, self.camera.scaled(scale)))
    }
}
