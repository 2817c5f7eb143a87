//! Mugshot image cleanup.
//!
//! The booking site stamps a footer strip onto the bottom of each photo;
//! [`BottomCrop`] removes it and re-encodes the result as JPEG.

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

use crate::error::{Result, ScrapeError};

/// Height in pixels of the footer strip removed from every mugshot.
pub const FOOTER_STRIP_PX: u32 = 50;

pub trait ImageTransform: Send + Sync {
    /// Remove `strip_height` pixels from the bottom of the image.
    fn crop(&self, bytes: &[u8], strip_height: u32) -> Result<Bytes>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BottomCrop;

impl ImageTransform for BottomCrop {
    fn crop(&self, bytes: &[u8], strip_height: u32) -> Result<Bytes> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| ScrapeError::Transform(format!("cannot decode image: {e}")))?;

        let (width, height) = (img.width(), img.height());
        if height <= strip_height {
            return Err(ScrapeError::Transform(format!(
                "image is {height}px tall; cannot remove a {strip_height}px strip"
            )));
        }

        // JPEG has no alpha channel.
        let kept = img.crop_imm(0, 0, width, height - strip_height);
        let cropped = DynamicImage::ImageRgb8(kept.to_rgb8());

        let mut out = Cursor::new(Vec::new());
        cropped
            .write_to(&mut out, ImageFormat::Jpeg)
            .map_err(|e| ScrapeError::Transform(format!("cannot encode JPEG: {e}")))?;

        debug!(width, from = height, to = height - strip_height, "Cropped mugshot footer");
        Ok(Bytes::from(out.into_inner()))
    }
}

#[cfg(test)]
pub mod fixtures {
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// A solid-colour PNG of the given size.
    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 80, 40]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }
}
