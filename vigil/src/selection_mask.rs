//! # Region of interest masks

use crate::prelude::v1::*;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::path::Path;

/// Boolean region-of-interest bitmap.
///
/// The mask keeps its native resolution and a single resampled copy for the last resolution it
/// was requested at.
pub struct SelectionMask {
    width: usize,
    height: usize,
    pixels: Vec<bool>,
    cache: Option<(usize, usize, Vec<bool>)>,
}

impl SelectionMask {
    /// Create a mask from a row-major bitmap.
    pub fn from_bitmap(width: usize, height: usize, pixels: Vec<bool>) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("selection mask dimensions must be non-zero");
        }

        if pixels.len() != width * height {
            bail!(
                "selection mask of {width}x{height} needs {} pixels, got {}",
                width * height,
                pixels.len()
            );
        }

        Ok(Self {
            width,
            height,
            pixels,
            cache: None,
        })
    }

    /// Load a mask from an image file.
    ///
    /// A pixel is selected if its grey value is at least 128.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let img = image::open(path)
            .with_context(|| format!("cannot load selection mask {}", path.display()))?
            .to_rgb8();

        let (width, height) = (img.width() as usize, img.height() as usize);

        let pixels = img
            .pixels()
            .map(|p| (p[0] as u16 + p[1] as u16 + p[2] as u16) / 3 >= 128)
            .collect();

        Self::from_bitmap(width, height, pixels)
    }

    /// Native resolution of the mask.
    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Get the mask at the given resolution.
    ///
    /// The native bitmap is returned as is. Any other resolution is resampled and cached until a
    /// different resolution is requested.
    pub fn get_mask(&mut self, width: usize, height: usize) -> &[bool] {
        if (width, height) == (self.width, self.height) {
            return &self.pixels;
        }

        let cached = matches!(&self.cache, Some((w, h, _)) if (*w, *h) == (width, height));

        if !cached {
            self.cache = Some((width, height, self.resample(width, height)));
        }

        match &self.cache {
            Some((_, _, mask)) => mask,
            None => &[],
        }
    }

    fn resample(&self, width: usize, height: usize) -> Vec<bool> {
        if width == 0 || height == 0 {
            return vec![];
        }

        let raw = self
            .pixels
            .iter()
            .map(|&p| if p { 255 } else { 0 })
            .collect();

        let native = match GrayImage::from_raw(self.width as u32, self.height as u32, raw) {
            Some(img) => img,
            None => return vec![false; width * height],
        };

        imageops::resize(&native, width as u32, height as u32, FilterType::Nearest)
            .into_raw()
            .into_iter()
            .map(|v| v >= 128)
            .collect()
    }
}
