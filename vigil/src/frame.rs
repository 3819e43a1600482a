//! # Video frames

use crate::prelude::v1::*;
use bytemuck::{Pod, Zeroable};
use image::ImageFormat;
use std::borrow::Cow;

/// Packed RGB pixel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Grey value of the pixel, the truncated average of the three channels.
    pub fn luma(self) -> u8 {
        ((self.r as u16 + self.g as u16 + self.b as u16) / 3) as u8
    }
}

/// Pixel encoding of a frame's data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// 3 bytes per pixel, row-major.
    Rgb,
    /// Packed 4:2:2 `Y0 U Y1 V`, 2 bytes per pixel.
    Yuyv,
    /// Encoded JPEG stream.
    Jpeg,
}

/// Single captured video frame.
///
/// A frame is immutable once produced. It is moved between the detector, the pre-record buffer
/// and the targets, and cloned only when a copy is explicitly requested (e.g. the
/// `remember-trigger` snapshot).
#[derive(Clone, Debug)]
pub struct Frame {
    ts: u64,
    width: usize,
    height: usize,
    encoding: Encoding,
    data: Vec<u8>,
}

impl Frame {
    /// Create a new frame.
    ///
    /// # Arguments
    ///
    /// * `ts` - capture timestamp in microseconds.
    /// * `width` - width of the frame in pixels.
    /// * `height` - height of the frame in pixels.
    /// * `encoding` - encoding of `data`.
    /// * `data` - pixel data. For raw encodings its length must match the dimensions.
    pub fn new(
        ts: u64,
        width: usize,
        height: usize,
        encoding: Encoding,
        data: Vec<u8>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("frame dimensions must be non-zero ({width}x{height})");
        }

        let expected = match encoding {
            Encoding::Rgb => Some(width * height * 3),
            Encoding::Yuyv => {
                if width % 2 != 0 {
                    bail!("YUYV frames must have an even width (got {width})");
                }
                Some(width * height * 2)
            }
            Encoding::Jpeg => None,
        };

        match expected {
            Some(len) if len != data.len() => Err(anyhow!(
                "{encoding:?} frame of {width}x{height} needs {len} bytes, got {}",
                data.len()
            )),
            _ if data.is_empty() => Err(anyhow!("empty frame data")),
            _ => Ok(Self {
                ts,
                width,
                height,
                encoding,
                data,
            }),
        }
    }

    /// Create an RGB frame.
    pub fn from_rgb(ts: u64, width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        Self::new(ts, width, height, Encoding::Rgb, data)
    }

    /// Create an RGB frame where every pixel is produced by `f(x, y)`.
    pub fn from_fn(
        ts: u64,
        width: usize,
        height: usize,
        mut f: impl FnMut(usize, usize) -> Rgb,
    ) -> Result<Self> {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect::<Vec<_>>();

        Self::from_rgb(ts, width, height, bytemuck::cast_slice(&pixels).to_vec())
    }

    pub fn ts(&self) -> u64 {
        self.ts
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Get width and height of the frame.
    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Raw data in the frame's own encoding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// RGB pixels, if the frame is RGB encoded.
    pub fn pixels(&self) -> Option<&[Rgb]> {
        match self.encoding {
            Encoding::Rgb => Some(bytemuck::cast_slice(&self.data)),
            _ => None,
        }
    }

    /// Get the frame as planar RGB data.
    ///
    /// This borrows if the frame is already RGB, and converts otherwise.
    pub fn to_rgb(&self) -> Result<Cow<'_, [u8]>> {
        match self.encoding {
            Encoding::Rgb => Ok(Cow::Borrowed(&self.data)),
            Encoding::Yuyv => Ok(Cow::Owned(yuyv_to_rgb(&self.data))),
            Encoding::Jpeg => {
                let img = image::load_from_memory_with_format(&self.data, ImageFormat::Jpeg)?
                    .to_rgb8();

                if (img.width() as usize, img.height() as usize) != self.dim() {
                    bail!(
                        "JPEG is {}x{}, frame claims {}x{}",
                        img.width(),
                        img.height(),
                        self.width,
                        self.height
                    );
                }

                Ok(Cow::Owned(img.into_raw()))
            }
        }
    }

    /// Convert the frame to RGB, keeping only that encoding.
    pub fn into_rgb(self) -> Result<Self> {
        match self.encoding {
            Encoding::Rgb => Ok(self),
            _ => {
                let data = self.to_rgb()?.into_owned();
                Self::from_rgb(self.ts, self.width, self.height, data)
            }
        }
    }

    /// Write the grey value of every pixel into `out`.
    ///
    /// `out` is resized to `width * height`.
    pub fn luma_into(&self, out: &mut Vec<u8>) -> Result<()> {
        luma_from_rgb(&self.to_rgb()?, out);
        Ok(())
    }
}

/// Write the grey value of every pixel of packed RGB data into `out`.
pub fn luma_from_rgb(rgb: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.extend(rgb.chunks_exact(3).map(|p| Rgb::new(p[0], p[1], p[2]).luma()));
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 integer YUYV to RGB conversion.
fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(yuyv.len() / 2 * 3);

    for chunk in yuyv.chunks_exact(4) {
        let d = chunk[1] as i32 - 128;
        let e = chunk[3] as i32 - 128;

        for y in [chunk[0], chunk[2]] {
            let c = y as i32 - 16;
            out.push(clamp_u8((298 * c + 409 * e + 128) >> 8));
            out.push(clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8));
            out.push(clamp_u8((298 * c + 516 * d + 128) >> 8));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_length() {
        assert!(Frame::from_rgb(0, 4, 4, vec![0; 47]).is_err());
        assert!(Frame::new(0, 3, 2, Encoding::Yuyv, vec![0; 12]).is_err());
        assert!(Frame::from_rgb(0, 0, 4, vec![]).is_err());
    }

    #[test]
    fn luma_is_truncated_average() {
        let frame = Frame::from_fn(0, 2, 1, |x, _| {
            if x == 0 {
                Rgb::new(10, 20, 31)
            } else {
                Rgb::new(255, 255, 254)
            }
        })
        .unwrap();

        let mut luma = vec![];
        frame.luma_into(&mut luma).unwrap();
        assert_eq!(luma, vec![20, 254]);
    }

    #[test]
    fn yuyv_grey_converts_to_grey() {
        // Y=126 with neutral chroma is mid grey.
        let frame = Frame::new(7, 2, 1, Encoding::Yuyv, vec![126, 128, 126, 128]).unwrap();
        let rgb = frame.into_rgb().unwrap();

        assert_eq!(rgb.encoding(), Encoding::Rgb);
        assert_eq!(rgb.ts(), 7);

        let px = rgb.pixels().unwrap();
        assert_eq!(px[0], px[1]);
        assert_eq!(px[0].r, px[0].g);
        assert_eq!(px[0].g, px[0].b);
        assert!((px[0].r as i32 - 128).abs() <= 2);
    }

    #[test]
    fn jpeg_round_trips_dimensions() {
        let img = image::RgbImage::from_pixel(8, 4, image::Rgb([200, 100, 50]));
        let mut jpeg = std::io::Cursor::new(vec![]);
        img.write_to(&mut jpeg, ImageFormat::Jpeg).unwrap();

        let frame = Frame::new(0, 8, 4, Encoding::Jpeg, jpeg.into_inner()).unwrap();
        let rgb = frame.to_rgb().unwrap();
        assert_eq!(rgb.len(), 8 * 4 * 3);

        let wrong = Frame::new(0, 4, 4, Encoding::Jpeg, frame.data().to_vec()).unwrap();
        assert!(wrong.to_rgb().is_err());
    }
}
