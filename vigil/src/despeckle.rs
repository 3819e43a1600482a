//! # Morphological despeckling
//!
//! A change map produced by frame differencing is full of isolated pixels caused by sensor
//! noise. This module removes them with a sequence of dilate and erode passes described by a
//! short pattern string:
//!
//! * `d` - dilate with a 5x5 window.
//! * `e` - erode with a 5x5 window.
//! * `D` - dilate with a 9x9 window.
//! * `E` - erode with a 9x9 window.
//!
//! `"de"` closes small holes, `"ed"` removes small blobs.

use crate::prelude::v1::*;
use image::GrayImage;
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};

/// Border width that is cleared after a non-empty pattern. This is the radius of the largest
/// window.
pub const BORDER: usize = 4;

#[derive(Clone, Copy)]
enum Op {
    Dilate,
    Erode,
}

fn parse_op(c: char) -> Option<(Op, u8)> {
    match c {
        'd' => Some((Op::Dilate, 2)),
        'e' => Some((Op::Erode, 2)),
        'D' => Some((Op::Dilate, 4)),
        'E' => Some((Op::Erode, 4)),
        _ => None,
    }
}

/// Check that every character of the pattern is a known operation.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    match pattern.chars().find(|&c| parse_op(c).is_none()) {
        Some(c) => Err(anyhow!("unknown despeckle operation '{c}' in \"{pattern}\"")),
        None => Ok(()),
    }
}

/// Apply a despeckle pattern to a single channel map.
///
/// Unknown pattern characters are ignored. Windows are clipped at the map edges, and after the
/// last pass a border of [`BORDER`] pixels is cleared. The input is left intact and a new map is
/// returned.
///
/// # Arguments
///
/// * `map` - row-major map of `width * height` values.
/// * `width` - width of the map.
/// * `height` - height of the map.
/// * `pattern` - sequence of operations to apply.
pub fn despeckle(map: &[u8], width: usize, height: usize, pattern: &str) -> Vec<u8> {
    debug_assert_eq!(map.len(), width * height);

    if pattern.is_empty() {
        return map.to_vec();
    }

    let image = match GrayImage::from_raw(width as u32, height as u32, map.to_vec()) {
        Some(image) => image,
        None => return map.to_vec(),
    };

    let image = pattern
        .chars()
        .filter_map(parse_op)
        .fold(image, |image, (op, radius)| {
            let mask = Mask::square(radius);
            match op {
                Op::Dilate => grayscale_dilate(&image, &mask),
                Op::Erode => grayscale_erode(&image, &mask),
            }
        });

    let mut out = image.into_raw();
    clear_border(&mut out, width, height);

    out
}

fn clear_border(map: &mut [u8], width: usize, height: usize) {
    for y in 0..height {
        let row = &mut map[(y * width)..((y + 1) * width)];

        if y < BORDER || y + BORDER >= height {
            row.fill(0);
        } else {
            let b = BORDER.min(width);
            row[..b].fill(0);
            row[(width - b)..].fill(0);
        }
    }
}
