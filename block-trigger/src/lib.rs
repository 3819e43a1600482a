//! # Block subdivision motion detector
//!
//! Detector plugin that splits each frame into a grid of blocks, marks the blocks whose average
//! luma changed by at least `threshold`, and triggers when the biggest connected group of marked
//! blocks covers at least `min_size` of the frame.
//!
//! The parameter string is a comma separated list of `key=value` pairs:
//!
//! * `min_size` - fraction of the frame the moving area must cover (default `0.1`).
//! * `subdivide` - how many blocks fit along the side of the smallest moving area (default `4`).
//! * `threshold` - average luma change for a block to count as moving (default `16`).

use log::*;
use nalgebra as na;
use vigil::frame::luma_from_rgb;
use vigil::plugins::PluginDetector;
use vigil::prelude::v1::*;
use vigil::utils::parse_kv;

vigil::define_detector_plugin!(BlockMotion);

/// Block subdivision based motion detector.
///
/// Blocks are of area `min_size / (subdivide ^ 2)` of the frame.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockMotion {
    min_size: f32,
    subdivide: usize,
    threshold: f32,
}

impl Default for BlockMotion {
    fn default() -> Self {
        Self {
            min_size: 0.1,
            subdivide: 4,
            threshold: 16.0,
        }
    }
}

impl BlockMotion {
    /// Number of blocks along each side of the frame.
    pub fn block_dim(&self) -> usize {
        let block_width = self.min_size.sqrt() / self.subdivide as f32;
        (1.0 / block_width).ceil() as usize
    }

    /// Compute which blocks changed between two luma planes.
    ///
    /// Blocks are never smaller than a pixel.
    fn changed_blocks(
        &self,
        width: usize,
        height: usize,
        prev: &[u8],
        cur: &[u8],
        mask: Option<&[u8]>,
    ) -> na::DMatrix<bool> {
        let dim = self.block_dim().min(width).min(height).max(1);

        let mut sums = na::DMatrix::<f32>::zeros(dim, dim);
        let mut counts = na::DMatrix::<u32>::zeros(dim, dim);

        for y in 0..height {
            let by = y * dim / height;

            for x in 0..width {
                let i = y * width + x;

                if mask.map_or(false, |m| m[i] == 0) {
                    continue;
                }

                let bx = x * dim / width;

                sums[(by, bx)] += (cur[i] as f32 - prev[i] as f32).abs();
                counts[(by, bx)] += 1;
            }
        }

        na::DMatrix::from_fn(dim, dim, |y, x| {
            counts[(y, x)] > 0 && sums[(y, x)] / counts[(y, x)] as f32 >= self.threshold
        })
    }

    /// Area in blocks of the biggest 8-connected group of changed blocks.
    fn biggest_area(mut map: na::DMatrix<bool>) -> usize {
        let (rows, cols) = map.shape();
        let mut biggest_area = 0;

        for y in 0..rows {
            for x in 0..cols {
                if !map[(y, x)] {
                    continue;
                }

                let mut area = 0;

                map[(y, x)] = false;
                let mut to_fill = vec![(x, y)];

                while let Some((x, y)) = to_fill.pop() {
                    area += 1;

                    let neighbor_offs = (-1..=1).flat_map(|x| (-1..=1).map(move |y| (x, y)));

                    for (x, y) in neighbor_offs
                        .map(|(ox, oy)| (x as isize + ox, y as isize + oy))
                        .filter(|&(ox, oy)| {
                            (0..cols as isize).contains(&ox) && (0..rows as isize).contains(&oy)
                        })
                        .map(|(x, y)| (x as usize, y as usize))
                    {
                        if map[(y, x)] {
                            to_fill.push((x, y));
                            map[(y, x)] = false;
                        }
                    }
                }

                biggest_area = std::cmp::max(biggest_area, area);
            }
        }

        biggest_area
    }
}

impl PluginDetector for BlockMotion {
    fn new(parameter: &str) -> Result<Self> {
        let mut ret = Self::default();

        for (k, v) in parse_kv(parameter) {
            match k {
                "min_size" => ret.min_size = v.parse()?,
                "subdivide" => ret.subdivide = v.parse()?,
                "threshold" => ret.threshold = v.parse()?,
                _ => bail!("unknown parameter {k}"),
            }
        }

        if !(ret.min_size > 0.0 && ret.min_size <= 1.0) {
            bail!("min_size must be in (0, 1]");
        }

        if ret.subdivide == 0 {
            bail!("subdivide must be positive");
        }

        info!(
            "block detector: {}x{} blocks, min_size={}, threshold={}",
            ret.block_dim(),
            ret.block_dim(),
            ret.min_size,
            ret.threshold
        );

        Ok(ret)
    }

    fn detect(
        &mut self,
        _ts: u64,
        width: usize,
        height: usize,
        prev: &[u8],
        cur: &[u8],
        mask: Option<&[u8]>,
    ) -> (bool, Option<String>) {
        let (mut prev_luma, mut cur_luma) = (vec![], vec![]);
        luma_from_rgb(prev, &mut prev_luma);
        luma_from_rgb(cur, &mut cur_luma);

        let map = self.changed_blocks(width, height, &prev_luma, &cur_luma, mask);

        let total = map.len();
        let area = Self::biggest_area(map);

        trace!("block detector: biggest area {area}/{total}");

        let triggered = area as f32 / total as f32 >= self.min_size;

        (triggered, Some(format!("area={area}/{total}")))
    }
}
