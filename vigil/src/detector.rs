//! # Frame differencing motion detection
//!
//! [`MotionDetector`] compares every frame against the one before it and decides whether enough
//! of the picture changed to count as motion. The comparison is either done by the builtin
//! luma differencing, or delegated to an external plugin.

use crate::despeckle::despeckle;
use crate::frame::luma_from_rgb;
use crate::meta::{MOTION_CENTER_X, MOTION_CENTER_Y, MOTION_META, PIXELS_CHANGED};
use crate::params::*;
#[cfg(feature = "plugins")]
use crate::plugins::ExternalDetector;
use crate::prelude::v1::*;
use crate::utils::get_us;
use nalgebra as na;

/// How much of a frame changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeStatistics {
    /// Number of changed (and selected) pixels.
    pub changed: usize,
    /// Number of pixels in the frame.
    pub n_pixels: usize,
    pub percent_changed: f64,
    /// Mean position of the changed pixels.
    ///
    /// Only computed when the full detection path runs (mask, despeckle or pan/tilt configured).
    pub centroid: Option<na::Point2<f64>>,
    /// Mean absolute deviation of the changed pixels from the centroid.
    pub spread: Option<na::Vector2<f64>>,
}

impl ChangeStatistics {
    fn from_count(changed: usize, n_pixels: usize) -> Self {
        Self {
            changed,
            n_pixels,
            percent_changed: percent(changed, n_pixels),
            centroid: None,
            spread: None,
        }
    }

    /// Collect statistics of a difference map.
    ///
    /// # Arguments
    ///
    /// * `diff` - per pixel absolute luma difference.
    /// * `width` - width of the map.
    /// * `noise` - minimum difference that counts as a change.
    /// * `mask` - if set, only pixels with `true` are counted.
    fn from_diff(diff: &[u8], width: usize, noise: i64, mask: Option<&[bool]>) -> Self {
        let changed = || {
            diff.iter()
                .enumerate()
                .filter(move |&(i, _)| mask.map_or(true, |m| m.get(i).copied().unwrap_or(false)))
                .filter(move |&(_, &d)| d as i64 >= noise)
                .map(move |(i, _)| na::Point2::new((i % width) as f64, (i / width) as f64))
        };

        let (count, sum) = changed().fold((0usize, na::Vector2::zeros()), |(c, s), p| {
            (c + 1, s + p.coords)
        });

        let mut stats = Self::from_count(count, diff.len());

        if count > 0 {
            let centroid = na::Point2::from(sum / count as f64);

            let spread = changed()
                .map(|p| (p - centroid).abs())
                .fold(na::Vector2::zeros(), |s, d| s + d)
                / count as f64;

            stats.centroid = Some(centroid);
            stats.spread = Some(spread);
        }

        stats
    }
}

fn percent(changed: usize, n_pixels: usize) -> f64 {
    if n_pixels == 0 {
        0.0
    } else {
        changed as f64 * 100.0 / n_pixels as f64
    }
}

/// Outcome of processing one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub triggered: bool,
    pub stats: ChangeStatistics,
    /// Damping applied when steering pan towards the motion. `1.0` jumps directly.
    pub pan_factor: f64,
    /// Damping applied when steering tilt towards the motion.
    pub tilt_factor: f64,
    /// Text produced by an external detector.
    pub meta: Option<String>,
}

impl Detection {
    fn idle(n_pixels: usize) -> Self {
        Self::new(false, ChangeStatistics::from_count(0, n_pixels))
    }

    fn new(triggered: bool, stats: ChangeStatistics) -> Self {
        Self {
            triggered,
            stats,
            pan_factor: 1.0,
            tilt_factor: 1.0,
            meta: None,
        }
    }
}

enum Backend {
    Builtin,
    #[cfg(feature = "plugins")]
    External(ExternalDetector),
}

/// Per-frame motion detector.
///
/// The detector remembers the previous frame. The first frame it sees (through
/// [`prime`](Self::prime) or [`process`](Self::process)) only becomes the reference. Afterwards
/// every frame must have the same resolution, a resolution change is an error.
pub struct MotionDetector {
    backend: Backend,
    mask: Option<SelectionMask>,
    dim: Option<(usize, usize)>,
    gray_cur: Vec<u8>,
    gray_prev: Vec<u8>,
    rgb_prev: Vec<u8>,
    scratch: Vec<u8>,
}

impl MotionDetector {
    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            mask: None,
            dim: None,
            gray_cur: vec![],
            gray_prev: vec![],
            rgb_prev: vec![],
            scratch: vec![],
        }
    }

    /// Detector using builtin luma differencing.
    pub fn builtin() -> Self {
        Self::with_backend(Backend::Builtin)
    }

    /// Detector delegating to a plugin.
    #[cfg(feature = "plugins")]
    pub fn external(detector: ExternalDetector) -> Self {
        Self::with_backend(Backend::External(detector))
    }

    /// Restrict detection to a region of interest.
    pub fn with_mask(mut self, mask: SelectionMask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn is_external(&self) -> bool {
        !matches!(self.backend, Backend::Builtin)
    }

    /// Resolution learned from the first frame.
    pub fn dim(&self) -> Option<(usize, usize)> {
        self.dim
    }

    /// Use `frame` as the reference for the next comparison.
    pub fn prime(&mut self, frame: &Frame) -> Result<()> {
        let rgb = frame.to_rgb()?;
        luma_from_rgb(&rgb, &mut self.gray_prev);

        if self.is_external() {
            self.rgb_prev.clear();
            self.rgb_prev.extend_from_slice(&rgb);
        }

        self.dim = Some(frame.dim());

        Ok(())
    }

    /// Compare `frame` with the previous one.
    ///
    /// Publishes the percentage of changed pixels (and, when known, the centre of motion or the
    /// plugin output) to `meta`.
    pub fn process(
        &mut self,
        frame: &Frame,
        params: &ParameterSet,
        meta: &dyn MetaStore,
    ) -> Result<Detection> {
        let (width, height) = frame.dim();
        let n_pixels = width * height;

        match self.dim {
            None => {
                self.prime(frame)?;
                return Ok(Detection::idle(n_pixels));
            }
            Some((w, h)) if (w, h) != (width, height) => {
                bail!("resolution changed from {w}x{h} to {width}x{height}")
            }
            _ => {}
        }

        let rgb = frame.to_rgb()?;
        luma_from_rgb(&rgb, &mut self.gray_cur);

        let pan_tilt = params.get_bool(PAN_TILT);

        let detection = match &mut self.backend {
            #[cfg(feature = "plugins")]
            Backend::External(ext) => {
                let mask = self.mask.as_mut().map(|m| m.get_mask(width, height));
                let (triggered, text) =
                    ext.detect(frame.ts(), width, height, &self.rgb_prev, &rgb, mask)?;

                if let Some(text) = &text {
                    meta.set_string(MOTION_META, (0, text.clone()));
                }

                self.rgb_prev.clear();
                self.rgb_prev.extend_from_slice(&rgb);

                Detection {
                    meta: text,
                    ..Detection::new(triggered, ChangeStatistics::from_count(0, n_pixels))
                }
            }
            Backend::Builtin => {
                let noise = params.get_int(NOISE_FACTOR);
                let pattern = params.get_string(DESPECKLE_FILTER);

                let stats = if self.mask.is_some() || pan_tilt || !pattern.is_empty() {
                    self.scratch.clear();
                    self.scratch.extend(
                        self.gray_cur
                            .iter()
                            .zip(&self.gray_prev)
                            .map(|(&c, &p)| c.abs_diff(p)),
                    );

                    if !pattern.is_empty() {
                        self.scratch = despeckle(&self.scratch, width, height, &pattern);
                    }

                    let mask = self.mask.as_mut().map(|m| m.get_mask(width, height));

                    ChangeStatistics::from_diff(&self.scratch, width, noise, mask)
                } else {
                    let changed = self
                        .gray_cur
                        .iter()
                        .zip(&self.gray_prev)
                        .filter(|&(&c, &p)| c.abs_diff(p) as i64 >= noise)
                        .count();

                    ChangeStatistics::from_count(changed, n_pixels)
                };

                let pct = stats.percent_changed;
                let triggered = pct > params.get_double(MIN_PIXELS_CHANGED)
                    && pct < params.get_double(MAX_PIXELS_CHANGED);

                let mut detection = Detection::new(triggered, stats);

                if let (true, true, Some(c), Some(s)) = (
                    triggered,
                    pan_tilt,
                    detection.stats.centroid,
                    detection.stats.spread,
                ) {
                    detection.pan_factor = (c.x - s.x) * 2.0 / width as f64;
                    detection.tilt_factor = (c.y - s.y) * 2.0 / height as f64;
                }

                detection
            }
        };

        std::mem::swap(&mut self.gray_cur, &mut self.gray_prev);

        meta.set_double(PIXELS_CHANGED, (0, detection.stats.percent_changed));

        if let Some(c) = detection.stats.centroid {
            let discard = get_us() + 1_000_000;
            meta.set_int(MOTION_CENTER_X, (discard, c.x as i64));
            meta.set_int(MOTION_CENTER_Y, (discard, c.y as i64));
        }

        Ok(detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rgb;
    use assert_approx_eq::assert_approx_eq;

    fn grey(w: usize, h: usize, v: u8) -> Frame {
        Frame::from_fn(0, w, h, |_, _| Rgb::new(v, v, v)).unwrap()
    }

    /// Grey frame with the rectangle `[x0, x1) x [y0, y1)` brightened by 64.
    fn block(w: usize, h: usize, (x0, x1): (usize, usize), (y0, y1): (usize, usize)) -> Frame {
        Frame::from_fn(1, w, h, |x, y| {
            if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
                Rgb::new(192, 192, 192)
            } else {
                Rgb::new(128, 128, 128)
            }
        })
        .unwrap()
    }

    fn params() -> ParameterSet {
        motion_defaults()
    }

    fn run(det: &mut MotionDetector, params: &ParameterSet, frames: &[Frame]) -> Detection {
        let meta = MetaBoard::new();
        let mut last = None;
        for f in frames {
            last = Some(det.process(f, params, &meta).unwrap());
        }
        last.unwrap()
    }

    #[test]
    fn first_frame_is_reference() {
        let mut det = MotionDetector::builtin();
        let meta = MetaBoard::new();

        let d = det.process(&grey(8, 8, 0), &params(), &meta).unwrap();
        assert!(!d.triggered);
        assert_eq!(det.dim(), Some((8, 8)));
    }

    #[test]
    fn block_change_scenario() {
        let mut det = MotionDetector::builtin();
        let p = params();
        let meta = MetaBoard::new();

        det.process(&grey(64, 64, 128), &p, &meta).unwrap();
        det.process(&grey(64, 64, 128), &p, &meta).unwrap();
        let d = det
            .process(&block(64, 64, (10, 20), (10, 20)), &p, &meta)
            .unwrap();

        assert_eq!(d.stats.changed, 100);
        assert_approx_eq!(d.stats.percent_changed, 100.0 * 100.0 / 4096.0);
        assert!(d.triggered);
        assert_approx_eq!(meta.get_double(PIXELS_CHANGED).unwrap(), 2.44140625);
    }

    #[test]
    fn thresholds_are_strict() {
        // 10x10 frame, every changed pixel is 1%.
        let p = params();
        let one = block(10, 10, (0, 1), (0, 1));
        let two = block(10, 10, (0, 2), (0, 1));

        let mut det = MotionDetector::builtin();
        assert!(!run(&mut det, &p, &[grey(10, 10, 128), one]).triggered);

        let mut det = MotionDetector::builtin();
        assert!(run(&mut det, &p, &[grey(10, 10, 128), two.clone()]).triggered);

        p.set(MAX_PIXELS_CHANGED, 2.0).unwrap();
        let mut det = MotionDetector::builtin();
        assert!(!run(&mut det, &p, &[grey(10, 10, 128), two]).triggered);
    }

    #[test]
    fn below_noise_is_ignored() {
        let p = params();
        p.set(NOISE_FACTOR, 65).unwrap();

        let mut det = MotionDetector::builtin();
        let d = run(
            &mut det,
            &p,
            &[grey(16, 16, 128), block(16, 16, (0, 16), (0, 16))],
        );
        assert_eq!(d.stats.changed, 0);
    }

    #[test]
    fn resolution_change_fails() {
        let mut det = MotionDetector::builtin();
        let meta = MetaBoard::new();

        det.process(&grey(8, 8, 0), &params(), &meta).unwrap();
        assert!(det.process(&grey(8, 4, 0), &params(), &meta).is_err());
    }

    #[test]
    fn mask_excludes_pixels() {
        // Only the left half is selected.
        let mask = SelectionMask::from_bitmap(2, 1, vec![true, false]).unwrap();
        let mut det = MotionDetector::builtin().with_mask(mask);

        let p = params();
        p.set(MIN_PIXELS_CHANGED, 0.0).unwrap();

        let d = run(
            &mut det,
            &p,
            &[grey(16, 16, 128), block(16, 16, (8, 16), (0, 16))],
        );
        assert_eq!(d.stats.changed, 0);
        assert!(!d.triggered);

        let mut det = MotionDetector::builtin()
            .with_mask(SelectionMask::from_bitmap(2, 1, vec![true, false]).unwrap());
        let d = run(
            &mut det,
            &p,
            &[grey(16, 16, 128), block(16, 16, (4, 12), (0, 16))],
        );
        assert_eq!(d.stats.changed, 4 * 16);
    }

    #[test]
    fn despeckle_removes_lone_pixel() {
        let p = params();
        p.set(MIN_PIXELS_CHANGED, 0.0).unwrap();

        let frames = [grey(32, 32, 128), block(32, 32, (16, 17), (16, 17))];

        let mut det = MotionDetector::builtin();
        assert!(run(&mut det, &p, &frames).triggered);

        p.set(DESPECKLE_FILTER, "ed").unwrap();
        let mut det = MotionDetector::builtin();
        assert!(!run(&mut det, &p, &frames).triggered);
    }

    #[test]
    fn pan_tilt_statistics() {
        let p = params();
        p.set(PAN_TILT, true).unwrap();

        let meta = MetaBoard::new();
        let mut det = MotionDetector::builtin();
        det.process(&grey(64, 64, 128), &p, &meta).unwrap();
        let d = det
            .process(&block(64, 64, (10, 20), (30, 40)), &p, &meta)
            .unwrap();

        assert!(d.triggered);

        let c = d.stats.centroid.unwrap();
        let s = d.stats.spread.unwrap();
        assert_approx_eq!(c.x, 14.5);
        assert_approx_eq!(c.y, 34.5);
        assert_approx_eq!(s.x, 2.5);
        assert_approx_eq!(s.y, 2.5);

        assert_approx_eq!(d.pan_factor, (14.5 - 2.5) * 2.0 / 64.0);
        assert_approx_eq!(d.tilt_factor, (34.5 - 2.5) * 2.0 / 64.0);

        assert_eq!(meta.get_int(MOTION_CENTER_X), Some(14));
        assert_eq!(meta.get_int(MOTION_CENTER_Y), Some(34));
    }

    #[test]
    fn fast_path_has_no_centroid() {
        let mut det = MotionDetector::builtin();
        let d = run(
            &mut det,
            &params(),
            &[grey(64, 64, 128), block(64, 64, (10, 20), (10, 20))],
        );
        assert!(d.stats.centroid.is_none());
        assert_approx_eq!(d.pan_factor, 1.0);
    }
}
