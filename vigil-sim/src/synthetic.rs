//! Synthetic cameras, microphones and recorders.

use log::*;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use vigil::frame::Rgb;
use vigil::prelude::v1::*;
use vigil::utils::get_us;

/// When the simulated scene has something moving in it.
#[derive(Clone, Copy, Debug)]
pub struct Scene {
    pub start: Instant,
    /// Length of one quiet + active cycle.
    pub period: Duration,
    /// Part of the cycle with motion, at the end of it.
    pub active: Duration,
}

impl Scene {
    /// Position of the moving object along its path in `[0, 1)`, if one is visible.
    pub fn object_at(&self, at: Instant) -> Option<f64> {
        let period = self.period.as_secs_f64();
        let phase = at.duration_since(self.start).as_secs_f64() % period;
        let quiet = period - self.active.as_secs_f64();

        (phase >= quiet).then(|| (phase - quiet) / self.active.as_secs_f64())
    }
}

struct CameraState {
    frame_no: u64,
    running: usize,
}

/// Camera looking at a noisy grey wall, with a bright square moving across from time to time.
pub struct SyntheticCamera {
    id: String,
    width: usize,
    height: usize,
    fps: f64,
    noise: u8,
    scene: Scene,
    state: Mutex<CameraState>,
}

impl SyntheticCamera {
    pub fn new(id: &str, (width, height): (usize, usize), fps: f64, scene: Scene) -> Self {
        Self {
            id: id.to_string(),
            width,
            height,
            fps,
            noise: 8,
            scene,
            state: Mutex::new(CameraState {
                frame_no: 0,
                running: 0,
            }),
        }
    }

    fn render(&self, ts: u64, object: Option<f64>) -> Result<Frame> {
        let side = (self.width.min(self.height) / 4).max(1);
        let span = self.width.saturating_sub(side);
        let mut rng = rand::thread_rng();

        let origin = object.map(|pos| ((pos * span as f64) as usize, (self.height - side) / 2));

        Frame::from_fn(ts, self.width, self.height, |x, y| {
            let base = match origin {
                Some((ox, oy)) if (ox..ox + side).contains(&x) && (oy..oy + side).contains(&y) => {
                    220
                }
                _ => 100,
            };
            let v = base + rng.gen_range(0..=self.noise);
            Rgb::new(v, v, v)
        })
    }
}

impl Source for SyntheticCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.running += 1;
        debug!("{}: started ({} users)", self.id, state.running);
    }

    fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.running = state.running.saturating_sub(1);
        debug!("{}: stopped ({} users)", self.id, state.running);
    }

    fn get_frame(&self, _: bool, _: u64) -> Option<Frame> {
        let frame_no = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.frame_no += 1;
            state.frame_no
        };

        let due = self.scene.start + Duration::from_secs_f64(frame_no as f64 / self.fps);

        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }

        match self.render(get_us(), self.scene.object_at(due)) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("{}: {e}", self.id);
                None
            }
        }
    }
}

/// Microphone hearing quiet hiss, and a loud bang once per scene cycle.
pub struct SyntheticMicrophone {
    samplerate: u32,
    scene: Scene,
    started: Instant,
}

impl SyntheticMicrophone {
    pub fn new(samplerate: u32, scene: Scene) -> Self {
        Self {
            samplerate,
            scene,
            started: Instant::now(),
        }
    }
}

impl AudioSource for SyntheticMicrophone {
    fn samplerate(&self) -> u32 {
        self.samplerate
    }

    fn read_mono(&mut self, n: usize) -> Result<Vec<i16>> {
        let length = Duration::from_secs_f64(n as f64 / self.samplerate as f64);
        std::thread::sleep(length);

        let elapsed = self.started.elapsed().as_secs_f64();
        let phase = elapsed % self.scene.period.as_secs_f64();
        let bang = phase < length.as_secs_f64();

        let mut rng = rand::thread_rng();
        let amplitude = if bang { 20000 } else { 200 };

        Ok((0..n).map(|_| rng.gen_range(-amplitude..=amplitude)).collect())
    }
}

/// Recording target that only logs what it would record.
#[derive(Clone)]
pub struct LogTarget {
    name: String,
    recordings: Arc<AtomicUsize>,
}

impl LogTarget {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            recordings: Default::default(),
        }
    }

    pub fn recordings(&self) -> usize {
        self.recordings.load(Ordering::Relaxed)
    }
}

impl Target for LogTarget {
    fn start(&mut self, prerecord: Vec<Frame>, event: Option<EventId>) {
        self.recordings.fetch_add(1, Ordering::Relaxed);
        info!(
            "{}: recording (event {event:?}, {} pre-recorded frames)",
            self.name,
            prerecord.len()
        );
    }

    fn stop(&mut self) {
        info!("{}: recording stopped", self.name);
    }
}
