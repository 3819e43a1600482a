//! Fake collaborators shared by the unit tests.

use crate::frame::Rgb;
use crate::prelude::v1::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn grey(w: usize, h: usize, v: u8) -> Frame {
    Frame::from_fn(0, w, h, |_, _| Rgb::new(v, v, v)).unwrap()
}

/// Grey 128 frame with the rectangle `[x0, x1) x [y0, y1)` at 192.
pub fn block(w: usize, h: usize, (x0, x1): (usize, usize), (y0, y1): (usize, usize)) -> Frame {
    Frame::from_fn(0, w, h, |x, y| {
        if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
            Rgb::new(192, 192, 192)
        } else {
            Rgb::new(128, 128, 128)
        }
    })
    .unwrap()
}

/// Source handing out a queue of frames.
pub struct ScriptedSource {
    frames: Mutex<VecDeque<Frame>>,
    pan_tilt: Mutex<Option<(f64, f64)>>,
    has_pan_tilt: bool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Arc<Self> {
        Arc::new(Self::with_pan_tilt(frames, false))
    }

    pub fn with_pan_tilt(frames: impl IntoIterator<Item = Frame>, has_pan_tilt: bool) -> Self {
        Self {
            frames: Mutex::new(frames.into_iter().collect()),
            pan_tilt: Mutex::new(has_pan_tilt.then(|| (0.0, 0.0))),
            has_pan_tilt,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, frame: Frame) {
        self.frames.lock().unwrap().push_back(frame);
    }

    pub fn remaining(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    /// Current angle. `None` for a fixed camera that was never commanded.
    pub fn commanded_pan_tilt(&self) -> Option<(f64, f64)> {
        *self.pan_tilt.lock().unwrap()
    }
}

impl Source for ScriptedSource {
    fn id(&self) -> &str {
        "scripted"
    }

    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn get_frame(&self, _: bool, _: u64) -> Option<Frame> {
        let frame = self.frames.lock().unwrap().pop_front();
        if frame.is_none() {
            std::thread::sleep(Duration::from_millis(1));
        }
        frame
    }

    fn has_pan_tilt(&self) -> bool {
        self.has_pan_tilt
    }

    fn pan_tilt(&self, pan: f64, tilt: f64) {
        *self.pan_tilt.lock().unwrap() = Some((pan, tilt));
    }

    fn get_pan_tilt(&self) -> (f64, f64) {
        self.pan_tilt.lock().unwrap().unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Start {
        prerecord: usize,
        event: Option<EventId>,
    },
    Stop,
}

/// Target recording every call made to it.
#[derive(Clone, Default)]
pub struct RecordingTarget(pub Arc<Mutex<Vec<Call>>>);

impl RecordingTarget {
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Start { .. }))
            .count()
    }

    pub fn stops(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Stop).count()
    }
}

impl Target for RecordingTarget {
    fn start(&mut self, prerecord: Vec<Frame>, event: Option<EventId>) {
        self.0.lock().unwrap().push(Call::Start {
            prerecord: prerecord.len(),
            event,
        });
    }

    fn stop(&mut self) {
        self.0.lock().unwrap().push(Call::Stop);
    }
}
