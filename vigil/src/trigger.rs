//! # Motion triggered recording
//!
//! [`MotionTrigger`] runs the frame loop of one camera. Every frame goes through the
//! [`MotionDetector`], and the result drives a small hysteretic state machine:
//!
//! * Motion has to be seen on `min-n-frames` consecutive frames before recording starts.
//! * A recording stops once more than `min-duration` frames without motion were seen.
//! * After a recording stopped, the next `mute-duration` frames are ignored.
//!
//! Independently of the state, every frame is kept in the pre-record buffer, whose contents are
//! handed to the first target when a recording starts.

use crate::exec::ScriptSlot;
use crate::notifier::Subscription;
use crate::params::*;
use crate::prelude::v1::*;
use crate::worker::Timer;
use log::*;
use nalgebra as na;
use std::sync::Arc;

/// Coarse state of a trigger, derived from [`TriggerState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Waiting for motion.
    Armed,
    /// Motion seen, but not on enough consecutive frames yet.
    Accumulating,
    Recording,
    /// Recording, but motion stopped and the quiet frames are being counted.
    Stopping,
    /// Ignoring motion after a recording ended.
    Muted,
}

/// Counters of the recording state machine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TriggerState {
    pub recording: bool,
    pub accumulate_count: i64,
    pub stop_count: i64,
    pub mute_count: i64,
    pub current_event: Option<EventId>,
}

impl TriggerState {
    pub fn mode(&self) -> Mode {
        if self.mute_count > 0 {
            Mode::Muted
        } else if self.recording && self.stop_count > 0 {
            Mode::Stopping
        } else if self.recording {
            Mode::Recording
        } else if self.accumulate_count > 0 {
            Mode::Accumulating
        } else {
            Mode::Armed
        }
    }
}

/// Compute the pan/tilt angle that points the camera towards `centroid`.
///
/// The angle for the centroid is derived from its offset from the frame centre (the frame edge
/// being 180 degrees), and then blended with the current angle using the damping factors.
///
/// # Arguments
///
/// * `centroid` - centre of motion in pixels.
/// * `dim` - frame width and height.
/// * `current` - current pan and tilt.
/// * `factors` - pan and tilt damping factors.
pub fn steer(
    centroid: na::Point2<f64>,
    (width, height): (usize, usize),
    (cur_pan, cur_tilt): (f64, f64),
    (pan_factor, tilt_factor): (f64, f64),
) -> (f64, f64) {
    let hw = (width / 2).max(1) as f64;
    let hh = (height / 2).max(1) as f64;

    let new_pan = (centroid.x - hw) * 180.0 / hw;
    let new_tilt = (centroid.y - hh) * 180.0 / hh;

    (
        (new_pan - cur_pan) * pan_factor + cur_pan,
        (new_tilt - cur_tilt) * tilt_factor + cur_tilt,
    )
}

/// Frame differencing recording trigger.
pub struct MotionTrigger {
    id: String,
    source: Arc<dyn Source>,
    params: Arc<ParameterSet>,
    detector: MotionDetector,
    targets: Vec<Box<dyn Target>>,
    event_log: Arc<dyn EventLog>,
    meta: Arc<dyn MetaStore>,
    schedule: Option<Arc<dyn Schedule>>,
    scripts: Arc<dyn ScriptRunner>,
    exec_start: ScriptSlot,
    exec_end: ScriptSlot,
    link: TriggerLink,
    signal: Arc<EventSignal>,
    _subscriptions: Vec<Subscription>,
    prerecord: PreRecordBuffer,
    state: TriggerState,
    warm_up: usize,
    last_ts: u64,
}

impl MotionTrigger {
    /// Create a trigger.
    ///
    /// The trigger has no targets, no schedule (always armed), no script hooks and a warm-up of
    /// 10 frames until configured otherwise.
    pub fn new(
        id: &str,
        source: Arc<dyn Source>,
        params: Arc<ParameterSet>,
        detector: MotionDetector,
        event_log: Arc<dyn EventLog>,
        meta: Arc<dyn MetaStore>,
    ) -> Self {
        Self {
            id: id.to_string(),
            source,
            params,
            detector,
            targets: vec![],
            event_log,
            meta,
            schedule: None,
            scripts: Arc::new(ShellRunner),
            exec_start: ScriptSlot::default(),
            exec_end: ScriptSlot::default(),
            link: TriggerLink::new(id),
            signal: EventSignal::new(),
            _subscriptions: vec![],
            prerecord: PreRecordBuffer::new(),
            state: TriggerState::default(),
            warm_up: 10,
            last_ts: 0,
        }
    }

    pub fn with_targets(mut self, targets: Vec<Box<dyn Target>>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_warm_up(mut self, frames: usize) -> Self {
        self.warm_up = frames;
        self
    }

    pub fn with_schedule(mut self, schedule: Arc<dyn Schedule>) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Run `exec_start` when a recording starts and `exec_end` when it stops.
    ///
    /// Empty paths disable the respective hook.
    pub fn with_scripts(
        mut self,
        runner: Arc<dyn ScriptRunner>,
        exec_start: &str,
        exec_end: &str,
    ) -> Self {
        self.scripts = runner;
        self.exec_start = ScriptSlot::new(exec_start);
        self.exec_end = ScriptSlot::new(exec_end);
        self
    }

    /// Treat notifications published through `hub` as motion.
    ///
    /// This is how audio triggers and other external signals start recordings. The subscription
    /// lasts as long as the trigger.
    pub fn listen_to(&mut self, hub: &Arc<NotifierHub>) {
        self._subscriptions.push(hub.register(self.signal.clone()));
    }

    /// Handle for dependents of this trigger.
    pub fn link(&self) -> TriggerLink {
        self.link.clone()
    }

    pub fn state(&self) -> &TriggerState {
        &self.state
    }

    pub fn prerecord_len(&self) -> usize {
        self.prerecord.len()
    }

    /// Consume the warm-up frames.
    ///
    /// At least one frame is always read, it is used to learn the resolution. Returns `false` if
    /// a stop was requested before that.
    pub fn warm_up(&mut self, ctl: &Control) -> Result<bool> {
        let needed = self.warm_up.max(1);
        let mut seen = 0;
        let mut last = None;

        info!("{}: warming up ({needed} frames)", self.id);

        while seen < needed {
            if ctl.should_stop() {
                return Ok(false);
            }

            if let Some(frame) = self.source.get_frame(true, self.last_ts) {
                self.last_ts = frame.ts();
                seen += 1;
                last = Some(frame);
            }
        }

        if let Some(frame) = last {
            self.detector.prime(&frame)?;
        }

        if let Some((w, h)) = self.detector.dim() {
            info!("{}: {w}x{h}, go!", self.id);
        }

        Ok(true)
    }

    /// Process one frame.
    ///
    /// # Arguments
    ///
    /// * `frame` - next frame from the source.
    /// * `allow` - whether the schedule currently allows recording.
    ///
    /// Fails if the frame resolution differs from the one learned at warm-up.
    pub fn process_frame(&mut self, frame: Frame, allow: bool) -> Result<()> {
        if let Some((w, h)) = self.detector.dim() {
            if frame.dim() != (w, h) {
                bail!(
                    "camera resized from {w}x{h} to {}x{}, aborting",
                    frame.width(),
                    frame.height()
                );
            }
        }

        let detection = match self.detector.process(&frame, &self.params, &*self.meta) {
            Ok(detection) => detection,
            Err(e) => {
                warn!("{}: skipping frame: {e:#}", self.id);
                return Ok(());
            }
        };

        let triggered_by_audio = self.signal.take();
        let start = self.step(&frame, &detection, triggered_by_audio, allow);

        let capacity = self.params.get_int(PRE_RECORD_DURATION).max(0) as usize;
        self.prerecord.push(frame, capacity);

        if start {
            self.start_targets();
        }

        Ok(())
    }

    /// Advance the state machine. Returns whether targets need to be started.
    fn step(
        &mut self,
        frame: &Frame,
        detection: &Detection,
        triggered_by_audio: bool,
        allow: bool,
    ) -> bool {
        let pan_tilt = self.params.get_bool(PAN_TILT) && self.source.has_pan_tilt();
        let pct = detection.stats.percent_changed;

        if self.state.mute_count > 0 {
            debug!("{}: mute", self.id);

            self.state.mute_count -= 1;

            if self.state.mute_count == 0 && pan_tilt {
                self.source.pan_tilt(0.0, 0.0);
            }

            false
        } else if (detection.triggered || triggered_by_audio) && allow {
            let min_n_frames = self.params.get_int(MIN_N_FRAMES);

            self.state.accumulate_count += 1;
            self.state.stop_count = 0;

            if self.state.accumulate_count < min_n_frames {
                debug!(
                    "{}: {}/{min_n_frames} motion detected ({pct:.2}% of the pixels changed)",
                    self.id, self.state.accumulate_count
                );
                return false;
            }

            info!(
                "{}: motion detected ({pct:.2}% of the pixels changed)",
                self.id
            );

            // Dependents poll the flag as soon as they are notified.
            self.link.motion.set(true);
            self.link.hub.notify(self.source.id());
            self.exec_start.fire(&*self.scripts, "");

            if self.state.recording {
                return false;
            }

            self.begin_event(frame, detection, pan_tilt);

            true
        } else if self.state.recording {
            self.state.accumulate_count = 0;
            self.state.stop_count += 1;

            debug!("{}: quiet frame {}", self.id, self.state.stop_count);

            if self.state.stop_count > self.params.get_int(MIN_DURATION) {
                self.stop_recording();
                self.state.mute_count = self.params.get_int(MUTE_DURATION).max(0);
            }

            false
        } else {
            self.state.accumulate_count = 0;
            false
        }
    }

    fn begin_event(&mut self, frame: &Frame, detection: &Detection, pan_tilt: bool) {
        let kind = if detection.triggered {
            EventKind::Motion
        } else {
            EventKind::Audio
        };

        let event = self.event_log.register_event(&self.id, kind, "motion start");

        self.state.current_event = match event {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("{}: cannot register event: {e:#}", self.id);
                None
            }
        };

        info!(
            "{}: starting recording (event {:?})",
            self.id, self.state.current_event
        );

        self.state.recording = true;

        // No steering when only an external signal fired.
        if let (true, true, Some(centroid)) =
            (pan_tilt, detection.triggered, detection.stats.centroid)
        {
            let (pan, tilt) = steer(
                centroid,
                frame.dim(),
                self.source.get_pan_tilt(),
                (detection.pan_factor, detection.tilt_factor),
            );

            info!(
                "{}: pan to {pan:.1} ({:.2}), tilt to {tilt:.1} ({:.2})",
                self.id, detection.pan_factor, detection.tilt_factor
            );

            self.source.pan_tilt(pan, tilt);
        }

        let remember = self.params.get_string(REMEMBER_TRIGGER);

        if !remember.is_empty() {
            self.meta.set_bitmap(&remember, (0, frame.clone()));
        }
    }

    fn start_targets(&mut self) {
        let mut prerecord = self.prerecord.take();

        for target in &mut self.targets {
            target.set_on_demand(true);
            target.start(std::mem::take(&mut prerecord), self.state.current_event);
        }
    }

    fn stop_recording(&mut self) {
        info!("{}: stopping (event {:?})", self.id, self.state.current_event);

        if let Some(event) = self.state.current_event.take() {
            if let Err(e) = self.event_log.register_event_end(event) {
                warn!("{}: cannot end event {event}: {e:#}", self.id);
            }
        }

        for target in &mut self.targets {
            target.stop();
        }

        self.exec_end.fire(&*self.scripts, "");

        self.state.recording = false;
        self.link.motion.set(false);
    }

    fn run_loop(&mut self, ctl: &Control) -> Result<()> {
        if !self.warm_up(ctl)? {
            return Ok(());
        }

        while ctl.pause_check() {
            let timer = Timer::default();

            let allow = self.schedule.as_ref().map_or(true, |s| s.is_on());

            let frame = match self.source.get_frame(false, self.last_ts) {
                Some(frame) => frame,
                None => continue,
            };

            self.last_ts = frame.ts();

            self.process_frame(frame, allow)?;

            if let Some(period) = Timer::period(self.params.get_double(MAX_FPS)) {
                timer.sleep(ctl, period);
            }
        }

        Ok(())
    }

    fn shutdown(&mut self) {
        self.prerecord.clear();

        if self.state.recording {
            self.stop_recording();
        }

        self.exec_start.join();
        self.exec_end.join();

        self.source.stop();
    }
}

impl Trigger for MotionTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&mut self, ctl: &Control) -> Result<()> {
        self.source.start();
        let ret = self.run_loop(ctl);
        self.shutdown();
        ret
    }
}
