//! # Cascading triggers
//!
//! A cascading trigger has no detector of its own. It records from its own source whenever an
//! upstream trigger (typically a low resolution stream of the same camera) detects motion, and
//! stops once none of its upstream triggers are recording anymore. Debouncing is left to the
//! upstream triggers.

use crate::notifier::Subscription;
use crate::params::PRE_RECORD_DURATION;
use crate::prelude::v1::*;
use log::*;
use std::sync::Arc;
use std::time::Duration;

/// Time to wait for an upstream notification when not pre-recording.
pub const WAIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Recording trigger slaved to other triggers.
pub struct CascadingTrigger {
    id: String,
    source: Arc<dyn Source>,
    params: Arc<ParameterSet>,
    targets: Vec<Box<dyn Target>>,
    schedule: Option<Arc<dyn Schedule>>,
    upstream: Vec<TriggerLink>,
    signal: Arc<EventSignal>,
    _subscriptions: Vec<Subscription>,
    link: TriggerLink,
    prerecord: PreRecordBuffer,
    with_prerecord: bool,
    recording: bool,
    last_ts: u64,
}

impl CascadingTrigger {
    /// Create a trigger following `upstream`.
    ///
    /// Whether frames are pre-recorded is decided here, from the `pre-motion-record-duration`
    /// parameter. Without pre-recording the trigger does not read from its source at all, and
    /// only waits for notifications.
    pub fn new(
        id: &str,
        source: Arc<dyn Source>,
        params: Arc<ParameterSet>,
        upstream: &[TriggerLink],
    ) -> Self {
        let signal = EventSignal::new();

        let subscriptions = upstream
            .iter()
            .map(|l| l.subscribe(signal.clone()))
            .collect();

        let with_prerecord = params.get_int(PRE_RECORD_DURATION) > 0;

        Self {
            id: id.to_string(),
            source,
            params,
            targets: vec![],
            schedule: None,
            upstream: upstream.to_vec(),
            signal,
            _subscriptions: subscriptions,
            link: TriggerLink::new(id),
            prerecord: PreRecordBuffer::new(),
            with_prerecord,
            recording: false,
            last_ts: 0,
        }
    }

    pub fn with_targets(mut self, targets: Vec<Box<dyn Target>>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_schedule(mut self, schedule: Arc<dyn Schedule>) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Handle for triggers chained after this one.
    pub fn link(&self) -> TriggerLink {
        self.link.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn prerecord_len(&self) -> usize {
        self.prerecord.len()
    }

    /// Run one iteration of the loop.
    pub fn step(&mut self) {
        let allow = self.schedule.as_ref().map_or(true, |s| s.is_on());

        if self.with_prerecord {
            if let Some(frame) = self.source.get_frame(true, self.last_ts) {
                self.last_ts = frame.ts();

                let capacity = self.params.get_int(PRE_RECORD_DURATION).max(0) as usize;
                self.prerecord.push(frame, capacity);

                if self.signal.take() && !self.recording && allow {
                    let prerecord = self.prerecord.take();
                    self.start(prerecord);
                }
            }
        } else if self.signal.wait_timeout(WAIT_TIMEOUT) && !self.recording && allow {
            self.start(vec![]);
        }

        if self.recording && !self.upstream.iter().any(TriggerLink::check_motion) {
            info!("{}: stopping recording", self.id);

            for target in &mut self.targets {
                target.stop();
            }

            self.recording = false;
            self.link.motion.set(false);
        }
    }

    fn start(&mut self, mut prerecord: Vec<Frame>) {
        info!(
            "{}: starting ({} pre-record frames)",
            self.id,
            prerecord.len()
        );

        for target in &mut self.targets {
            target.set_on_demand(true);
            target.start(std::mem::take(&mut prerecord), None);
        }

        self.recording = true;
        self.link.motion.set(true);
        self.link.hub.notify(self.source.id());
    }

    fn shutdown(&mut self) {
        self.prerecord.clear();

        if self.recording {
            for target in &mut self.targets {
                target.stop();
            }
            self.recording = false;
            self.link.motion.set(false);
        }

        self.source.stop();
    }
}

impl Trigger for CascadingTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&mut self, ctl: &Control) -> Result<()> {
        self.source.start();

        while ctl.pause_check() {
            self.step();
        }

        self.shutdown();

        Ok(())
    }
}
