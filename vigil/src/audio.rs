//! # Audio level triggers
//!
//! An [`AudioTrigger`] listens to a microphone and notifies its subscribers whenever enough loud
//! samples were heard within a tenth of a second. Motion triggers subscribe to it through
//! [`MotionTrigger::listen_to`], and treat the notification like detected motion.

use crate::prelude::v1::*;
use log::*;
use std::sync::Arc;
use std::time::Duration;

/// Mono PCM sample source.
pub trait AudioSource: Send {
    fn samplerate(&self) -> u32;

    /// Read exactly `n` samples, blocking until they are available.
    fn read_mono(&mut self, n: usize) -> Result<Vec<i16>>;
}

/// Loudness trigger.
pub struct AudioTrigger {
    id: String,
    source: Box<dyn AudioSource>,
    threshold: u16,
    min_n_triggers: usize,
    hub: Arc<NotifierHub>,
}

impl AudioTrigger {
    /// Create a trigger.
    ///
    /// # Arguments
    ///
    /// * `threshold` - absolute sample value at which a sample counts as loud.
    /// * `min_n_triggers` - number of loud samples per read needed to notify.
    pub fn new(
        id: &str,
        source: Box<dyn AudioSource>,
        threshold: u16,
        min_n_triggers: usize,
    ) -> Self {
        Self {
            id: id.to_string(),
            source,
            threshold,
            min_n_triggers,
            hub: NotifierHub::new(),
        }
    }

    /// Publishing hub, for [`MotionTrigger::listen_to`].
    pub fn hub(&self) -> &Arc<NotifierHub> {
        &self.hub
    }

    /// Evaluate a block of samples. Returns whether subscribers were notified.
    pub fn process(&self, samples: &[i16]) -> bool {
        let loud = samples
            .iter()
            .filter(|s| s.unsigned_abs() >= self.threshold)
            .count();

        trace!("{}: {loud}/{} loud samples", self.id, samples.len());

        if loud >= self.min_n_triggers {
            debug!("{}: audio trigger ({loud} samples)", self.id);
            self.hub.notify(&self.id);
            true
        } else {
            false
        }
    }
}

impl Trigger for AudioTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&mut self, ctl: &Control) -> Result<()> {
        let n = (self.source.samplerate() / 10).max(1) as usize;

        info!("{}: listening ({n} samples per read)", self.id);

        while ctl.pause_check() {
            match self.source.read_mono(n) {
                Ok(samples) => {
                    self.process(&samples);
                }
                Err(e) => {
                    warn!("{}: cannot read audio: {e:#}", self.id);
                    ctl.sleep(Duration::from_millis(100));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tone {
        amplitude: i16,
        reads: Arc<AtomicUsize>,
    }

    impl AudioSource for Tone {
        fn samplerate(&self) -> u32 {
            8000
        }

        fn read_mono(&mut self, n: usize) -> Result<Vec<i16>> {
            assert_eq!(n, 800);
            self.reads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
            Ok((0..n)
                .map(|i| if i % 2 == 0 { self.amplitude } else { -self.amplitude })
                .collect())
        }
    }

    fn trigger(threshold: u16, min_n_triggers: usize) -> AudioTrigger {
        AudioTrigger::new(
            "mic",
            Box::new(Tone {
                amplitude: 0,
                reads: Default::default(),
            }),
            threshold,
            min_n_triggers,
        )
    }

    #[test]
    fn counts_loud_samples() {
        let t = trigger(1000, 3);
        let signal = EventSignal::new();
        let _sub = t.hub().register(signal.clone());

        assert!(!t.process(&[999, -999, 0, 1000, -1000]));
        assert!(!signal.take());

        assert!(t.process(&[999, -1000, 0, 1000, i16::MIN]));
        assert!(signal.take());
        assert_eq!(signal.last_subject().as_deref(), Some("mic"));
    }

    #[test]
    fn starts_motion_recording() {
        use crate::params::{motion_defaults, PRE_RECORD_DURATION};

        let mic = trigger(100, 1);

        let params = Arc::new(motion_defaults());
        params.set(PRE_RECORD_DURATION, 0).unwrap();

        let target = RecordingTarget::default();
        let mut cam = MotionTrigger::new(
            "cam",
            ScriptedSource::new([grey(8, 8, 0)]),
            params,
            MotionDetector::builtin(),
            Arc::new(MemoryEventLog::new()),
            Arc::new(MetaBoard::new()),
        )
        .with_targets(vec![Box::new(target.clone())])
        .with_warm_up(0);

        cam.listen_to(mic.hub());
        cam.warm_up(&Control::default()).unwrap();

        mic.process(&[500]);
        cam.process_frame(grey(8, 8, 0), true).unwrap();

        assert_eq!(target.starts(), 1);
    }

    #[test]
    fn runs_on_worker() {
        let reads = Arc::new(AtomicUsize::new(0));
        let t = AudioTrigger::new(
            "mic",
            Box::new(Tone {
                amplitude: 2000,
                reads: reads.clone(),
            }),
            1000,
            10,
        );

        let signal = EventSignal::new();
        let _sub = t.hub().register(signal.clone());

        let worker = TriggerWorker::spawn(t).unwrap();
        assert!(signal.wait_timeout(Duration::from_secs(10)));
        worker.stop();

        assert!(reads.load(Ordering::SeqCst) > 0);
    }
}
