//! # Trigger threads
//!
//! Every trigger runs its frame loop on a dedicated thread. The loop checks a shared [`Control`]
//! block at the top of every iteration, which is how the owner pauses, resumes and stops it.

use crate::prelude::v1::*;
use log::*;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Something with a frame loop.
pub trait Trigger: Send + 'static {
    fn id(&self) -> &str;

    /// Run until `ctl` requests a stop, or until an unrecoverable error occurs.
    fn run(&mut self, ctl: &Control) -> Result<()>;
}

#[derive(Default)]
struct ControlState {
    stop: bool,
    paused: bool,
}

/// Cooperative stop and pause flags of a trigger thread.
#[derive(Default)]
pub struct Control {
    state: Mutex<ControlState>,
    cv: Condvar,
}

impl Control {
    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn should_stop(&self) -> bool {
        self.lock().stop
    }

    pub fn stop(&self) {
        self.lock().stop = true;
        self.cv.notify_all();
    }

    pub fn pause(&self) {
        self.lock().paused = true;
        self.cv.notify_all();
    }

    pub fn resume(&self) {
        self.lock().paused = false;
        self.cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Block while paused.
    ///
    /// Returns `false` if the loop should stop.
    pub fn pause_check(&self) -> bool {
        let guard = self
            .cv
            .wait_while(self.lock(), |s| s.paused && !s.stop)
            .unwrap_or_else(PoisonError::into_inner);

        !guard.stop
    }

    /// Sleep for `duration`, waking up early on a stop request.
    ///
    /// Returns `false` if the loop should stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (guard, _) = self
            .cv
            .wait_timeout_while(self.lock(), duration, |s| !s.stop)
            .unwrap_or_else(PoisonError::into_inner);

        !guard.stop
    }
}

/// Paces a loop to a maximum rate.
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Timer {
    /// Period of a loop limited to `max_fps`, or `None` if it is unlimited.
    pub fn period(max_fps: f64) -> Option<Duration> {
        if max_fps > 0.0 && max_fps.is_finite() {
            Some(Duration::from_secs_f64(1.0 / max_fps))
        } else {
            None
        }
    }

    /// Sleep for whatever is left of `target` since the timer was created.
    pub fn sleep(&self, ctl: &Control, target: Duration) -> bool {
        match target.checked_sub(self.start.elapsed()) {
            Some(duration) => ctl.sleep(duration),
            None => !ctl.should_stop(),
        }
    }
}

/// Thread running a [`Trigger`].
///
/// Dropping the worker stops the trigger and waits for its thread.
pub struct TriggerWorker {
    id: String,
    control: Arc<Control>,
    handle: Option<JoinHandle<()>>,
}

impl TriggerWorker {
    pub fn spawn<T: Trigger>(mut trigger: T) -> Result<Self> {
        let id = trigger.id().to_string();
        let control = Arc::new(Control::default());

        let handle = thread::Builder::new().name(id.clone()).spawn({
            let control = control.clone();
            let id = id.clone();
            move || {
                info!("{id}: thread started");
                match trigger.run(&control) {
                    Ok(()) => info!("{id}: thread stopped"),
                    Err(e) => error!("{id}: {e:#}"),
                }
            }
        })?;

        Ok(Self {
            id,
            control,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn control(&self) -> &Arc<Control> {
        &self.control
    }

    pub fn pause(&self) {
        self.control.pause()
    }

    pub fn resume(&self) {
        self.control.resume()
    }

    /// Whether the trigger thread has exited, on its own or after a stop.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the trigger and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.control.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("{}: thread panicked", self.id);
            }
        }
    }
}

impl Drop for TriggerWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Spinner(Arc<AtomicUsize>);

    impl Trigger for Spinner {
        fn id(&self) -> &str {
            "spinner"
        }

        fn run(&mut self, ctl: &Control) -> Result<()> {
            while ctl.pause_check() {
                self.0.fetch_add(1, Ordering::SeqCst);
                ctl.sleep(Duration::from_millis(1));
            }
            Ok(())
        }
    }

    struct Failing;

    impl Trigger for Failing {
        fn id(&self) -> &str {
            "failing"
        }

        fn run(&mut self, _: &Control) -> Result<()> {
            Err(anyhow!("resolution changed"))
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            assert!(start.elapsed() < Duration::from_secs(10));
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn stop_joins() {
        let count = Arc::new(AtomicUsize::new(0));
        let worker = TriggerWorker::spawn(Spinner(count.clone())).unwrap();

        wait_for(|| count.load(Ordering::SeqCst) > 3);
        worker.stop();

        let after = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), after);
    }

    #[test]
    fn pause_halts_progress() {
        let count = Arc::new(AtomicUsize::new(0));
        let worker = TriggerWorker::spawn(Spinner(count.clone())).unwrap();

        wait_for(|| count.load(Ordering::SeqCst) > 0);
        worker.pause();
        // Let an in-flight iteration finish.
        thread::sleep(Duration::from_millis(20));

        let paused = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), paused);

        worker.resume();
        wait_for(|| count.load(Ordering::SeqCst) > paused);

        // Stopping a paused worker must not hang.
        worker.pause();
    }

    #[test]
    fn error_ends_thread() {
        let worker = TriggerWorker::spawn(Failing).unwrap();
        wait_for(|| worker.is_finished());
    }

    #[test]
    fn sleep_is_interruptible() {
        let ctl = Arc::new(Control::default());

        let stopper = {
            let ctl = ctl.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                ctl.stop();
            })
        };

        let start = Instant::now();
        assert!(!ctl.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(10));
        stopper.join().unwrap();
    }

    #[test]
    fn fps_period() {
        assert_eq!(Timer::period(-1.0), None);
        assert_eq!(Timer::period(0.0), None);
        assert_eq!(Timer::period(4.0), Some(Duration::from_millis(250)));
    }
}
