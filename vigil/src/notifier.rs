//! # Trigger notifications
//!
//! A trigger publishes its events through a [`NotifierHub`]. Dependents (other triggers,
//! filters) register a [`Subscriber`] and get called back on the publishing thread. The hub
//! holds only weak references, and every registration is undone when its [`Subscription`]
//! guard is dropped, so a subscriber that goes away never receives a late callback.

use log::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

/// Receiver of trigger notifications.
///
/// `notify` runs on the publisher's frame loop. Implementations must only record the event
/// (set a flag, signal a condition variable) and return.
pub trait Subscriber: Send + Sync {
    fn notify(&self, subject: &str);
}

/// Publish/subscribe registry of one trigger.
#[derive(Default)]
pub struct NotifierHub {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(u64, Weak<dyn Subscriber>)>>,
}

impl NotifierHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a subscriber.
    ///
    /// The subscriber stays registered until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, subscriber: Arc<dyn Subscriber>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::downgrade(&subscriber)));

        Subscription {
            hub: Arc::downgrade(self),
            id,
        }
    }

    fn unregister(&self, id: u64) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match subscribers.iter().position(|(i, _)| *i == id) {
            Some(idx) => {
                subscribers.remove(idx);
            }
            None => error!("unregister: subscriber {id} not found"),
        }
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `subject` to every registered subscriber.
    ///
    /// The subscriber list is snapshotted first, so subscribers may unregister concurrently.
    pub fn notify(&self, subject: &str) {
        let live = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(_, s)| s.upgrade())
            .collect::<Vec<_>>();

        trace!("notify {} subscribers of {subject}", live.len());

        for s in live {
            s.notify(subject);
        }
    }
}

/// Registration guard returned by [`NotifierHub::register`].
#[must_use = "dropping the subscription unregisters the subscriber"]
pub struct Subscription {
    hub: Weak<NotifierHub>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.id);
        }
    }
}

#[derive(Default)]
struct SignalState {
    pending: bool,
    subject: Option<String>,
}

/// Edge-triggered notification flag.
///
/// Each notification is consumed exactly once, by either [`take`](Self::take) or
/// [`wait_timeout`](Self::wait_timeout).
#[derive(Default)]
pub struct EventSignal {
    state: Mutex<SignalState>,
    cv: Condvar,
}

impl EventSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume a pending notification, without waiting.
    pub fn take(&self) -> bool {
        std::mem::take(&mut self.lock().pending)
    }

    /// Wait up to `timeout` for a notification and consume it.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();

        let (mut guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |s| !s.pending)
            .unwrap_or_else(PoisonError::into_inner);

        std::mem::take(&mut guard.pending)
    }

    /// Subject of the most recent notification.
    pub fn last_subject(&self) -> Option<String> {
        self.lock().subject.clone()
    }
}

impl Subscriber for EventSignal {
    fn notify(&self, subject: &str) {
        let mut state = self.lock();
        state.pending = true;
        state.subject = Some(subject.to_string());
        self.cv.notify_all();
    }
}

/// Whether a trigger is currently recording.
#[derive(Clone, Default)]
pub struct MotionFlag(Arc<AtomicBool>);

impl MotionFlag {
    pub fn check_motion(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, motion: bool) {
        self.0.store(motion, Ordering::Release)
    }
}

/// Handle a dependent uses to follow a trigger.
#[derive(Clone)]
pub struct TriggerLink {
    pub id: String,
    pub hub: Arc<NotifierHub>,
    pub motion: MotionFlag,
}

impl TriggerLink {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            hub: NotifierHub::new(),
            motion: MotionFlag::default(),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Subscription {
        self.hub.register(subscriber)
    }

    pub fn check_motion(&self) -> bool {
        self.motion.check_motion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Default)]
    struct Counter(AtomicU64);

    impl Subscriber for Counter {
        fn notify(&self, _: &str) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn delivers_to_all() {
        let hub = NotifierHub::new();
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());

        let _sa = hub.register(a.clone());
        let _sb = hub.register(b.clone());

        hub.notify("cam");
        hub.notify("cam");

        assert_eq!(a.0.load(Ordering::Relaxed), 2);
        assert_eq!(b.0.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn dropping_guard_unregisters() {
        let hub = NotifierHub::new();
        let a = Arc::new(Counter::default());

        let sub = hub.register(a.clone());
        assert_eq!(hub.len(), 1);

        drop(sub);
        assert!(hub.is_empty());

        hub.notify("cam");
        assert_eq!(a.0.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn dead_subscriber_is_skipped() {
        let hub = NotifierHub::new();
        let a = Arc::new(Counter::default());
        let _sub = hub.register(a);

        // Only the hub's weak reference is left.
        hub.notify("cam");
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn guard_outlives_hub() {
        let hub = NotifierHub::new();
        let sub = hub.register(Arc::new(Counter::default()));
        drop(hub);
        drop(sub);
    }

    #[test]
    fn signal_is_edge_triggered() {
        let signal = EventSignal::new();
        assert!(!signal.take());

        signal.notify("audio");
        signal.notify("audio");
        assert!(signal.take());
        assert!(!signal.take());
        assert_eq!(signal.last_subject().as_deref(), Some("audio"));
    }

    #[test]
    fn signal_wait_times_out() {
        let signal = EventSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn signal_wakes_waiter() {
        let hub = NotifierHub::new();
        let signal = EventSignal::new();
        let _sub = hub.register(signal.clone());

        let publisher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            hub.notify("cam");
        });

        assert!(signal.wait_timeout(Duration::from_secs(10)));
        publisher.join().unwrap();
    }
}
