//! # Collaborator interfaces
//!
//! Everything a trigger talks to but does not own: where frames come from, where recordings go,
//! where events are persisted, when recording is allowed and where cross-component values are
//! published.

use crate::prelude::v1::*;

/// Identifier of a logged event.
pub type EventId = u64;

/// What caused an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub enum EventKind {
    Motion,
    Audio,
}

/// Frame producer, such as a camera.
///
/// A source is shared between all triggers and targets that read from it. `start` and `stop` are
/// reference counted by the implementation.
pub trait Source: Send + Sync {
    fn id(&self) -> &str;

    fn start(&self);

    fn stop(&self);

    /// Get the next frame newer than `last_seen_ts`.
    ///
    /// Returns `None` if no new frame arrived within the source's own timeout. With
    /// `block_on_failure` set, the source may wait longer while it is reconnecting.
    fn get_frame(&self, block_on_failure: bool, last_seen_ts: u64) -> Option<Frame>;

    /// Whether the source can be steered with [`pan_tilt`](Self::pan_tilt).
    fn has_pan_tilt(&self) -> bool {
        false
    }

    /// Command an absolute pan/tilt angle, in degrees.
    fn pan_tilt(&self, _pan: f64, _tilt: f64) {}

    fn get_pan_tilt(&self) -> (f64, f64) {
        (0.0, 0.0)
    }
}

/// Recording or streaming output.
pub trait Target: Send {
    /// Begin capturing.
    ///
    /// # Arguments
    ///
    /// * `prerecord` - frames seen before the trigger fired, oldest first.
    /// * `event` - event the recording belongs to, if one was logged.
    fn start(&mut self, prerecord: Vec<Frame>, event: Option<EventId>);

    fn stop(&mut self);

    /// Switch the target to (or out of) on-demand operation.
    fn set_on_demand(&mut self, _on_demand: bool) {}
}

/// Persistent record of detected events.
pub trait EventLog: Send + Sync {
    fn register_event(&self, trigger_id: &str, kind: EventKind, note: &str) -> Result<EventId>;

    fn register_event_end(&self, event: EventId) -> Result<()>;
}

/// Time-based gate on recording.
pub trait Schedule: Send + Sync {
    fn is_on(&self) -> bool;
}

impl<F: Fn() -> bool + Send + Sync> Schedule for F {
    fn is_on(&self) -> bool {
        self()
    }
}

/// Shared timestamped key/value blackboard.
///
/// Every value is stored together with a discard timestamp (microseconds since the epoch). A
/// value with a non-zero discard timestamp in the past reads as absent.
pub trait MetaStore: Send + Sync {
    fn set_int(&self, key: &str, value: (u64, i64));

    fn get_int(&self, key: &str) -> Option<i64>;

    fn set_double(&self, key: &str, value: (u64, f64));

    fn get_double(&self, key: &str) -> Option<f64>;

    fn set_string(&self, key: &str, value: (u64, String));

    fn get_string(&self, key: &str) -> Option<String>;

    fn set_bitmap(&self, key: &str, value: (u64, Frame));

    fn get_bitmap(&self, key: &str) -> Option<Frame>;
}
