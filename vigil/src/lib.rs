//! # Motion triggered recording library
//!
//! This library turns a stream of video frames into start/stop recording decisions. It provides
//! per-frame motion detection (with region-of-interest masks, morphological despeckling and
//! external detector plugins), a hysteretic recording state machine with a pre-record buffer, a
//! publish/subscribe hub that lets one trigger drive another, and a runtime-mutable parameter
//! store backing all of the above.
//!
//! Acquisition backends, recording targets, persistence and scheduling are collaborators, and
//! are consumed through the traits in [`collab`].
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use vigil::prelude::v1::*;
//! ```

pub mod audio;
pub mod cascade;
pub mod collab;
#[cfg(feature = "serde")]
pub mod config;
pub mod despeckle;
pub mod detector;
pub mod event_log;
pub mod exec;
pub mod frame;
pub mod meta;
pub mod notifier;
pub mod params;
pub mod plugins;
pub mod prerecord;
pub mod selection_mask;
#[cfg(test)]
mod testing;
pub mod trigger;
pub mod utils;
pub mod worker;

include!(concat!(env!("OUT_DIR"), "/version.rs"));

#[doc(hidden)]
pub use libc;
#[doc(hidden)]
pub use log;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            audio::{AudioSource, AudioTrigger},
            cascade::CascadingTrigger,
            collab::*,
            despeckle::despeckle,
            detector::{ChangeStatistics, Detection, MotionDetector},
            event_log::MemoryEventLog,
            exec::{ScriptHandle, ScriptRunner, ShellRunner},
            frame::{Encoding, Frame},
            meta::MetaBoard,
            notifier::{EventSignal, MotionFlag, NotifierHub, Subscriber, Subscription, TriggerLink},
            params::{Kind, ParameterSet, Value},
            prerecord::PreRecordBuffer,
            selection_mask::SelectionMask,
            trigger::{MotionTrigger, Mode, TriggerState},
            worker::{Control, Trigger, TriggerWorker},
        };
        pub use anyhow::{anyhow, bail, Context, Error, Result};
    }
}
