//! # In-process meta store

use crate::prelude::v1::*;
use crate::utils::get_us;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Percentage of changed pixels in the last processed frame.
pub const PIXELS_CHANGED: &str = "$pixels-changed$";
/// Free-text output of an external detector.
pub const MOTION_META: &str = "$motion-meta$";
/// Horizontal centre of the last detected motion, in pixels.
pub const MOTION_CENTER_X: &str = "$motion-center-x$";
/// Vertical centre of the last detected motion, in pixels.
pub const MOTION_CENTER_Y: &str = "$motion-center-y$";

struct Slot<T> {
    values: RwLock<HashMap<String, (u64, T)>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            values: Default::default(),
        }
    }
}

impl<T: Clone> Slot<T> {
    fn set(&self, key: &str, value: (u64, T)) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<T> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);

        match values.get(key) {
            Some((discard, _)) if *discard != 0 && *discard < get_us() => None,
            Some((_, v)) => Some(v.clone()),
            None => None,
        }
    }
}

/// [`MetaStore`] backed by in-memory maps.
#[derive(Default)]
pub struct MetaBoard {
    ints: Slot<i64>,
    doubles: Slot<f64>,
    strings: Slot<String>,
    bitmaps: Slot<Frame>,
}

impl MetaBoard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MetaBoard {
    fn set_int(&self, key: &str, value: (u64, i64)) {
        self.ints.set(key, value)
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.ints.get(key)
    }

    fn set_double(&self, key: &str, value: (u64, f64)) {
        self.doubles.set(key, value)
    }

    fn get_double(&self, key: &str) -> Option<f64> {
        self.doubles.get(key)
    }

    fn set_string(&self, key: &str, value: (u64, String)) {
        self.strings.set(key, value)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.strings.get(key)
    }

    fn set_bitmap(&self, key: &str, value: (u64, Frame)) {
        self.bitmaps.set(key, value)
    }

    fn get_bitmap(&self, key: &str) -> Option<Frame> {
        self.bitmaps.get(key)
    }
}
