//! # In-memory event log

use crate::prelude::v1::*;
use crate::utils::get_us;
use std::sync::{Mutex, PoisonError};

/// Single logged event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub id: EventId,
    pub trigger_id: String,
    pub kind: EventKind,
    pub note: String,
    pub start_us: u64,
    pub end_us: Option<u64>,
}

/// [`EventLog`] that keeps events in memory.
///
/// Used when no database is configured, and by the simulator to report what happened.
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<EventRecord>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event logged so far, in order of registration.
    pub fn events(&self) -> Vec<EventRecord> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventLog for MemoryEventLog {
    fn register_event(&self, trigger_id: &str, kind: EventKind, note: &str) -> Result<EventId> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);

        let id = events.len() as EventId + 1;

        events.push(EventRecord {
            id,
            trigger_id: trigger_id.to_string(),
            kind,
            note: note.to_string(),
            start_us: get_us(),
            end_us: None,
        });

        Ok(id)
    }

    fn register_event_end(&self, event: EventId) -> Result<()> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);

        let record = events
            .iter_mut()
            .find(|e| e.id == event)
            .ok_or_else(|| anyhow!("no event with id {event}"))?;

        if record.end_us.is_some() {
            bail!("event {event} already ended");
        }

        record.end_us = Some(get_us());

        Ok(())
    }
}
