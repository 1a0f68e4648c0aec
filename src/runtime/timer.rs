//! One-shot timer queue for the reactor.
//!
//! Timers are ordered by deadline; ties fire in arming order. A timer is
//! never mutated once armed: rescheduling cancels it and arms a new one.

use crate::runtime::reactor::{EventHandler, TimerId};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Deadline-ordered set of armed timers.
///
/// Each entry owns a handler reference that is released when the timer is
/// popped or cancelled.
pub struct TimerQueue {
    entries: BTreeMap<(Instant, TimerId), Rc<dyn EventHandler>>,
    deadlines: HashMap<TimerId, Instant>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_id: 0,
        }
    }

    /// Arm a timer firing at `deadline`.
    pub fn arm(&mut self, deadline: Instant, handler: Rc<dyn EventHandler>) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.insert((deadline, id), handler);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Cancel an armed timer, returning its handler reference.
    pub fn cancel(&mut self, id: TimerId) -> Option<Rc<dyn EventHandler>> {
        let deadline = self.deadlines.remove(&id)?;
        self.entries.remove(&(deadline, id))
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Time until the earliest deadline, saturating at zero.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Remove and return the earliest timer whose deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<(TimerId, Rc<dyn EventHandler>)> {
        let (&(deadline, id), _) = self.entries.first_key_value()?;
        if deadline > now {
            return None;
        }
        self.deadlines.remove(&id);
        self.entries
            .remove(&(deadline, id))
            .map(|handler| (id, handler))
    }

    /// Remove every timer, returning their handler references.
    pub fn drain(&mut self) -> Vec<Rc<dyn EventHandler>> {
        self.deadlines.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}
