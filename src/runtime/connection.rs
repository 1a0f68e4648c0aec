//! Per-worker connection accounting.
//!
//! Every live connection holds a [`ConnectionSlot`]; the slot is returned when
//! the connection is destroyed, not merely closed.

use std::cell::Cell;
use std::rc::Rc;

/// Capacity-limited count of live connections on one worker.
#[derive(Debug, Clone)]
pub struct ConnectionCounter {
    active: Rc<Cell<usize>>,
    max_connections: usize,
}

impl ConnectionCounter {
    /// Create a counter allowing at most `max_connections` live slots.
    pub fn new(max_connections: usize) -> Self {
        Self {
            active: Rc::new(Cell::new(0)),
            max_connections,
        }
    }

    /// Take a slot for a new connection.
    ///
    /// Returns `None` if the worker is at capacity.
    pub fn try_acquire(&self) -> Option<ConnectionSlot> {
        let active = self.active.get();
        if active >= self.max_connections {
            return None;
        }
        self.active.set(active + 1);
        Some(ConnectionSlot {
            active: Rc::clone(&self.active),
        })
    }

    /// Number of live connections.
    pub fn active(&self) -> usize {
        self.active.get()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }
}

/// Proof of a reserved connection slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct ConnectionSlot {
    active: Rc<Cell<usize>>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let active = self.active.get();
        debug_assert!(active > 0, "connection slot released twice");
        self.active.set(active.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_counter() {
        let counter = ConnectionCounter::new(2);
        assert_eq!(counter.capacity(), 2);

        let s1 = counter.try_acquire().unwrap();
        let s2 = counter.try_acquire().unwrap();

        // At capacity
        assert!(counter.try_acquire().is_none());
        assert_eq!(counter.active(), 2);

        drop(s1);
        assert_eq!(counter.active(), 1);

        let s3 = counter.try_acquire().unwrap();
        assert_eq!(counter.active(), 2);

        drop(s2);
        drop(s3);
        assert_eq!(counter.active(), 0);
    }
}
