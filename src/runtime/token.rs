//! Registration token tracking for event correlation.
//!
//! Each registered channel gets a unique token that identifies its direction
//! and the handler to call when readiness for that token is reported. Tokens
//! are reused once freed, so every registration also carries a generation to
//! detect events queued for an earlier owner of the same token.
//!
//! A freed token is retired rather than returned to the slab straight away:
//! the poller may still hold readiness for it in the batch being dispatched.
//! Retired tokens become reusable after [`TokenAllocator::reclaim`].

use crate::runtime::reactor::{Direction, EventHandler, Token};
use slab::Slab;
use std::rc::Rc;

/// A live channel registration.
#[derive(Clone)]
pub struct Registration {
    pub direction: Direction,
    pub handler: Rc<dyn EventHandler>,
    pub generation: u64,
}

enum Slot {
    Live(Registration),
    Retired,
}

/// Allocator for registration tokens with O(1) lookup.
///
/// Uses a slab to efficiently allocate and deallocate tokens,
/// providing stable identifiers for registered channels.
pub struct TokenAllocator {
    slots: Slab<Slot>,
    retired: Vec<Token>,
    next_generation: u64,
}

impl TokenAllocator {
    /// Create a new token allocator with specified capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            retired: Vec::new(),
            next_generation: 0,
        }
    }

    /// Allocate a token delivering `direction` events to `handler`.
    pub fn alloc(&mut self, direction: Direction, handler: Rc<dyn EventHandler>) -> Token {
        let generation = self.next_generation;
        self.next_generation += 1;
        Token(self.slots.insert(Slot::Live(Registration {
            direction,
            handler,
            generation,
        })))
    }

    /// Get a copy of the registration for a token.
    ///
    /// Cloning hands the caller its own handler reference, so the table can
    /// be modified while the handler runs.
    pub fn get(&self, token: Token) -> Option<Registration> {
        match self.slots.get(token.0) {
            Some(Slot::Live(registration)) => Some(registration.clone()),
            _ => None,
        }
    }

    /// Free a token, returning the registration (and its handler reference).
    ///
    /// The token is not handed out again until the next [`reclaim`](Self::reclaim).
    pub fn free(&mut self, token: Token) -> Option<Registration> {
        let slot = self.slots.get_mut(token.0)?;
        match std::mem::replace(slot, Slot::Retired) {
            Slot::Live(registration) => {
                self.retired.push(token);
                Some(registration)
            }
            Slot::Retired => None,
        }
    }

    /// Make every retired token available for allocation again.
    pub fn reclaim(&mut self) {
        for token in self.retired.drain(..) {
            self.slots.try_remove(token.0);
        }
    }

    /// Generation of the current registration for a token.
    pub fn generation(&self, token: Token) -> Option<u64> {
        match self.slots.get(token.0) {
            Some(Slot::Live(registration)) => Some(registration.generation),
            _ => None,
        }
    }

    /// Remove every registration, returning their handler references.
    pub fn drain(&mut self) -> Vec<Registration> {
        self.retired.clear();
        self.slots
            .drain()
            .filter_map(|slot| match slot {
                Slot::Live(registration) => Some(registration),
                Slot::Retired => None,
            })
            .collect()
    }

    /// Number of live registrations.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len() - self.retired.len()
    }

    /// Check if there are no live registrations.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
