//! Reactor backed by `mio` readiness polling.
//!
//! One instance per worker thread. Readiness is edge-triggered; channels
//! re-post their own events after making progress (see `runtime::channel`),
//! and those posts are delivered after the current batch of readiness events
//! so one busy connection cannot starve the rest.

use crate::runtime::reactor::{Direction, EventHandler, Reactor, StreamEvent, TimerId, Token};
use crate::runtime::timer::TimerQueue;
use crate::runtime::token::TokenAllocator;
use mio::event::Event;
use mio::net::TcpStream;
use mio::{Interest, Registry};
use socket2::SockRef;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Event queued by [`Reactor::post`], tagged with the registration generation
/// it was posted for.
struct Posted {
    token: Token,
    generation: u64,
    event: StreamEvent,
}

/// Single-threaded reactor over a `mio` registry.
pub struct MioReactor {
    registry: Registry,
    tokens: RefCell<TokenAllocator>,
    timers: RefCell<TimerQueue>,
    pending: RefCell<VecDeque<Posted>>,
}

impl MioReactor {
    /// Create a reactor registering sources with `registry`.
    ///
    /// `capacity` is a sizing hint for the registration table.
    pub fn new(registry: Registry, capacity: usize) -> Self {
        Self {
            registry,
            tokens: RefCell::new(TokenAllocator::new(capacity)),
            timers: RefCell::new(TimerQueue::new()),
            pending: RefCell::new(VecDeque::new()),
        }
    }

    /// How long the next poll may block, capped at `max`.
    ///
    /// Zero while posted events are waiting.
    pub fn poll_timeout(&self, max: Duration) -> Duration {
        if !self.pending.borrow().is_empty() {
            return Duration::ZERO;
        }
        self.timers
            .borrow()
            .next_timeout(Instant::now())
            .map_or(max, |timeout| timeout.min(max))
    }

    /// Deliver one readiness event to the handler registered for its token.
    pub fn dispatch(&self, event: &Event) {
        let token = event.token();
        let registration = self.tokens.borrow().get(token);
        let Some(registration) = registration else {
            return;
        };

        let stream_event = match registration.direction {
            Direction::Inbound if event.is_error() => StreamEvent::ErrorOccurred,
            Direction::Inbound if event.is_readable() || event.is_read_closed() => {
                StreamEvent::HasBytesAvailable
            }
            Direction::Outbound if event.is_error() || event.is_write_closed() => {
                StreamEvent::ErrorOccurred
            }
            Direction::Outbound if event.is_writable() => StreamEvent::CanAcceptBytes,
            _ => return,
        };

        registration
            .handler
            .on_stream_event(token, registration.direction, stream_event);
    }

    /// Finish a batch of readiness events.
    ///
    /// Tokens unregistered during the batch only become reusable here, so a
    /// stale event later in the same batch cannot reach a new registration.
    pub fn end_batch(&self) {
        self.tokens.borrow_mut().reclaim();
    }

    /// Fire every timer whose deadline has passed.
    pub fn fire_expired_timers(&self) {
        let now = Instant::now();
        loop {
            let expired = self.timers.borrow_mut().pop_expired(now);
            let Some((timer, handler)) = expired else {
                break;
            };
            handler.on_timer(timer);
        }
    }

    /// Deliver events posted before this call.
    ///
    /// Events posted while delivering wait for the next loop turn.
    pub fn deliver_pending(&self) {
        let batch = std::mem::take(&mut *self.pending.borrow_mut());
        for posted in batch {
            let registration = self.tokens.borrow().get(posted.token);
            match registration {
                Some(registration) if registration.generation == posted.generation => {
                    registration.handler.on_stream_event(
                        posted.token,
                        registration.direction,
                        posted.event,
                    );
                }
                _ => trace!(token = posted.token.0, "dropping event for stale token"),
            }
        }
    }

    /// Drop every handler reference the reactor holds.
    ///
    /// Connections still open are destroyed once nothing else holds them.
    pub fn shutdown(&self) {
        self.pending.borrow_mut().clear();
        let timers = self.timers.borrow_mut().drain();
        let registrations = self.tokens.borrow_mut().drain();
        drop(timers);
        drop(registrations);
    }
}

impl Reactor for MioReactor {
    type Handle = TcpStream;
    type Channel = TcpStream;

    fn channel_pair(&self, handle: TcpStream) -> io::Result<(TcpStream, TcpStream)> {
        // A duplicated descriptor shares the socket and its non-blocking flag
        // but registers independently.
        let writer = SockRef::from(&handle).try_clone()?;
        Ok((handle, TcpStream::from_std(writer.into())))
    }

    fn register(
        &self,
        channel: &mut TcpStream,
        direction: Direction,
        handler: Rc<dyn EventHandler>,
    ) -> io::Result<Token> {
        let interest = match direction {
            Direction::Inbound => Interest::READABLE,
            Direction::Outbound => Interest::WRITABLE,
        };

        let token = self.tokens.borrow_mut().alloc(direction, handler);
        if let Err(e) = self.registry.register(channel, token, interest) {
            let registration = self.tokens.borrow_mut().free(token);
            drop(registration);
            return Err(e);
        }
        Ok(token)
    }

    fn unregister(&self, channel: &mut TcpStream, token: Token) {
        let _ = self.registry.deregister(channel);
        // Dropped outside the borrow: it may be the handler's last reference.
        let registration = self.tokens.borrow_mut().free(token);
        drop(registration);
    }

    fn post(&self, token: Token, event: StreamEvent) {
        let generation = self.tokens.borrow().generation(token);
        if let Some(generation) = generation {
            self.pending.borrow_mut().push_back(Posted {
                token,
                generation,
                event,
            });
        }
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn arm_timer(&self, deadline: Instant, handler: Rc<dyn EventHandler>) -> TimerId {
        self.timers.borrow_mut().arm(deadline, handler)
    }

    fn cancel_timer(&self, timer: TimerId) {
        let handler = self.timers.borrow_mut().cancel(timer);
        drop(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;

    struct Noop;

    impl EventHandler for Noop {
        fn on_stream_event(self: Rc<Self>, _: Token, _: Direction, _: StreamEvent) {}
        fn on_timer(self: Rc<Self>, _: TimerId) {}
    }

    fn connected_stream() -> (TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    #[test]
    fn test_unregistered_tokens_wait_for_end_of_batch() {
        let poll = Poll::new().unwrap();
        let reactor = MioReactor::new(poll.registry().try_clone().unwrap(), 4);
        let handler: Rc<dyn EventHandler> = Rc::new(Noop);

        let (stream, _client) = connected_stream();
        let (mut inbound, mut outbound) = reactor.channel_pair(stream).unwrap();
        let old_inbound = reactor
            .register(&mut inbound, Direction::Inbound, handler.clone())
            .unwrap();
        let old_outbound = reactor
            .register(&mut outbound, Direction::Outbound, handler.clone())
            .unwrap();

        reactor.unregister(&mut inbound, old_inbound);
        reactor.unregister(&mut outbound, old_outbound);
        assert_eq!(Rc::strong_count(&handler), 1);

        // A connection accepted later in the same batch gets fresh tokens.
        let (stream, _other_client) = connected_stream();
        let (mut inbound, mut outbound) = reactor.channel_pair(stream).unwrap();
        let new_inbound = reactor
            .register(&mut inbound, Direction::Inbound, handler.clone())
            .unwrap();
        assert_ne!(new_inbound, old_inbound);
        assert_ne!(new_inbound, old_outbound);

        reactor.end_batch();
        let new_outbound = reactor
            .register(&mut outbound, Direction::Outbound, handler.clone())
            .unwrap();
        assert!(new_outbound == old_inbound || new_outbound == old_outbound);

        reactor.shutdown();
        assert_eq!(Rc::strong_count(&handler), 1);
    }
}
