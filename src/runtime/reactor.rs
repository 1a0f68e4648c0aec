//! The boundary between connection logic and the event loop.
//!
//! A reactor delivers readiness events for registered channels and fires
//! one-shot timers. Every registration and every armed timer holds a strong
//! reference (`Rc`) to its handler, so a handler stays alive for as long as
//! the reactor may still call it. Everything here is single-threaded.

use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::Instant;

pub use mio::Token;

/// Which half of a connection's channel pair an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Stream events shared by both channel directions.
///
/// Not every kind is meaningful for every direction: an inbound channel never
/// reports `CanAcceptBytes` and an outbound one never reports
/// `HasBytesAvailable`. Handlers ignore kinds they do not recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    HasBytesAvailable,
    CanAcceptBytes,
    ErrorOccurred,
    EndEncountered,
}

/// Identifier of an armed one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

/// Receiver of reactor callbacks.
///
/// The reactor hands each callback its own clone of the stored `Rc`, so the
/// handler may unregister itself (dropping the reactor's references) without
/// being freed mid-call. Dropping `self` at the end of a callback may free it.
pub trait EventHandler {
    fn on_stream_event(self: Rc<Self>, token: Token, direction: Direction, event: StreamEvent);

    fn on_timer(self: Rc<Self>, timer: TimerId);
}

/// Single-threaded event notification service.
pub trait Reactor {
    /// Raw, already-accepted transport.
    type Handle;
    /// One direction of a connection.
    type Channel: Read + Write;

    /// Wraps a transport into an inbound/outbound channel pair.
    ///
    /// The pair takes over closing the transport.
    fn channel_pair(&self, handle: Self::Handle) -> io::Result<(Self::Channel, Self::Channel)>;

    /// Starts delivering `direction` events for `channel` to `handler`.
    ///
    /// The reactor keeps `handler` until [`Reactor::unregister`].
    fn register(
        &self,
        channel: &mut Self::Channel,
        direction: Direction,
        handler: Rc<dyn EventHandler>,
    ) -> io::Result<Token>;

    /// Stops event delivery for `token` and drops the handler reference.
    fn unregister(&self, channel: &mut Self::Channel, token: Token);

    /// Queues `event` for `token`, to be delivered on a later loop turn.
    ///
    /// Dropped silently if `token` is unregistered before delivery.
    fn post(&self, token: Token, event: StreamEvent);

    /// Current time on the reactor's clock. Timer deadlines are measured
    /// against it.
    fn now(&self) -> Instant;

    /// Arms a one-shot timer. The reactor keeps `handler` until the timer
    /// fires or is cancelled.
    fn arm_timer(&self, deadline: Instant, handler: Rc<dyn EventHandler>) -> TimerId;

    /// Cancels an armed timer, dropping its handler reference. No-op if it
    /// already fired.
    fn cancel_timer(&self, timer: TimerId);
}
