//! Per-connection echo state machine.
//!
//! An [`EchoContext`] is shared between its creator and the reactor. The
//! creator holds a [`ContextRef`]; each channel registration and the armed
//! idle timer hold one more strong reference each. The context is destroyed
//! when the last of these is dropped, which may happen at the end of one of
//! its own callbacks.
//!
//! Lifecycle: `Created` → `Open` → `Closed`. Closing unregisters both
//! channels and cancels the timer, so a closed context receives no further
//! events and lives only until its remaining references are released.

#![allow(dead_code)] // retain() and close() are not needed by the accept loop

use crate::config::EchoSettings;
use crate::protocols::echo::parser;
use crate::runtime::channel::{InboundChannel, OutboundChannel};
use crate::runtime::reactor::{Direction, EventHandler, Reactor, StreamEvent, TimerId, Token};
use crate::runtime::{ConnectionSlot, ReceiveBuffer};
use std::cell::RefCell;
use std::io;
use std::ops::Deref;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace};

/// Failures reported by [`EchoContext::create`] and [`ContextRef::open`].
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to create channel pair: {0}")]
    ChannelPair(#[source] io::Error),
    #[error("failed to register with reactor: {0}")]
    Register(#[source] io::Error),
    #[error("context was already opened or closed")]
    NotCreated,
}

/// Lifecycle phase of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy)]
enum CloseReason {
    Requested,
    OpenFailed,
    EndOfStream,
    TransportError,
    IdleTimeout,
}

struct State<C> {
    phase: Phase,
    timer: Option<TimerId>,
    inbound: Option<InboundChannel<C>>,
    outbound: Option<OutboundChannel<C>>,
    received: ReceiveBuffer,
}

/// Channels and timer taken out of a context for release.
struct Resources<C> {
    inbound: Option<InboundChannel<C>>,
    outbound: Option<OutboundChannel<C>>,
    timer: Option<TimerId>,
}

impl<C> State<C> {
    fn take_resources(&mut self) -> Resources<C> {
        self.phase = Phase::Closed;
        Resources {
            inbound: self.inbound.take(),
            outbound: self.outbound.take(),
            timer: self.timer.take(),
        }
    }
}

impl<C: io::Read + io::Write> Resources<C> {
    fn release<R: Reactor<Channel = C>>(self, reactor: &R) {
        if let Some(inbound) = self.inbound {
            inbound.close(reactor);
        }
        if let Some(outbound) = self.outbound {
            outbound.close(reactor);
        }
        if let Some(timer) = self.timer {
            reactor.cancel_timer(timer);
        }
    }
}

/// State for one echo connection.
pub struct EchoContext<R: Reactor> {
    reactor: Rc<R>,
    settings: EchoSettings,
    state: RefCell<State<R::Channel>>,
    _slot: ConnectionSlot,
}

impl<R: Reactor + 'static> EchoContext<R> {
    /// Wrap an accepted transport into a new, unopened context.
    ///
    /// On success the caller holds the only reference.
    pub fn create(
        reactor: Rc<R>,
        handle: R::Handle,
        settings: EchoSettings,
        slot: ConnectionSlot,
    ) -> Result<ContextRef<R>, ContextError> {
        let (inbound, outbound) = reactor
            .channel_pair(handle)
            .map_err(ContextError::ChannelPair)?;

        let context = EchoContext {
            reactor,
            settings,
            state: RefCell::new(State {
                phase: Phase::Created,
                timer: None,
                inbound: Some(InboundChannel::new(inbound)),
                outbound: Some(OutboundChannel::new(outbound)),
                received: ReceiveBuffer::with_capacity(settings.read_chunk_size),
            }),
            _slot: slot,
        };

        Ok(ContextRef(Rc::new(context)))
    }

    /// Close the connection. Idempotent.
    ///
    /// Unregisters both channels (dropping the reactor's references), closes
    /// the transport and cancels the idle timer.
    pub fn close(&self) {
        self.close_with(CloseReason::Requested);
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    /// Bytes read but not yet written back.
    pub fn buffered(&self) -> Vec<u8> {
        self.state.borrow().received.as_slice().to_vec()
    }

    pub fn inbound_token(&self) -> Option<Token> {
        self.state.borrow().inbound.as_ref().and_then(InboundChannel::token)
    }

    pub fn outbound_token(&self) -> Option<Token> {
        self.state.borrow().outbound.as_ref().and_then(OutboundChannel::token)
    }

    pub fn idle_timer(&self) -> Option<TimerId> {
        self.state.borrow().timer
    }

    fn close_with(&self, reason: CloseReason) {
        let (resources, token, unsent) = {
            let mut state = self.state.borrow_mut();
            if state.phase == Phase::Closed {
                return;
            }
            let token = state.inbound.as_ref().and_then(InboundChannel::token);
            (state.take_resources(), token, state.received.len())
        };

        debug!(token = token.map(|t| t.0), ?reason, unsent, "Connection closed");
        resources.release(&*self.reactor);
    }

    fn handler(self: &Rc<Self>) -> Rc<dyn EventHandler> {
        Rc::clone(self) as Rc<dyn EventHandler>
    }

    fn open_channels(self: &Rc<Self>) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        let State {
            inbound, outbound, ..
        } = &mut *state;

        if let Some(inbound) = inbound.as_mut() {
            inbound.open(&*self.reactor, self.handler())?;
        }
        if let Some(outbound) = outbound.as_mut() {
            outbound.open(&*self.reactor, self.handler())?;
        }
        Ok(())
    }

    /// Replace the idle timer with one firing a full timeout from now.
    ///
    /// Does nothing once the context is closed.
    fn reset_idle_timer(self: &Rc<Self>) {
        let previous = self.state.borrow_mut().timer.take();
        let Some(previous) = previous else {
            return;
        };
        self.reactor.cancel_timer(previous);

        let deadline = self.reactor.now() + self.settings.idle_timeout;
        let timer = self.reactor.arm_timer(deadline, self.handler());
        self.state.borrow_mut().timer = Some(timer);
    }

    /// Try to write the first buffered line back out.
    ///
    /// Writes at most one line per call, even when several are buffered; the
    /// next `CanAcceptBytes` event picks up the rest. Bytes the channel
    /// accepted are removed from the buffer; a short write leaves the
    /// remainder of the line at the front for the next attempt.
    fn flush(&self) -> usize {
        let mut state = self.state.borrow_mut();
        let State {
            outbound, received, ..
        } = &mut *state;

        let Some(outbound) = outbound.as_mut() else {
            return 0;
        };
        let Some(line_len) = parser::find_line(received.as_slice(), self.settings.terminator)
        else {
            return 0;
        };

        let written = outbound.write(&*self.reactor, &received.as_slice()[..line_len]);
        if written > 0 {
            received.consume(written);
        }
        written
    }

    fn handle_has_bytes_available(self: &Rc<Self>) {
        self.reset_idle_timer();

        let (read, writable) = {
            let mut state = self.state.borrow_mut();
            let State {
                inbound,
                outbound,
                received,
                ..
            } = &mut *state;

            let Some(inbound) = inbound.as_mut() else {
                return;
            };
            let reactor = &*self.reactor;
            let read = received.fill_with(self.settings.read_chunk_size, |buf| {
                inbound.read(reactor, buf)
            });
            let writable = outbound
                .as_ref()
                .is_some_and(OutboundChannel::can_accept_bytes);
            (read, writable)
        };

        // End of stream and errors arrive as their own events.
        if read > 0 && writable {
            self.flush();
        }
    }

    fn handle_can_accept_bytes(self: &Rc<Self>) {
        self.reset_idle_timer();
        self.flush();
    }

    fn handle_end_encountered(self: Rc<Self>) {
        self.close_with(CloseReason::EndOfStream);
        ContextRef(self).release();
    }

    fn handle_error_occurred(self: Rc<Self>) {
        self.close_with(CloseReason::TransportError);
        ContextRef(self).release();
    }
}

impl<R: Reactor + 'static> EventHandler for EchoContext<R> {
    fn on_stream_event(self: Rc<Self>, token: Token, direction: Direction, event: StreamEvent) {
        match direction {
            Direction::Inbound => {
                let owned = self.inbound_token();
                debug_assert_eq!(owned, Some(token), "inbound event for a foreign channel");
                if owned != Some(token) {
                    return;
                }

                match event {
                    StreamEvent::HasBytesAvailable => self.handle_has_bytes_available(),
                    StreamEvent::EndEncountered => self.handle_end_encountered(),
                    StreamEvent::ErrorOccurred => self.handle_error_occurred(),
                    _ => {}
                }
            }
            Direction::Outbound => {
                let owned = self.outbound_token();
                debug_assert_eq!(owned, Some(token), "outbound event for a foreign channel");
                if owned != Some(token) {
                    return;
                }

                match event {
                    StreamEvent::CanAcceptBytes => {
                        if let Some(outbound) = self.state.borrow_mut().outbound.as_mut() {
                            outbound.mark_writable();
                        }
                        self.handle_can_accept_bytes();
                    }
                    StreamEvent::ErrorOccurred => self.handle_error_occurred(),
                    _ => {}
                }
            }
        }
    }

    fn on_timer(self: Rc<Self>, timer: TimerId) {
        let current = self.idle_timer();
        debug_assert_eq!(current, Some(timer), "fired timer is not the armed idle timer");
        if current != Some(timer) {
            return;
        }

        // Already fired, so there is nothing left to cancel.
        self.state.borrow_mut().timer = None;
        trace!(timer = timer.0, "idle timeout");

        self.close_with(CloseReason::IdleTimeout);
        ContextRef(self).release();
    }
}

impl<R: Reactor> Drop for EchoContext<R> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.phase != Phase::Closed {
            let resources = state.take_resources();
            resources.release(&*self.reactor);
        }
        trace!("Connection destroyed");
    }
}

/// A counted reference to an [`EchoContext`].
///
/// `retain` hands out another reference; `release` gives one up and destroys
/// the context if it was the last. Because `release` consumes the handle, a
/// released reference cannot be used again.
pub struct ContextRef<R: Reactor>(Rc<EchoContext<R>>);

impl<R: Reactor + 'static> ContextRef<R> {
    pub fn retain(&self) -> Self {
        ContextRef(Rc::clone(&self.0))
    }

    pub fn release(self) {
        drop(self);
    }

    /// Number of live references, including those held by the reactor.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Register both channels and arm the idle timer.
    ///
    /// Each registration and the timer take their own reference. On failure
    /// the context is closed; the caller still owns (and must release) its
    /// reference.
    pub fn open(&self) -> Result<(), ContextError> {
        let context = &self.0;
        if context.phase() != Phase::Created {
            return Err(ContextError::NotCreated);
        }

        if let Err(e) = context.open_channels() {
            context.close_with(CloseReason::OpenFailed);
            return Err(ContextError::Register(e));
        }

        let deadline = context.reactor.now() + context.settings.idle_timeout;
        let timer = context.reactor.arm_timer(deadline, context.handler());

        let mut state = context.state.borrow_mut();
        state.timer = Some(timer);
        state.phase = Phase::Open;
        trace!(
            inbound = ?state.inbound.as_ref().and_then(InboundChannel::token),
            outbound = ?state.outbound.as_ref().and_then(OutboundChannel::token),
            "Connection opened"
        );
        Ok(())
    }
}

impl<R: Reactor> Deref for ContextRef<R> {
    type Target = EchoContext<R>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
