//! Inbound and outbound halves of a connection.
//!
//! The reactor reports readiness edges; these wrappers turn them into the
//! event stream a connection handler expects. A read or write that makes
//! progress re-posts its readiness event, since the channel may still be
//! ready and an edge-triggered poller would not report it again. End of
//! stream and I/O errors are never returned to the caller as values; they
//! are posted as `EndEncountered` / `ErrorOccurred` events instead.

use crate::runtime::reactor::{Direction, EventHandler, Reactor, StreamEvent, Token};
use std::io::{self, Read, Write};
use std::rc::Rc;
use tracing::trace;

/// Read half of a connection.
pub struct InboundChannel<C> {
    channel: C,
    token: Option<Token>,
    at_end: bool,
}

impl<C: Read + Write> InboundChannel<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            token: None,
            at_end: false,
        }
    }

    /// Register with the reactor, handing it a reference to `handler`.
    pub fn open<R>(&mut self, reactor: &R, handler: Rc<dyn EventHandler>) -> io::Result<()>
    where
        R: Reactor<Channel = C>,
    {
        debug_assert!(self.token.is_none(), "inbound channel opened twice");
        let token = reactor.register(&mut self.channel, Direction::Inbound, handler)?;
        self.token = Some(token);
        Ok(())
    }

    /// Token of the live registration, if open.
    pub fn token(&self) -> Option<Token> {
        self.token
    }

    /// Read into `buf`, returning the number of bytes read.
    ///
    /// Zero means nothing was read: the channel would block, hit end of
    /// stream, or failed. The latter two are posted as events.
    pub fn read<R>(&mut self, reactor: &R, buf: &mut [u8]) -> usize
    where
        R: Reactor<Channel = C>,
    {
        let Some(token) = self.token else {
            return 0;
        };
        if self.at_end {
            return 0;
        }

        match self.channel.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.at_end = true;
                reactor.post(token, StreamEvent::EndEncountered);
                0
            }
            Ok(n) => {
                trace!(token = token.0, bytes = n, "read");
                reactor.post(token, StreamEvent::HasBytesAvailable);
                n
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                reactor.post(token, StreamEvent::HasBytesAvailable);
                0
            }
            Err(e) => {
                trace!(token = token.0, error = %e, "read failed");
                reactor.post(token, StreamEvent::ErrorOccurred);
                0
            }
        }
    }

    /// Unregister and release the channel, closing this half of the transport.
    pub fn close<R>(mut self, reactor: &R)
    where
        R: Reactor<Channel = C>,
    {
        if let Some(token) = self.token.take() {
            reactor.unregister(&mut self.channel, token);
        }
    }
}

/// Write half of a connection.
pub struct OutboundChannel<C> {
    channel: C,
    token: Option<Token>,
    can_accept_bytes: bool,
}

impl<C: Read + Write> OutboundChannel<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            token: None,
            can_accept_bytes: false,
        }
    }

    /// Register with the reactor, handing it a reference to `handler`.
    pub fn open<R>(&mut self, reactor: &R, handler: Rc<dyn EventHandler>) -> io::Result<()>
    where
        R: Reactor<Channel = C>,
    {
        debug_assert!(self.token.is_none(), "outbound channel opened twice");
        let token = reactor.register(&mut self.channel, Direction::Outbound, handler)?;
        self.token = Some(token);
        Ok(())
    }

    /// Token of the live registration, if open.
    pub fn token(&self) -> Option<Token> {
        self.token
    }

    /// Whether a write is expected to make progress right now.
    pub fn can_accept_bytes(&self) -> bool {
        self.token.is_some() && self.can_accept_bytes
    }

    /// Record a delivered `CanAcceptBytes` event.
    pub fn mark_writable(&mut self) {
        self.can_accept_bytes = true;
    }

    /// Write from `buf` in a single call, returning the number of bytes taken.
    ///
    /// Zero means nothing was written: the channel would block or failed.
    /// Failures are posted as `ErrorOccurred`.
    pub fn write<R>(&mut self, reactor: &R, buf: &[u8]) -> usize
    where
        R: Reactor<Channel = C>,
    {
        let Some(token) = self.token else {
            return 0;
        };

        match self.channel.write(buf) {
            Ok(0) if !buf.is_empty() => {
                trace!(token = token.0, "write returned 0");
                reactor.post(token, StreamEvent::ErrorOccurred);
                0
            }
            Ok(n) => {
                trace!(token = token.0, bytes = n, "wrote");
                reactor.post(token, StreamEvent::CanAcceptBytes);
                n
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.can_accept_bytes = false;
                0
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                reactor.post(token, StreamEvent::CanAcceptBytes);
                0
            }
            Err(e) => {
                trace!(token = token.0, error = %e, "write failed");
                reactor.post(token, StreamEvent::ErrorOccurred);
                0
            }
        }
    }

    /// Unregister and release the channel, closing this half of the transport.
    pub fn close<R>(mut self, reactor: &R)
    where
        R: Reactor<Channel = C>,
    {
        if let Some(token) = self.token.take() {
            reactor.unregister(&mut self.channel, token);
        }
    }
}
