//! In-memory reactor for driving connections deterministically in tests.
//!
//! Nothing happens on its own: tests deliver readiness with
//! [`ManualReactor::deliver`], flush posted events with
//! [`ManualReactor::run_pending`] and move the clock with
//! [`ManualReactor::advance`].

use crate::runtime::reactor::{Direction, EventHandler, Reactor, StreamEvent, TimerId, Token};
use crate::runtime::timer::TimerQueue;
use crate::runtime::token::TokenAllocator;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::{Duration, Instant};

enum ReadStep {
    Data(Vec<u8>),
    Eof,
    Fail,
}

#[derive(Default)]
struct Wire {
    incoming: VecDeque<ReadStep>,
    written: Vec<Vec<u8>>,
    write_limit: Option<usize>,
    write_blocked: bool,
    write_failed: bool,
    closed_halves: usize,
}

/// Scripted transport shared by both halves of a channel pair.
#[derive(Clone, Default)]
pub struct MockTransport {
    wire: Rc<RefCell<Wire>>,
    fail_pair: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that cannot be split into a channel pair.
    pub fn failing() -> Self {
        Self {
            fail_pair: true,
            ..Self::default()
        }
    }

    /// Make `bytes` available to the next reads.
    pub fn push(&self, bytes: &[u8]) {
        self.wire
            .borrow_mut()
            .incoming
            .push_back(ReadStep::Data(bytes.to_vec()));
    }

    /// End the stream once queued data has been read.
    pub fn push_eof(&self) {
        self.wire.borrow_mut().incoming.push_back(ReadStep::Eof);
    }

    /// Fail the next read once queued data has been read.
    pub fn push_error(&self) {
        self.wire.borrow_mut().incoming.push_back(ReadStep::Fail);
    }

    /// Accept at most `limit` bytes per write call.
    pub fn set_write_limit(&self, limit: usize) {
        self.wire.borrow_mut().write_limit = Some(limit);
    }

    pub fn block_writes(&self, blocked: bool) {
        self.wire.borrow_mut().write_blocked = blocked;
    }

    pub fn fail_writes(&self) {
        self.wire.borrow_mut().write_failed = true;
    }

    /// Bytes accepted by each write call, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.wire.borrow().written.clone()
    }

    /// Number of channel halves dropped so far.
    pub fn closed_halves(&self) -> usize {
        self.wire.borrow().closed_halves
    }
}

/// One half of a [`MockTransport`].
pub struct MockChannel {
    wire: Rc<RefCell<Wire>>,
}

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.wire.borrow_mut();
        match wire.incoming.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(ReadStep::Eof) => {
                wire.incoming.push_front(ReadStep::Eof);
                Ok(0)
            }
            Some(ReadStep::Fail) => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset",
            )),
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    data.drain(..n);
                    wire.incoming.push_front(ReadStep::Data(data));
                }
                Ok(n)
            }
        }
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut wire = self.wire.borrow_mut();
        if wire.write_failed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if wire.write_blocked {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = wire.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        wire.written.push(buf[..n].to_vec());
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.wire.borrow_mut().closed_halves += 1;
    }
}

/// Reactor with a manual clock and explicit event delivery.
pub struct ManualReactor {
    now: Cell<Instant>,
    tokens: RefCell<TokenAllocator>,
    timers: RefCell<TimerQueue>,
    pending: RefCell<VecDeque<(Token, u64, StreamEvent)>>,
    fail_register: Cell<Option<Direction>>,
}

impl ManualReactor {
    pub fn new() -> Self {
        Self {
            now: Cell::new(Instant::now()),
            tokens: RefCell::new(TokenAllocator::new(16)),
            timers: RefCell::new(TimerQueue::new()),
            pending: RefCell::new(VecDeque::new()),
            fail_register: Cell::new(None),
        }
    }

    /// Make registrations for `direction` fail.
    pub fn fail_register(&self, direction: Direction) {
        self.fail_register.set(Some(direction));
    }

    /// Deliver `event` to the handler registered for `token`, as if the poller
    /// had reported it. Returns false if nothing is registered.
    pub fn deliver(&self, token: Token, event: StreamEvent) -> bool {
        let registration = self.tokens.borrow().get(token);
        match registration {
            Some(registration) => {
                registration
                    .handler
                    .on_stream_event(token, registration.direction, event);
                true
            }
            None => false,
        }
    }

    /// Deliver posted events, including those posted meanwhile, until none
    /// are left.
    pub fn run_pending(&self) {
        for _ in 0..1000 {
            let batch = std::mem::take(&mut *self.pending.borrow_mut());
            if batch.is_empty() {
                self.tokens.borrow_mut().reclaim();
                return;
            }
            for (token, generation, event) in batch {
                let registration = self.tokens.borrow().get(token);
                if let Some(registration) = registration {
                    if registration.generation == generation {
                        registration
                            .handler
                            .on_stream_event(token, registration.direction, event);
                    }
                }
            }
        }
        panic!("posted events never settled");
    }

    /// Move the clock forward and fire every timer that came due.
    pub fn advance(&self, by: Duration) {
        let now = self.now.get() + by;
        self.now.set(now);
        loop {
            let expired = self.timers.borrow_mut().pop_expired(now);
            let Some((timer, handler)) = expired else {
                break;
            };
            handler.on_timer(timer);
        }
    }

    pub fn registered(&self) -> usize {
        self.tokens.borrow().len()
    }

    pub fn armed_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }
}

impl Reactor for ManualReactor {
    type Handle = MockTransport;
    type Channel = MockChannel;

    fn channel_pair(&self, handle: MockTransport) -> io::Result<(MockChannel, MockChannel)> {
        if handle.fail_pair {
            return Err(io::Error::new(io::ErrorKind::Other, "pair unavailable"));
        }
        Ok((
            MockChannel {
                wire: Rc::clone(&handle.wire),
            },
            MockChannel { wire: handle.wire },
        ))
    }

    fn register(
        &self,
        _channel: &mut MockChannel,
        direction: Direction,
        handler: Rc<dyn EventHandler>,
    ) -> io::Result<Token> {
        if self.fail_register.get() == Some(direction) {
            return Err(io::Error::new(io::ErrorKind::Other, "register refused"));
        }
        Ok(self.tokens.borrow_mut().alloc(direction, handler))
    }

    fn unregister(&self, _channel: &mut MockChannel, token: Token) {
        let registration = self.tokens.borrow_mut().free(token);
        drop(registration);
    }

    fn post(&self, token: Token, event: StreamEvent) {
        let generation = self.tokens.borrow().generation(token);
        if let Some(generation) = generation {
            self.pending
                .borrow_mut()
                .push_back((token, generation, event));
        }
    }

    fn now(&self) -> Instant {
        self.now.get()
    }

    fn arm_timer(&self, deadline: Instant, handler: Rc<dyn EventHandler>) -> TimerId {
        self.timers.borrow_mut().arm(deadline, handler)
    }

    fn cancel_timer(&self, timer: TimerId) {
        let handler = self.timers.borrow_mut().cancel(timer);
        drop(handler);
    }
}
