//! Single-threaded reactor runtime.
//!
//! Connection logic talks to the event loop only through the [`reactor`]
//! traits:
//! - `Reactor`: channel registration, deferred events and one-shot timers
//! - `EventHandler`: the callbacks a connection receives
//!
//! The `mio` backend (epoll on Linux, kqueue on macOS) implements them for
//! real sockets; tests drive connections through an in-memory reactor.

mod buffer;
pub mod channel;
mod connection;
pub mod mio;
pub mod reactor;
mod timer;
mod token;

#[cfg(test)]
pub mod testing;

pub(crate) use buffer::ReceiveBuffer;
pub(crate) use connection::{ConnectionCounter, ConnectionSlot};

use crate::config::Config;

/// Run the server on the mio backend.
pub fn run(config: Config) -> std::io::Result<()> {
    self::mio::run(config)
}
