//! Echo protocol implementation.
//!
//! Bytes received on a connection are buffered until a terminator byte
//! (`\n` by default) is seen, then the line, terminator included, is written
//! back unchanged.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  hi\nthere\n
//! Response: hi\n  there\n   (one line written per writable event)
//! ```
//!
//! There is no framing beyond the terminator and no line length limit.
//! A connection is closed when the peer ends the stream (unsent bytes are
//! discarded), on any transport error, or after an idle timeout with no
//! productive reads or writes.

pub mod context;
pub mod parser;

pub use context::EchoContext;
