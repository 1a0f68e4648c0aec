//! Protocol implementations.
//!
//! - `echo`: line-oriented echo, one context per connection

pub mod echo;
