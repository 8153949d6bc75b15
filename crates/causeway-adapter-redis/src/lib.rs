//! # Causeway Redis Adapter
//!
//! Binds the relay's local-bus capability to a Redis server, using plain
//! Redis pub/sub channels as topics.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;

pub use bus::RedisBus;
