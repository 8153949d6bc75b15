//! # Causeway Google Cloud Adapter
//!
//! Binds the relay's cloud-bus capability to Google Cloud Pub/Sub over its
//! v1 REST API. Works against the real service or the emulator (point the
//! endpoint at it and leave the bearer token unset).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod rest;

pub use client::{PubsubClient, PubsubConfig};
