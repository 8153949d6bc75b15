//! # Causeway Core
//!
//! The relay engine and the capabilities it runs against.
//!
//! This crate provides:
//! - Bus capability traits the adapter crates implement
//! - The shared topic registry built at provisioning time
//! - Idempotent provisioning of cloud topics and subscriptions
//! - The bidirectional relay engine and its pump tasks
//!
//! Nothing in here speaks a wire protocol; the engine is generic over the
//! [`bus`] traits and is exercised in tests with in-memory fakes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod provision;
pub mod registry;
pub mod relay;

pub use bus::{
    CloudBus, CloudBusError, CloudMessage, LocalBus, LocalBusError, LocalMessage, PushConfig,
    SubscriptionHandle, TopicHandle,
};
pub use provision::{ensure_subscription, ensure_topic, ProvisionError, DEFAULT_ACK_DEADLINE};
pub use registry::{RegistryError, TopicRegistry};
pub use relay::{RelayEngine, RelayError};
