//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the device runtime and the outside
//! world. The runtime publishes what devices do through them without
//! knowing who is listening.

pub mod event_bus;

pub use event_bus::EventPublisher;
