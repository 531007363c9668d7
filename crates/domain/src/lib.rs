//! # blinksim-domain
//!
//! Pure domain model for the blinksim device simulator.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Programs** (declarative behavior descriptions: declarations,
//!   actions, conditions, expressions)
//! - Define the **Declared State Set** and **Ranged** (wrapping) integers
//! - Define the **Light Directive** consumed by renderers
//! - Define **Inputs** (hardware-like events fed to a device) and
//!   **Device Events** (records of what a device did)
//! - Contain all invariant enforcement that needs no runtime
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app` or the binary.
//! Everything that needs a clock, a channel or a task lives in the `app` crate.

pub mod error;
pub mod id;
pub mod time;

pub mod event;
pub mod input;
pub mod light;
pub mod program;
pub mod ranged;
pub mod state;
