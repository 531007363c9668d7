//! # blinksimd — blink simulation daemon
//!
//! Composition root that wires the device runtime to a scenario.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Load the scenario and the programs it references
//! - Spawn the simulation driver with the in-process event bus
//! - Play the scenario timeline and report the final device snapshots
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no device logic belongs here.

pub mod config;
pub mod runner;
pub mod scenario;
