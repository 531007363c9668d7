//! # blinksim-app
//!
//! Device runtime — everything that turns a program into behavior over time.
//!
//! ## Responsibilities
//! - **Capability registry**: compile a [`Program`](blinksim_domain::program::Program)
//!   declaration by declaration and validate its wiring (`registry`)
//! - **Timer/threshold scheduler**: countdown values with threshold
//!   callbacks, including catch-up of bypassed thresholds (`scheduler`)
//! - **Signal & state engine**: synchronous, re-entrant signal dispatch and
//!   guarded state assignment (`engine`)
//! - **Neighbor debouncer** and **click classifier** (`debounce`, `click`)
//! - **Device shell**: power lifecycle, input gating, event log and
//!   observers (`device`)
//! - **Host simulation**: adjacency graph and cross-device mailbox
//!   (`simulation`), driven asynchronously by `driver`
//! - Define the **`EventPublisher`** port and provide the in-process bus
//!
//! ## Time
//! Every alarm is a [`tokio::time::Instant`] held as data. Nothing in this
//! crate sleeps except the driver, so the runtime can be stepped by hand in
//! tests or run on a paused tokio clock.
//!
//! ## Dependency rule
//! Depends on `blinksim-domain` only (plus `tokio` for time and channels).
//! Never imports the binary.

pub mod click;
pub mod debounce;
pub mod device;
pub mod driver;
pub mod engine;
pub mod event_bus;
pub mod observer;
pub mod ports;
pub mod registry;
pub mod scheduler;
pub mod settings;
pub mod simulation;
