//! Terrarium environmental-control core.
//!
//! Sensor decoders, actuator drivers, hysteresis controllers and a
//! safety-interlocked orchestrator for a live-animal enclosure.  Hardware
//! is reached only through `embedded-hal` traits and the ports in
//! [`app::ports`]; time through [`clock::Clock`].
//!
//! ```text
//!  drivers ──▶ controllers ──▶ app::service ──▶ adapters (bus, log, store)
//!                                  ▲
//!                               safety
//! ```

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod drivers;
pub mod error;
pub mod history;
pub mod safety;

pub use error::{Error, Result};
