//! Application core: orchestration, no direct I/O.
//!
//! The [`service::TerrariumService`] owns every controller, runs the
//! sense → safety → control → actuate cycle, and interprets inbound
//! [`commands::Command`]s.  Everything that leaves the core goes through
//! the port traits in [`ports`], so the whole cycle runs on the host
//! against simulated hardware.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
