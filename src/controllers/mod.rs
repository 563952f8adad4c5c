//! Per-function controllers.
//!
//! Each controller exclusively owns the drivers it actuates or samples and
//! is in turn owned by the [`TerrariumService`](crate::app::service::TerrariumService).
//! Controllers are polled: the service calls `update` once per cycle and
//! nothing runs between calls except relay auto-off timers.
//!
//! ```text
//!  SensorController ──snapshot──▶ service policy ──▶ Heater / Humidifier
//!                                                 ──▶ Fan / Lighting / Feeder
//! ```

pub mod fan;
pub mod feeder;
pub mod heater;
pub mod humidifier;
pub mod lighting;
pub mod sensor;

use log::warn;
use serde::Serialize;

use crate::drivers::Managed;
use crate::error::{ControllerError, DriverError};

pub use fan::FanController;
pub use feeder::FeederController;
pub use heater::HeaterController;
pub use humidifier::HumidifierController;
pub use lighting::LightingController;
pub use sensor::SensorController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Uninitialized,
    Ready,
    Running,
    Error,
}

/// Lifecycle every controller exposes.
pub trait Controller {
    /// Initialize owned drivers and drive outputs to their safe level.
    fn initialize(&mut self) -> Result<(), ControllerError>;

    /// Bring outputs to a safe state and release the drivers.
    fn cleanup(&mut self);

    fn state(&self) -> ControllerState;
}

/// Cycle gate shared by the controllers: refuse before `initialize()`.
pub(crate) fn ensure_started(state: ControllerState) -> Result<(), ControllerError> {
    match state {
        ControllerState::Uninitialized => Err(ControllerError::NotReady),
        _ => Ok(()),
    }
}

/// Initialize a required driver, mapping failure into the controller error.
pub(crate) fn init_required<M: Managed + ?Sized>(name: &str, driver: &mut M) -> Result<(), ControllerError> {
    driver.init().map_err(|e| {
        warn!("{name}: driver {} failed to initialize: {e}", driver.health().name);
        ControllerError::Driver(e)
    })
}

/// Initialize an optional driver; failure only degrades the controller.
pub(crate) fn init_optional<M: Managed + ?Sized>(name: &str, driver: &mut M) -> Option<DriverError> {
    match driver.init() {
        Ok(()) => None,
        Err(e) => {
            warn!("{name}: optional driver {} unavailable: {e}", driver.health().name);
            Some(e)
        }
    }
}
