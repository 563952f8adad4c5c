//! Inbound commands to the terrarium service.
//!
//! These represent actions requested by the outside world (UI, scheduler,
//! remote API) that the [`TerrariumService`](super::service::TerrariumService)
//! interprets and acts upon.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::drivers::servo::ServoPosition;

/// Operating mode.  Orthogonal to the emergency-stop flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Policies drive every actuator.
    Auto,
    /// Only explicit overrides actuate; safety ceilings still apply.
    Manual,
    /// Heater, humidifier, lighting and fan held off every cycle; overrides
    /// and scheduled feeding are suspended.
    Maintenance,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Maintenance => "maintenance",
        })
    }
}

/// Commands that external adapters can send into the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetMode(Mode),
    EmergencyStop,
    EmergencyResume,
    SetHeater(bool),
    /// New humidity target (%RH).
    SetHumidity(f32),
    SetLedIntensity(u8),
    SetFeederPosition(ServoPosition),
    /// Run one airlock feed for the given fly count.
    Feed(u32),
    SetFanSpeed(f32),
    SetFanAuto(bool),
    AcknowledgeAlert(u64),
    ClearAlerts,
    ResetDailyFeeds,
}
