//! Outbound bus events.
//!
//! Controllers and the [`TerrariumService`](super::service::TerrariumService)
//! emit these through the [`EventSink`](super::ports::EventSink) port.
//! Each variant maps to one named topic with a fixed payload shape;
//! serialized form is `{"topic": ..., "payload": ...}`.

use serde::Serialize;

use super::commands::Mode;
use crate::controllers::sensor::{Alert, SensorSnapshot};

/// Structured events published by the control core.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", content = "payload", rename_all = "snake_case")]
pub enum Event {
    /// Full aggregated snapshot, once per sensor cycle.
    SensorData(SensorSnapshot),
    Alert(Alert),
    ActuatorAction(ActionRecord),

    HeaterStarted(Actuation),
    HeaterStopped(Actuation),
    HeaterEmergencyStop(Actuation),

    HumidificationStarted(Actuation),
    HumidificationStopped(Actuation),
    HumidificationEmergencyStop(Actuation),

    FanSpeedChanged { target: f32, speed: f32, timestamp: f64 },

    FeedingStarted(FeedingReport),
    FeedingStopped(FeedingReport),
    FeedingEmergencyStop(FeedingReport),

    ModeChanged { from: Mode, to: Mode, timestamp: f64 },
    EmergencyStop { timestamp: f64 },
    EmergencyResumed { timestamp: f64 },

    /// Safety supervisor raised one or more faults (bitmask).
    SafetyFault { faults: u8, timestamp: f64 },
    SafetyCleared { timestamp: f64 },
}

impl Event {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::SensorData(_) => "sensor_data",
            Self::Alert(_) => "alert",
            Self::ActuatorAction(_) => "actuator_action",
            Self::HeaterStarted(_) => "heater_started",
            Self::HeaterStopped(_) => "heater_stopped",
            Self::HeaterEmergencyStop(_) => "heater_emergency_stop",
            Self::HumidificationStarted(_) => "humidification_started",
            Self::HumidificationStopped(_) => "humidification_stopped",
            Self::HumidificationEmergencyStop(_) => "humidification_emergency_stop",
            Self::FanSpeedChanged { .. } => "fan_speed_changed",
            Self::FeedingStarted(_) => "feeding_started",
            Self::FeedingStopped(_) => "feeding_stopped",
            Self::FeedingEmergencyStop(_) => "feeding_emergency_stop",
            Self::ModeChanged { .. } => "mode_changed",
            Self::EmergencyStop { .. } => "emergency_stop",
            Self::EmergencyResumed { .. } => "emergency_resumed",
            Self::SafetyFault { .. } => "safety_fault",
            Self::SafetyCleared { .. } => "safety_cleared",
        }
    }
}

/// Heater / humidifier switching payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Actuation {
    /// Measured value that triggered the change, when known.
    pub value: Option<f32>,
    pub target: f32,
    pub reason: &'static str,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeedingReport {
    pub quantity: f32,
    pub open_secs: f32,
    pub elapsed_secs: f64,
    pub daily_feeds: u32,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Actuator {
    Led,
    Heater,
    Humidifier,
    Fan,
    Feeder,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionValue {
    Switch(bool),
    Level(f32),
    Position(&'static str),
}

/// One actuator change, as kept in the service's action history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActionRecord {
    pub actuator: Actuator,
    pub value: ActionValue,
    pub timestamp: f64,
}
