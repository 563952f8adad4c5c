//! Safety supervisor.
//!
//! The supervisor runs **every cycle right after sensing**, in every mode,
//! and accumulates a fault bitmask.  The service forces the matching
//! actuators safe for as long as a bit is set, ahead of any policy or
//! manual override.
//!
//! ## Fault lifecycle
//!
//! 1. A condition triggers a fault (e.g. temperature over the ceiling).
//! 2. The supervisor sets the corresponding bit.
//! 3. The service forces the heater / humidifier off each cycle.
//! 4. Each cycle the supervisor re-evaluates.  If the condition clears,
//!    it unsets the bit.
//! 5. Normal evaluation resumes once the relevant bits are clear.
//!
//! A missing reading never clears a fault it would have to confirm:
//! a lost temperature sensor keeps `OverTemperature` as it was and, after
//! [`SENSOR_LOSS_CYCLES`] misses, raises `ClimateSensorLost` on top.

use crate::config::TerrariumConfig;
use crate::controllers::sensor::SensorSnapshot;
use crate::error::SafetyFault;
use log::{error, info};

/// Consecutive cycles without a climate reading before the sensor counts as lost.
pub const SENSOR_LOSS_CYCLES: u32 = 3;

/// Safety supervisor.
pub struct SafetySupervisor {
    max_temperature: f32,
    max_humidity: f32,
    water_level_min: f32,
    /// Latched fault bitmask.
    faults: u8,
    /// Consecutive cycles with no temperature reading.
    climate_misses: u32,
}

impl SafetySupervisor {
    pub fn new(config: &TerrariumConfig) -> Self {
        Self {
            max_temperature: config.heater.max_temperature,
            max_humidity: config.humidifier.max_humidity,
            water_level_min: config.limits.water_level_min,
            faults: 0,
            climate_misses: 0,
        }
    }

    /// Evaluate all safety conditions against the latest sensor snapshot.
    /// Returns the updated fault bitmask.
    pub fn evaluate(&mut self, snap: &SensorSnapshot) -> u8 {
        // ── Climate ───────────────────────────────────────────────
        if let Some(t) = snap.temperature {
            self.eval_fault(SafetyFault::OverTemperature, t > self.max_temperature);
        }
        if let Some(h) = snap.humidity {
            self.eval_fault(SafetyFault::OverHumidity, h > self.max_humidity);
        }

        // ── Sensor loss ───────────────────────────────────────────
        if snap.temperature.is_some() {
            self.climate_misses = 0;
        } else {
            self.climate_misses = self.climate_misses.saturating_add(1);
        }
        self.eval_fault(
            SafetyFault::ClimateSensorLost,
            self.climate_misses >= SENSOR_LOSS_CYCLES,
        );

        // ── Reservoir ─────────────────────────────────────────────
        if let Some(w) = snap.water_level {
            self.eval_fault(SafetyFault::WaterLevelLow, w < self.water_level_min);
        }

        self.faults
    }

    /// Current fault bitmask.
    pub fn faults(&self) -> u8 {
        self.faults
    }

    /// True if **any** fault is active.
    pub fn has_faults(&self) -> bool {
        self.faults != 0
    }

    /// Check if a specific fault is active.
    pub fn has_fault(&self, fault: SafetyFault) -> bool {
        self.faults & fault.mask() != 0
    }

    /// Heating must stay off.
    pub fn heater_inhibited(&self) -> bool {
        self.has_fault(SafetyFault::OverTemperature) || self.has_fault(SafetyFault::ClimateSensorLost)
    }

    /// Humidification must stay off.
    pub fn humidifier_inhibited(&self) -> bool {
        self.has_fault(SafetyFault::OverHumidity)
            || self.has_fault(SafetyFault::WaterLevelLow)
            || self.has_fault(SafetyFault::ClimateSensorLost)
    }

    /// Active faults, in bit order.
    pub fn active(&self) -> Vec<SafetyFault> {
        SafetyFault::ALL.into_iter().filter(|f| self.has_fault(*f)).collect()
    }

    // ── Internal ──────────────────────────────────────────────────

    /// Set or clear a fault bit based on a boolean condition.
    fn eval_fault(&mut self, fault: SafetyFault, condition: bool) {
        if condition {
            if self.faults & fault.mask() == 0 {
                error!("SAFETY FAULT SET: {fault}");
            }
            self.faults |= fault.mask();
        } else {
            if self.faults & fault.mask() != 0 {
                info!("SAFETY FAULT CLEARED: {fault}");
            }
            self.faults &= !fault.mask();
        }
    }
}
