//! Driver contract and concrete hardware drivers.
//!
//! Every physical component sits behind the [`Driver`] trait: a uniform
//! `initialize / read / write / cleanup` lifecycle plus the retrying
//! `safe_read` / `safe_write` wrappers that escalate persistent failures.
//!
//! ```text
//!  Uninitialized ──init ok──▶ Ready ◀──success── Error
//!        │                      │                  │
//!        └──init fail──▶ Error ◀┘ retries spent    │ error_count > 10
//!                                                  ▼
//!                                              Disabled (until reset)
//! ```
//!
//! Drivers own their HAL objects exclusively and are in turn owned by the
//! controller that constructs them.

pub mod air_quality;
pub mod dht22;
pub mod pwm;
pub mod relay;
pub mod roles;
pub mod servo;
pub mod timer;
pub mod water_level;

use std::collections::BTreeMap;

use log::{error, info, warn};
use serde::Serialize;

use crate::clock::SharedClock;
use crate::error::DriverError;

pub use air_quality::AirQualityReading;
pub use dht22::ClimateReading;
pub use roles::{Dimmer, Managed, Positioner, SensorDriver, Switch};
pub use water_level::WaterLevelReading;

/// Cumulative failures beyond which a driver is disabled.
pub const MAX_ERROR_COUNT: u32 = 10;

// ---------------------------------------------------------------------------
// Configuration & state
// ---------------------------------------------------------------------------

/// Per-driver configuration.  Fixed after construction except for the
/// calibration map, which [`Driver::calibrate`] may merge into.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverConfig {
    pub name: String,
    pub enabled: bool,
    /// Upper bound for a single blocking protocol exchange.
    pub timeout_ms: u32,
    /// Total attempts per `safe_*` call (at least one).
    pub retry_attempts: u32,
    /// Pause between attempts.
    pub retry_delay_ms: u32,
    /// Named offsets/factors (`temperature_offset`, `baseline`, ...).
    pub calibration: BTreeMap<String, f32>,
}

impl DriverConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            enabled: true,
            timeout_ms: 5000,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            calibration: BTreeMap::new(),
        }
    }

    pub fn with_retries(mut self, attempts: u32, delay_ms: u32) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_calibration(mut self, key: &str, value: f32) -> Self {
        self.calibration.insert(key.to_owned(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Calibration entry or `default` when absent.
    pub fn calibration_or(&self, key: &str, default: f32) -> f32 {
        self.calibration.get(key).copied().unwrap_or(default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Uninitialized,
    Initializing,
    Ready,
    Error,
    Disabled,
}

/// Tagged measurement from any sensor driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    Climate(ClimateReading),
    AirQuality(AirQualityReading),
    WaterLevel(WaterLevelReading),
}

/// Snapshot returned by [`Driver::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverStatus {
    pub name: String,
    pub state: DriverState,
    pub enabled: bool,
    pub read_count: u64,
    pub error_count: u32,
    pub last_error: Option<DriverError>,
    pub last_update: Option<f64>,
    pub uptime_secs: f64,
    pub error_rate: f64,
}

// ---------------------------------------------------------------------------
// DriverCore: shared bookkeeping
// ---------------------------------------------------------------------------

/// State, counters and configuration common to every driver.
pub struct DriverCore {
    config: DriverConfig,
    state: DriverState,
    error_count: u32,
    read_count: u64,
    last_error: Option<DriverError>,
    last_update: Option<f64>,
    created_at: f64,
    clock: SharedClock,
}

impl DriverCore {
    pub fn new(config: DriverConfig, clock: SharedClock) -> Self {
        let created_at = clock.now();
        Self {
            config,
            state: DriverState::Uninitialized,
            error_count: 0,
            read_count: 0,
            last_error: None,
            last_update: None,
            created_at,
            clock,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.state != DriverState::Disabled
    }

    /// Gate for the raw operations.  `Error` still permits hardware access
    /// so a recovered component can bring the driver back to `Ready`.
    pub fn ensure_operable(&self) -> Result<(), DriverError> {
        match self.state {
            DriverState::Ready | DriverState::Error => Ok(()),
            DriverState::Disabled => Err(DriverError::Disabled),
            DriverState::Uninitialized | DriverState::Initializing => Err(DriverError::NotReady),
        }
    }

    /// Enter `Initializing`.  Refused once disabled.
    pub fn begin_init(&mut self) -> Result<(), DriverError> {
        if self.state == DriverState::Disabled {
            return Err(DriverError::Disabled);
        }
        self.state = DriverState::Initializing;
        Ok(())
    }

    /// Conclude `initialize()` with the hardware setup result.
    pub fn finish_init(&mut self, result: Result<(), DriverError>) -> Result<(), DriverError> {
        match result {
            Ok(()) => {
                self.state = DriverState::Ready;
                info!("driver {}: ready", self.config.name);
                Ok(())
            }
            Err(e) => {
                self.record_failure(e);
                Err(e)
            }
        }
    }

    /// A `safe_*` call succeeded.
    pub fn record_success(&mut self) {
        if self.state == DriverState::Error {
            info!("driver {}: recovered", self.config.name);
        }
        self.error_count = 0;
        self.state = DriverState::Ready;
        self.last_update = Some(self.clock.now());
    }

    pub fn count_read(&mut self) {
        self.read_count += 1;
    }

    /// Retries are exhausted: count it and escalate.
    pub fn record_failure(&mut self, e: DriverError) {
        self.error_count = self.error_count.saturating_add(1);
        self.last_error = Some(e);
        if self.error_count > MAX_ERROR_COUNT {
            if self.state != DriverState::Disabled {
                error!(
                    "driver {}: {} consecutive failures, disabling ({e})",
                    self.config.name, self.error_count
                );
            }
            self.state = DriverState::Disabled;
        } else {
            error!("driver {}: {e} (error_count={})", self.config.name, self.error_count);
            self.state = DriverState::Error;
        }
    }

    /// Return to `Uninitialized` with cleared counters.
    pub fn reset(&mut self) {
        self.state = DriverState::Uninitialized;
        self.error_count = 0;
        self.last_error = None;
    }

    /// Terminal state after `cleanup()`.
    pub fn shut_down(&mut self) {
        self.state = DriverState::Disabled;
        info!("driver {}: cleaned up", self.config.name);
    }

    pub fn merge_calibration(&mut self, entries: &[(&str, f32)]) {
        for (k, v) in entries {
            self.config.calibration.insert((*k).to_owned(), *v);
        }
        info!("driver {}: calibration updated", self.config.name);
    }

    pub fn status(&self) -> DriverStatus {
        DriverStatus {
            name: self.config.name.clone(),
            state: self.state,
            enabled: self.is_enabled(),
            read_count: self.read_count,
            error_count: self.error_count,
            last_error: self.last_error,
            last_update: self.last_update,
            uptime_secs: self.clock.now() - self.created_at,
            error_rate: f64::from(self.error_count) / self.read_count.max(1) as f64,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver trait
// ---------------------------------------------------------------------------

/// Capability contract implemented by every concrete driver.
pub trait Driver {
    type Reading;
    type Command: Clone;

    fn core(&self) -> &DriverCore;
    fn core_mut(&mut self) -> &mut DriverCore;

    /// Bring the hardware to a known state.
    fn initialize(&mut self) -> Result<(), DriverError>;

    /// One raw read, no retries.
    fn read(&mut self) -> Result<Self::Reading, DriverError>;

    /// One raw write, no retries.
    fn write(&mut self, command: Self::Command) -> Result<(), DriverError>;

    /// Drive outputs to their safe level and release the hardware.
    fn cleanup(&mut self);

    /// Block between retry attempts.
    fn retry_pause(&mut self, ms: u32);

    fn name(&self) -> &str {
        self.core().name()
    }

    fn state(&self) -> DriverState {
        self.core().state()
    }

    fn is_ready(&self) -> bool {
        self.core().state() == DriverState::Ready
    }

    fn status(&self) -> DriverStatus {
        self.core().status()
    }

    /// Retrying read.  Fails immediately when disabled or not initialized;
    /// non-transient errors are neither retried nor counted.
    fn safe_read(&mut self) -> Result<Self::Reading, DriverError> {
        let reading = self.with_retries("read", |d| d.read())?;
        self.core_mut().count_read();
        Ok(reading)
    }

    /// Retrying write.  Fails immediately when disabled or not initialized.
    fn safe_write(&mut self, command: Self::Command) -> Result<(), DriverError> {
        self.with_retries("write", |d| d.write(command.clone()))
    }

    /// Shared retry loop behind `safe_read` / `safe_write`.
    fn with_retries<T>(
        &mut self,
        op: &str,
        mut f: impl FnMut(&mut Self) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        if !self.core().config().enabled {
            return Err(DriverError::Disabled);
        }
        self.core().ensure_operable()?;

        let attempts = self.core().config().retry_attempts.max(1);
        let delay_ms = self.core().config().retry_delay_ms;
        let mut attempt = 1;
        loop {
            match f(self) {
                Ok(v) => {
                    self.core_mut().record_success();
                    return Ok(v);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt < attempts => {
                    warn!(
                        "driver {}: {op} attempt {attempt}/{attempts} failed: {e}",
                        self.core().name()
                    );
                    self.retry_pause(delay_ms);
                    attempt += 1;
                }
                Err(e) => {
                    self.core_mut().record_failure(e);
                    return Err(e);
                }
            }
        }
    }

    /// Clear counters and re-run `initialize()`.  The only way out of `Disabled`.
    fn reset(&mut self) -> Result<(), DriverError> {
        self.core_mut().reset();
        let result = self.initialize();
        match result {
            Ok(()) => info!("driver {}: reset ok", self.core().name()),
            Err(e) => warn!("driver {}: reset failed: {e}", self.core().name()),
        }
        result
    }

    /// Merge calibration entries into the live configuration.
    fn calibrate(&mut self, entries: &[(&str, f32)]) {
        self.core_mut().merge_calibration(entries);
    }
}
