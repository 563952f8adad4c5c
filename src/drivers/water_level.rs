//! Duty-cycle water-level sensor.
//!
//! The sensor encodes level as the high time of a ~50 Hz pulse train:
//! 1 ms means empty, 2 ms means full.  Ten pulses are timed and averaged,
//! mapped linearly onto 0–100 %, then rescaled by the configured
//! empty/full calibration points.
//!
//! Calibration keys: `empty_level` (default 0), `full_level` (default 100),
//! both expressed on the raw 0–100 scale.

use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;
use log::{debug, info};
use serde::Serialize;

use super::{Driver, DriverConfig, DriverCore};
use crate::clock::SharedClock;
use crate::error::DriverError;

pub const SAMPLE_COUNT: usize = 10;
pub const SAMPLE_TIMEOUT_US: u32 = 100_000;
pub const SAMPLE_PAUSE_MS: u32 = 10;
pub const EMPTY_PULSE_US: f32 = 1000.0;
pub const FULL_PULSE_US: f32 = 2000.0;
pub const MIN_READ_INTERVAL_SECS: f64 = 1.0;

pub const EMPTY_THRESHOLD: f32 = 10.0;
pub const LOW_THRESHOLD: f32 = 25.0;
pub const FULL_THRESHOLD: f32 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaterLevelReading {
    /// Calibrated level, 0–100 %.
    pub level_percent: f32,
    /// Uncalibrated level derived straight from the pulse width.
    pub raw_percent: f32,
    /// Averaged high time.
    pub pulse_us: f32,
    pub timestamp: f64,
    pub cached: bool,
}

/// Map an averaged high time onto the raw 0–100 scale.
pub fn pulse_to_percent(pulse_us: f32) -> f32 {
    ((pulse_us - EMPTY_PULSE_US) / (FULL_PULSE_US - EMPTY_PULSE_US) * 100.0).clamp(0.0, 100.0)
}

/// Rescale a raw level between the empty and full calibration points.
/// A degenerate calibration (`full <= empty`) reads as 0.
pub fn apply_calibration(raw: f32, empty: f32, full: f32) -> f32 {
    if full <= empty {
        return 0.0;
    }
    ((raw - empty) / (full - empty) * 100.0).clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Pulse input
// ---------------------------------------------------------------------------

/// Times one high pulse on the level line.
pub trait PulseInput {
    fn high_pulse_us(&mut self, timeout_us: u32) -> Result<u32, DriverError>;
}

/// GPIO edge timer, polling at 1 µs.
pub struct GpioPulseInput<P, D> {
    pin: P,
    delay: D,
}

impl<P: InputPin, D: DelayNs> GpioPulseInput<P, D> {
    pub fn new(pin: P, delay: D) -> Self {
        Self { pin, delay }
    }

    fn wait_for(&mut self, high: bool, budget: &mut u32) -> Result<u32, DriverError> {
        let mut elapsed = 0;
        while self.pin.is_high().map_err(|_| DriverError::Hardware)? != high {
            if *budget == 0 {
                return Err(DriverError::Timeout);
            }
            self.delay.delay_us(1);
            *budget -= 1;
            elapsed += 1;
        }
        Ok(elapsed)
    }
}

impl<P: InputPin, D: DelayNs> PulseInput for GpioPulseInput<P, D> {
    fn high_pulse_us(&mut self, timeout_us: u32) -> Result<u32, DriverError> {
        let mut budget = timeout_us;
        // Skip a pulse already in progress, then time a whole one.
        self.wait_for(false, &mut budget)?;
        self.wait_for(true, &mut budget)?;
        self.wait_for(false, &mut budget)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct WaterLevelSensor<I, D> {
    core: DriverCore,
    input: I,
    delay: D,
    last: Option<WaterLevelReading>,
}

impl<I: PulseInput, D: DelayNs> WaterLevelSensor<I, D> {
    pub fn new(config: DriverConfig, input: I, delay: D, clock: SharedClock) -> Self {
        Self {
            core: DriverCore::new(config, clock),
            input,
            delay,
            last: None,
        }
    }

    pub fn last_reading(&self) -> Option<WaterLevelReading> {
        self.last
    }

    fn last_level(&self) -> Option<f32> {
        self.last.map(|r| r.level_percent)
    }

    pub fn is_empty(&self) -> bool {
        self.last_level().is_some_and(|l| l <= EMPTY_THRESHOLD)
    }

    pub fn is_low(&self) -> bool {
        self.last_level().is_some_and(|l| l <= LOW_THRESHOLD)
    }

    pub fn is_full(&self) -> bool {
        self.last_level().is_some_and(|l| l >= FULL_THRESHOLD)
    }

    pub fn calibration_points(&self) -> (f32, f32) {
        let cfg = self.core.config();
        (cfg.calibration_or("empty_level", 0.0), cfg.calibration_or("full_level", 100.0))
    }

    /// Record the current raw level as "empty".
    pub fn calibrate_empty(&mut self) -> Result<f32, DriverError> {
        let raw = self.measure_raw()?;
        self.calibrate(&[("empty_level", raw)]);
        info!("{}: empty point = {raw:.1}", self.core.name());
        Ok(raw)
    }

    /// Record the current raw level as "full".
    pub fn calibrate_full(&mut self) -> Result<f32, DriverError> {
        let raw = self.measure_raw()?;
        self.calibrate(&[("full_level", raw)]);
        info!("{}: full point = {raw:.1}", self.core.name());
        Ok(raw)
    }

    fn sample_average_us(&mut self) -> Result<f32, DriverError> {
        let mut total: u64 = 0;
        for i in 0..SAMPLE_COUNT {
            total += u64::from(self.input.high_pulse_us(SAMPLE_TIMEOUT_US)?);
            if i + 1 < SAMPLE_COUNT {
                self.delay.delay_ms(SAMPLE_PAUSE_MS);
            }
        }
        Ok(total as f32 / SAMPLE_COUNT as f32)
    }

    fn measure_raw(&mut self) -> Result<f32, DriverError> {
        self.core.ensure_operable()?;
        Ok(pulse_to_percent(self.sample_average_us()?))
    }
}

impl<I: PulseInput, D: DelayNs> Driver for WaterLevelSensor<I, D> {
    type Reading = WaterLevelReading;
    type Command = Infallible;

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }

    fn initialize(&mut self) -> Result<(), DriverError> {
        self.core.begin_init()?;
        self.core.finish_init(Ok(()))
    }

    fn read(&mut self) -> Result<WaterLevelReading, DriverError> {
        self.core.ensure_operable()?;
        let now = self.core.now();
        if let Some(last) = self.last {
            if now - last.timestamp < MIN_READ_INTERVAL_SECS {
                return Ok(WaterLevelReading { cached: true, ..last });
            }
        }

        let pulse_us = self.sample_average_us()?;
        let raw_percent = pulse_to_percent(pulse_us);
        let (empty, full) = self.calibration_points();
        let level_percent = apply_calibration(raw_percent, empty, full);
        debug!("{}: {pulse_us:.0}µs -> {level_percent:.1}%", self.core.name());

        let reading = WaterLevelReading {
            level_percent,
            raw_percent,
            pulse_us,
            timestamp: self.core.now(),
            cached: false,
        };
        self.last = Some(reading);
        Ok(reading)
    }

    fn write(&mut self, command: Infallible) -> Result<(), DriverError> {
        match command {}
    }

    fn cleanup(&mut self) {
        self.core.shut_down();
    }

    fn retry_pause(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}
