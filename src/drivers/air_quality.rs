//! MQ-class air-quality sensor behind an MCP3008 ADC.
//!
//! The MCP3008 returns 10-bit conversions; they are widened to the 12-bit
//! scale the AQI mapping is expressed in.  Calibration keys:
//! `baseline` (clean-air raw value, default 0) and `sensitivity`
//! (gain around the baseline, default 1).

use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use log::debug;
use serde::Serialize;

use super::{Driver, DriverConfig, DriverCore};
use crate::clock::SharedClock;
use crate::error::DriverError;

pub const FULL_SCALE: u16 = 4095;
pub const AQI_MAX: f32 = 500.0;
pub const MIN_READ_INTERVAL_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AirQualityLevel {
    Excellent,
    Good,
    Moderate,
    Unhealthy,
    Hazardous,
}

impl AirQualityLevel {
    pub fn from_aqi(aqi: f32) -> Self {
        match aqi {
            a if a <= 0.0 => Self::Excellent,
            a if a <= 50.0 => Self::Good,
            a if a <= 100.0 => Self::Moderate,
            a if a <= 150.0 => Self::Unhealthy,
            _ => Self::Hazardous,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Moderate => "moderate",
            Self::Unhealthy => "unhealthy",
            Self::Hazardous => "hazardous",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AirQualityReading {
    /// Calibrated 12-bit value.
    pub raw: f32,
    pub aqi: f32,
    pub level: AirQualityLevel,
    pub timestamp: f64,
    pub cached: bool,
}

/// Gain around the clean-air baseline.
pub fn apply_calibration(raw: f32, baseline: f32, sensitivity: f32) -> f32 {
    (raw - baseline) * sensitivity + baseline
}

pub fn raw_to_aqi(raw: f32, full_scale: u16) -> f32 {
    (raw / f32::from(full_scale) * AQI_MAX).clamp(0.0, AQI_MAX)
}

// ---------------------------------------------------------------------------
// ADC
// ---------------------------------------------------------------------------

/// One analog input channel.
pub trait AdcChannel {
    fn read_raw(&mut self) -> Result<u16, DriverError>;

    /// Value of a full-scale conversion as returned by `read_raw`.
    fn full_scale(&self) -> u16;
}

/// Single-ended MCP3008 channel over SPI.
pub struct Mcp3008<S> {
    spi: S,
    channel: u8,
}

impl<S: SpiDevice> Mcp3008<S> {
    /// `channel` must be 0–7.
    pub fn new(spi: S, channel: u8) -> Result<Self, DriverError> {
        if channel > 7 {
            return Err(DriverError::InvalidCommand);
        }
        Ok(Self { spi, channel })
    }
}

impl<S: SpiDevice> AdcChannel for Mcp3008<S> {
    fn read_raw(&mut self) -> Result<u16, DriverError> {
        // Start bit, then single-ended mode and channel in the high nibble.
        let mut buf = [0x01, 0x80 | (self.channel << 4), 0x00];
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(|_| DriverError::Hardware)?;
        let ten_bit = (u16::from(buf[1] & 0x03) << 8) | u16::from(buf[2]);
        Ok(ten_bit << 2)
    }

    fn full_scale(&self) -> u16 {
        FULL_SCALE
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct AirQualitySensor<A, D> {
    core: DriverCore,
    adc: A,
    delay: D,
    last: Option<AirQualityReading>,
}

impl<A: AdcChannel, D: DelayNs> AirQualitySensor<A, D> {
    pub fn new(config: DriverConfig, adc: A, delay: D, clock: SharedClock) -> Self {
        Self {
            core: DriverCore::new(config, clock),
            adc,
            delay,
            last: None,
        }
    }

    pub fn last_reading(&self) -> Option<AirQualityReading> {
        self.last
    }
}

impl<A: AdcChannel, D: DelayNs> Driver for AirQualitySensor<A, D> {
    type Reading = AirQualityReading;
    type Command = Infallible;

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }

    fn initialize(&mut self) -> Result<(), DriverError> {
        self.core.begin_init()?;
        // A test conversion proves the bus is wired.
        let check = self.adc.read_raw().map(|_| ());
        self.core.finish_init(check)
    }

    fn read(&mut self) -> Result<AirQualityReading, DriverError> {
        self.core.ensure_operable()?;
        let now = self.core.now();
        if let Some(last) = self.last {
            if now - last.timestamp < MIN_READ_INTERVAL_SECS {
                return Ok(AirQualityReading { cached: true, ..last });
            }
        }

        let sample = f32::from(self.adc.read_raw()?);
        let cfg = self.core.config();
        let raw = apply_calibration(
            sample,
            cfg.calibration_or("baseline", 0.0),
            cfg.calibration_or("sensitivity", 1.0),
        );
        let aqi = raw_to_aqi(raw, self.adc.full_scale());
        let level = AirQualityLevel::from_aqi(aqi);
        debug!("{}: raw={raw:.0} aqi={aqi:.0} ({})", self.core.name(), level.as_str());

        let reading = AirQualityReading {
            raw,
            aqi,
            level,
            timestamp: now,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use embedded_hal::spi::{ErrorKind, ErrorType, Operation};

    /// SPI device answering every transfer with a fixed 10-bit value.
    struct FakeSpi {
        value: u16,
        last_tx: [u8; 3],
    }

    impl ErrorType for FakeSpi {
        type Error = ErrorKind;
    }

    impl SpiDevice for FakeSpi {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), ErrorKind> {
            for op in operations {
                if let Operation::TransferInPlace(buf) = op {
                    self.last_tx.copy_from_slice(buf);
                    buf[0] = 0;
                    buf[1] = (self.value >> 8) as u8 & 0x03;
                    buf[2] = self.value as u8;
                }
            }
            Ok(())
        }
    }

    struct FixedAdc(u16);

    impl AdcChannel for FixedAdc {
        fn read_raw(&mut self) -> Result<u16, DriverError> {
            Ok(self.0)
        }
        fn full_scale(&self) -> u16 {
            FULL_SCALE
        }
    }

    #[test]
    fn mcp3008_frames_channel_and_widens_to_12_bit() {
        let mut adc = Mcp3008::new(FakeSpi { value: 0x2AB, last_tx: [0; 3] }, 5).unwrap();
        assert_eq!(adc.read_raw(), Ok(0x2AB << 2));
        assert_eq!(adc.spi.last_tx, [0x01, 0xD0, 0x00]);
        assert!(Mcp3008::new(FakeSpi { value: 0, last_tx: [0; 3] }, 8).is_err());
    }

    #[test]
    fn level_bands() {
        assert_eq!(AirQualityLevel::from_aqi(0.0), AirQualityLevel::Excellent);
        assert_eq!(AirQualityLevel::from_aqi(50.0), AirQualityLevel::Good);
        assert_eq!(AirQualityLevel::from_aqi(100.0), AirQualityLevel::Moderate);
        assert_eq!(AirQualityLevel::from_aqi(150.0), AirQualityLevel::Unhealthy);
        assert_eq!(AirQualityLevel::from_aqi(150.1), AirQualityLevel::Hazardous);
    }

    #[test]
    fn aqi_scales_and_clamps() {
        assert_eq!(raw_to_aqi(0.0, FULL_SCALE), 0.0);
        assert_eq!(raw_to_aqi(4095.0, FULL_SCALE), 500.0);
        assert_eq!(raw_to_aqi(9000.0, FULL_SCALE), 500.0);
        assert_eq!(raw_to_aqi(-20.0, FULL_SCALE), 0.0);
    }

    #[test]
    fn calibration_applies_gain_around_baseline() {
        let clock = SimClock::new();
        let config = DriverConfig::new("aq")
            .with_calibration("baseline", 400.0)
            .with_calibration("sensitivity", 2.0);
        let mut s = AirQualitySensor::new(config, FixedAdc(800), clock.clone(), clock.shared());
        s.initialize().unwrap();
        let r = s.read().unwrap();
        assert_eq!(r.raw, 1200.0);
        assert!((r.aqi - 1200.0 / 4095.0 * 500.0).abs() < 1e-3);
        assert_eq!(r.level, AirQualityLevel::Hazardous);
    }

    #[test]
    fn rate_limited_reads_are_cached() {
        let clock = SimClock::new();
        let mut s = AirQualitySensor::new(DriverConfig::new("aq"), FixedAdc(300), clock.clone(), clock.shared());
        s.initialize().unwrap();
        assert!(!s.read().unwrap().cached);
        s.adc.0 = 3000;
        let again = s.read().unwrap();
        assert!(again.cached);
        assert_eq!(again.raw, 300.0);
        clock.advance_secs(1.0);
        assert_eq!(s.read().unwrap().raw, 3000.0);
    }
}
