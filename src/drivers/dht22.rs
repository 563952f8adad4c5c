//! DHT22 (AM2302) single-wire temperature/humidity sensor.
//!
//! ## Protocol
//!
//! ```text
//!  host  ‾‾‾‾\__________ ≥18 ms __________/‾‾‾‾ release
//!  dht                                         \__80µs__/‾‾80µs‾‾\  ack
//!  bit   \__50µs__/‾‾ 26–28 µs ‾‾\   → 0
//!        \__50µs__/‾‾‾‾‾‾ 70 µs ‾‾‾‾‾‾\ → 1
//! ```
//!
//! 40 bits, MSB first: humidity ×10 (16 bits), temperature ×10 (bit 16 is
//! the sign, 15-bit magnitude), then a checksum byte equal to the low byte
//! of the sum of the four data bytes.
//!
//! Bit capture ([`Dht22Bus`]) is split from decoding ([`decode_frame`]) so
//! the decoder is a pure function over the 5-byte frame.

use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::debug;
use serde::Serialize;

use super::{Driver, DriverConfig, DriverCore};
use crate::clock::SharedClock;
use crate::error::DriverError;

/// Host start pulse (the sensor requires at least 18 ms).
pub const START_LOW_MS: u32 = 18;
/// High pulses at or above this are `1` bits.
pub const ONE_THRESHOLD_US: u32 = 50;
/// Bound on each acknowledgement edge.
pub const ACK_TIMEOUT_US: u32 = 200;
/// Bound on each data-bit edge.
pub const BIT_TIMEOUT_US: u32 = 120;
pub const FRAME_BITS: usize = 40;
/// Reads closer together than this return the cached value.
pub const MIN_READ_INTERVAL_SECS: f64 = 2.0;

pub const TEMPERATURE_RANGE: (f32, f32) = (-40.0, 80.0);
pub const HUMIDITY_RANGE: (f32, f32) = (0.0, 100.0);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClimateReading {
    pub temperature: f32,
    pub humidity: f32,
    pub timestamp: f64,
    /// True when served from the rate-limit cache.
    pub cached: bool,
}

// ---------------------------------------------------------------------------
// Pure decoding
// ---------------------------------------------------------------------------

/// Low byte of the sum of the four data bytes.
pub fn checksum(data: &[u8; 4]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Pack 40 high-pulse durations into a 5-byte frame.
pub fn frame_from_pulses(pulses: &[u32; FRAME_BITS]) -> [u8; 5] {
    let mut frame = [0u8; 5];
    for (i, us) in pulses.iter().enumerate() {
        if *us >= ONE_THRESHOLD_US {
            frame[i / 8] |= 0x80 >> (i % 8);
        }
    }
    frame
}

/// Checksum-verify and decode a frame to `(temperature °C, humidity %RH)`.
///
/// No range validation here; a mismatch is always an error, never corrected.
pub fn decode_frame(frame: &[u8; 5]) -> Result<(f32, f32), DriverError> {
    let data = [frame[0], frame[1], frame[2], frame[3]];
    if checksum(&data) != frame[4] {
        return Err(DriverError::Checksum);
    }
    let humidity = f32::from(u16::from_be_bytes([frame[0], frame[1]])) / 10.0;
    let magnitude = f32::from(u16::from_be_bytes([frame[2] & 0x7F, frame[3]])) / 10.0;
    let temperature = if frame[2] & 0x80 != 0 { -magnitude } else { magnitude };
    Ok((temperature, humidity))
}

/// Range gate applied after calibration.  Out of range fails, never clamps.
pub fn validate_range(temperature: f32, humidity: f32) -> Result<(), DriverError> {
    let t_ok = (TEMPERATURE_RANGE.0..=TEMPERATURE_RANGE.1).contains(&temperature);
    let h_ok = (HUMIDITY_RANGE.0..=HUMIDITY_RANGE.1).contains(&humidity);
    if t_ok && h_ok { Ok(()) } else { Err(DriverError::OutOfRange) }
}

// ---------------------------------------------------------------------------
// Bus abstraction
// ---------------------------------------------------------------------------

/// Timing-level access to the data line.
pub trait Dht22Bus {
    /// Pull the line low for `low_ms`, then release it.
    fn start_signal(&mut self, low_ms: u32) -> Result<(), DriverError>;

    /// Wait for the sensor's low/high acknowledgement.
    fn await_ack(&mut self, timeout_us: u32) -> Result<(), DriverError>;

    /// Duration of the next data-bit high pulse.
    fn high_pulse_us(&mut self, timeout_us: u32) -> Result<u32, DriverError>;
}

/// Run the full start/ack/40-bit capture sequence.
pub fn capture_frame(bus: &mut impl Dht22Bus) -> Result<[u8; 5], DriverError> {
    bus.start_signal(START_LOW_MS)?;
    bus.await_ack(ACK_TIMEOUT_US)?;
    let mut pulses = [0u32; FRAME_BITS];
    for p in &mut pulses {
        *p = bus.high_pulse_us(BIT_TIMEOUT_US)?;
    }
    Ok(frame_from_pulses(&pulses))
}

/// Open-drain GPIO implementation that times edges by polling at 1 µs.
pub struct GpioDht22Bus<P, D> {
    pin: P,
    delay: D,
}

impl<P, D> GpioDht22Bus<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    pub fn new(pin: P, delay: D) -> Self {
        Self { pin, delay }
    }

    /// Microseconds until the line reaches `high`, bounded by `timeout_us`.
    fn wait_for(&mut self, high: bool, timeout_us: u32) -> Result<u32, DriverError> {
        let mut elapsed = 0;
        while self.pin.is_high().map_err(|_| DriverError::Hardware)? != high {
            if elapsed >= timeout_us {
                return Err(DriverError::Timeout);
            }
            self.delay.delay_us(1);
            elapsed += 1;
        }
        Ok(elapsed)
    }
}

impl<P, D> Dht22Bus for GpioDht22Bus<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    fn start_signal(&mut self, low_ms: u32) -> Result<(), DriverError> {
        self.pin.set_low().map_err(|_| DriverError::Hardware)?;
        self.delay.delay_ms(low_ms);
        self.pin.set_high().map_err(|_| DriverError::Hardware)
    }

    fn await_ack(&mut self, timeout_us: u32) -> Result<(), DriverError> {
        self.wait_for(false, timeout_us)?;
        self.wait_for(true, timeout_us)?;
        self.wait_for(false, timeout_us)?;
        Ok(())
    }

    fn high_pulse_us(&mut self, timeout_us: u32) -> Result<u32, DriverError> {
        self.wait_for(true, timeout_us)?;
        self.wait_for(false, timeout_us)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct Dht22<B, D> {
    core: DriverCore,
    bus: B,
    delay: D,
    last: Option<ClimateReading>,
}

impl<B: Dht22Bus, D: DelayNs> Dht22<B, D> {
    pub fn new(config: DriverConfig, bus: B, delay: D, clock: SharedClock) -> Self {
        Self {
            core: DriverCore::new(config, clock),
            bus,
            delay,
            last: None,
        }
    }

    pub fn last_reading(&self) -> Option<ClimateReading> {
        self.last
    }
}

impl<B: Dht22Bus, D: DelayNs> Driver for Dht22<B, D> {
    type Reading = ClimateReading;
    type Command = Infallible;

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }

    fn initialize(&mut self) -> Result<(), DriverError> {
        self.core.begin_init()?;
        // Let the line settle high before the first start pulse.
        self.delay.delay_ms(100);
        self.core.finish_init(Ok(()))
    }

    fn read(&mut self) -> Result<ClimateReading, DriverError> {
        self.core.ensure_operable()?;
        let now = self.core.now();
        if let Some(last) = self.last {
            if now - last.timestamp < MIN_READ_INTERVAL_SECS {
                return Ok(ClimateReading { cached: true, ..last });
            }
        }

        let frame = capture_frame(&mut self.bus)?;
        let (t_raw, h_raw) = decode_frame(&frame)?;
        let cfg = self.core.config();
        let temperature = t_raw + cfg.calibration_or("temperature_offset", 0.0);
        let humidity = h_raw + cfg.calibration_or("humidity_offset", 0.0);
        validate_range(temperature, humidity)?;

        debug!("{}: T={temperature:.1}°C H={humidity:.1}%", self.core.name());
        let reading = ClimateReading {
            temperature,
            humidity,
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
    use std::collections::VecDeque;

    /// Encode a reading as a valid frame.
    fn frame(temp_x10: i16, hum_x10: u16) -> [u8; 5] {
        let mag = temp_x10.unsigned_abs();
        let mut t = mag.to_be_bytes();
        if temp_x10 < 0 {
            t[0] |= 0x80;
        }
        let h = hum_x10.to_be_bytes();
        let data = [h[0], h[1], t[0], t[1]];
        [h[0], h[1], t[0], t[1], checksum(&data)]
    }

    /// Bus that replays whole frames as pulse trains.
    struct FrameBus {
        frames: VecDeque<[u8; 5]>,
        pulses: VecDeque<u32>,
        starts: usize,
    }

    impl FrameBus {
        fn new(frames: Vec<[u8; 5]>) -> Self {
            Self {
                frames: frames.into(),
                pulses: VecDeque::new(),
                starts: 0,
            }
        }
    }

    impl Dht22Bus for FrameBus {
        fn start_signal(&mut self, low_ms: u32) -> Result<(), DriverError> {
            assert!(low_ms >= 18);
            self.starts += 1;
            let f = self.frames.pop_front().ok_or(DriverError::Timeout)?;
            self.pulses = (0..40)
                .map(|i| if f[i / 8] & (0x80 >> (i % 8)) != 0 { 70 } else { 27 })
                .collect();
            Ok(())
        }
        fn await_ack(&mut self, _timeout_us: u32) -> Result<(), DriverError> {
            Ok(())
        }
        fn high_pulse_us(&mut self, _timeout_us: u32) -> Result<u32, DriverError> {
            self.pulses.pop_front().ok_or(DriverError::Timeout)
        }
    }

    fn driver(frames: Vec<[u8; 5]>, config: DriverConfig) -> (Dht22<FrameBus, SimClock>, SimClock) {
        let clock = SimClock::new();
        let mut d = Dht22::new(config, FrameBus::new(frames), clock.clone(), clock.shared());
        d.initialize().unwrap();
        (d, clock)
    }

    #[test]
    fn decodes_positive_reading() {
        assert_eq!(decode_frame(&frame(235, 612)), Ok((23.5, 61.2)));
    }

    #[test]
    fn sign_bit_negates_magnitude_only() {
        let (t, h) = decode_frame(&frame(-101, 400)).unwrap();
        assert!((t + 10.1).abs() < 1e-4);
        assert!((h - 40.0).abs() < 1e-4);
    }

    #[test]
    fn checksum_mismatch_is_hard_failure() {
        let mut f = frame(250, 500);
        f[4] = f[4].wrapping_add(1);
        assert_eq!(decode_frame(&f), Err(DriverError::Checksum));
    }

    #[test]
    fn threshold_is_inclusive_at_50us() {
        let mut pulses = [0u32; FRAME_BITS];
        pulses[0] = ONE_THRESHOLD_US;
        pulses[1] = ONE_THRESHOLD_US - 1;
        let f = frame_from_pulses(&pulses);
        assert_eq!(f[0], 0b1000_0000);
    }

    #[test]
    fn out_of_range_is_error_not_clamp() {
        let (mut d, _clock) = driver(vec![frame(900, 500)], DriverConfig::new("dht").with_retries(1, 0));
        assert_eq!(d.read(), Err(DriverError::OutOfRange));
        assert!(d.last_reading().is_none());
    }

    #[test]
    fn calibration_offset_applies_before_range_check() {
        let config = DriverConfig::new("dht")
            .with_calibration("temperature_offset", -1.5)
            .with_calibration("humidity_offset", 2.0);
        let (mut d, _clock) = driver(vec![frame(200, 980)], config.clone());
        let r = d.read().unwrap();
        assert!((r.temperature - 18.5).abs() < 1e-4);
        assert!((r.humidity - 100.0).abs() < 1e-4);

        let (mut d, _clock) = driver(vec![frame(200, 990)], config);
        assert_eq!(d.read(), Err(DriverError::OutOfRange));
    }

    #[test]
    fn rapid_reread_returns_cached_without_hardware() {
        let (mut d, clock) = driver(vec![frame(220, 550), frame(230, 560)], DriverConfig::new("dht"));
        let first = d.read().unwrap();
        assert!(!first.cached);
        clock.advance_secs(1.0);
        let second = d.read().unwrap();
        assert!(second.cached);
        assert_eq!(second.temperature, first.temperature);
        assert_eq!(d.bus.starts, 1);

        clock.advance_secs(1.5);
        let third = d.read().unwrap();
        assert!(!third.cached);
        assert!((third.temperature - 23.0).abs() < 1e-4);
    }

    #[test]
    fn safe_read_retries_past_a_corrupt_frame() {
        let mut bad = frame(240, 500);
        bad[1] ^= 0x01;
        let (mut d, _clock) = driver(vec![bad, frame(240, 500)], DriverConfig::new("dht").with_retries(3, 10));
        let r = d.safe_read().unwrap();
        assert!((r.temperature - 24.0).abs() < 1e-4);
        assert_eq!(d.bus.starts, 2);
    }
}
