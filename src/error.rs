//! Unified error types for the terrarium control core.
//!
//! Two layers, mirroring the control stack:
//!
//! - [`DriverError`]: hardware or protocol failure inside a single driver.
//!   Retried transparently by the driver contract before it escalates.
//! - [`ControllerError`]: sequencing or policy failure inside a controller.
//!   Never retried; safety variants trigger a forced-safe action upstream.
//!
//! All variants are `Copy` so they can be recorded in driver status and
//! decision logs without allocation.

use core::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Driver(DriverError),
    Controller(ControllerError),
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Driver(e) => write!(f, "driver: {e}"),
            Self::Controller(e) => write!(f, "controller: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Driver errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverError {
    /// Operation attempted before a successful `initialize()`.
    NotReady,
    /// Driver was escalated to `Disabled` (or configured `enabled = false`).
    Disabled,
    /// Bounded protocol wait expired (ack edge, pulse edge, ADC conversion).
    Timeout,
    /// Frame checksum did not match its payload.
    Checksum,
    /// Decoded value outside the physically plausible range.
    OutOfRange,
    /// The underlying HAL call reported an error.
    Hardware,
    /// Command rejected by the driver (e.g. unknown position, debounce).
    InvalidCommand,
    /// No hardware backs this role.
    Unavailable,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "driver not ready"),
            Self::Disabled => write!(f, "driver disabled"),
            Self::Timeout => write!(f, "protocol timeout"),
            Self::Checksum => write!(f, "checksum mismatch"),
            Self::OutOfRange => write!(f, "reading out of range"),
            Self::Hardware => write!(f, "hardware access failed"),
            Self::InvalidCommand => write!(f, "invalid command"),
            Self::Unavailable => write!(f, "hardware unavailable"),
        }
    }
}

impl std::error::Error for DriverError {}

impl DriverError {
    /// Failures worth another attempt.  Refusals (not ready, disabled,
    /// rejected command) are returned to the caller as-is.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::Checksum | Self::OutOfRange | Self::Hardware)
    }
}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        Self::Driver(e)
    }
}

// ---------------------------------------------------------------------------
// Controller errors
// ---------------------------------------------------------------------------

/// Why the feeder refused to start a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedRefusal {
    AlreadyFeeding,
    DailyLimitReached,
    IntervalNotElapsed,
    NotClosed,
}

impl fmt::Display for FeedRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyFeeding => write!(f, "feed already in progress"),
            Self::DailyLimitReached => write!(f, "daily feed limit reached"),
            Self::IntervalNotElapsed => write!(f, "minimum feeding interval not elapsed"),
            Self::NotClosed => write!(f, "airlock not closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerError {
    /// Controller used before `initialize()` succeeded.
    NotReady,
    /// A driver it depends on failed after retries.
    Driver(DriverError),
    /// Request would cross a configured safety ceiling.
    SafetyLimit,
    /// Feeding interlock refused the request.
    Interlock(FeedRefusal),
    /// Argument outside the accepted domain.
    InvalidArgument(&'static str),
    /// Refused while the emergency stop is latched.
    EmergencyStop,
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "controller not ready"),
            Self::Driver(e) => write!(f, "driver failure: {e}"),
            Self::SafetyLimit => write!(f, "safety limit"),
            Self::Interlock(r) => write!(f, "interlock: {r}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::EmergencyStop => write!(f, "emergency stop active"),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<DriverError> for ControllerError {
    fn from(e: DriverError) -> Self {
        Self::Driver(e)
    }
}

impl From<FeedRefusal> for ControllerError {
    fn from(r: FeedRefusal) -> Self {
        Self::Interlock(r)
    }
}

impl From<ControllerError> for Error {
    fn from(e: ControllerError) -> Self {
        Self::Controller(e)
    }
}

// ---------------------------------------------------------------------------
// Safety faults
// ---------------------------------------------------------------------------

/// Latched conditions raised by the
/// [`SafetySupervisor`](crate::safety::SafetySupervisor).  Each is one bit
/// of the fault mask published in `safety_fault` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SafetyFault {
    /// Enclosure temperature above the heater ceiling.
    OverTemperature = 0b0000_0001,
    /// Humidity above the humidifier ceiling.
    OverHumidity = 0b0000_0010,
    /// Reservoir below the configured floor; misting would run dry.
    WaterLevelLow = 0b0000_0100,
    /// No temperature/humidity reading for several cycles.
    ClimateSensorLost = 0b0000_1000,
}

impl SafetyFault {
    pub const ALL: [Self; 4] = [
        Self::OverTemperature,
        Self::OverHumidity,
        Self::WaterLevelLow,
        Self::ClimateSensorLost,
    ];

    /// Return the bitmask for this fault.
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverTemperature => write!(f, "over temperature"),
            Self::OverHumidity => write!(f, "over humidity"),
            Self::WaterLevelLow => write!(f, "water level low"),
            Self::ClimateSensorLost => write!(f, "climate sensor lost"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed range validation; the message names it.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_lifts_through_controller() {
        let e: ControllerError = DriverError::Checksum.into();
        assert_eq!(e, ControllerError::Driver(DriverError::Checksum));
        let top: Error = e.into();
        assert_eq!(top.to_string(), "controller: driver failure: checksum mismatch");
    }

    #[test]
    fn safety_fault_masks_are_distinct_bits() {
        let all = SafetyFault::ALL.iter().fold(0u8, |acc, f| {
            assert_eq!(acc & f.mask(), 0);
            acc | f.mask()
        });
        assert_eq!(all.count_ones(), 4);
    }

    #[test]
    fn feed_refusal_display_names_reason() {
        let e: ControllerError = FeedRefusal::DailyLimitReached.into();
        assert_eq!(e.to_string(), "interlock: daily feed limit reached");
    }
}
