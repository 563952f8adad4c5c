//! System configuration parameters
//!
//! Safety limits, per-domain policies and per-controller tuning for the
//! terrarium.  Loaded by an external collaborator (file, NVS, UI); the
//! core only consumes the validated struct.
//!
//! [`TerrariumConfig::validate`] rejects inconsistent values instead of
//! clamping them, so a bad config can never widen a safety envelope.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum number of scheduled feeding hours per day.
pub const MAX_FEEDING_HOURS: usize = 24;

/// Alert thresholds.  Crossing one raises a deduplicated alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    pub temperature_min: f32,
    pub temperature_max: f32,
    pub humidity_min: f32,
    pub humidity_max: f32,
    /// AQI above this is "air quality poor".
    pub air_quality_max: f32,
    /// Water level (%) below this is "water level low".
    pub water_level_min: f32,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            temperature_min: 15.0,
            temperature_max: 35.0,
            humidity_min: 30.0,
            humidity_max: 80.0,
            air_quality_max: 150.0,
            water_level_min: 20.0,
        }
    }
}

/// Target value with a symmetric tolerance band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetBand {
    pub target: f32,
    pub tolerance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightingPolicy {
    /// First daylight hour (inclusive, 0–23).
    pub day_start: u8,
    /// End of daylight (exclusive, 1–24).
    pub day_end: u8,
    pub max_intensity: u8,
    pub min_intensity: u8,
}

impl LightingPolicy {
    /// Intensity for a given local hour.
    pub fn intensity_at(&self, hour: u8) -> u8 {
        if (self.day_start..self.day_end).contains(&hour) {
            self.max_intensity
        } else {
            self.min_intensity
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VentilationPolicy {
    /// AQI above which ventilation is considered degraded.
    pub aqi_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingPolicy {
    /// Local hours (0–23) at which a feed is due, at most once per day.
    pub hours: heapless::Vec<u8, MAX_FEEDING_HOURS>,
    /// Estimated number of flies released per feed.
    pub fly_count: u32,
    /// Airlock stabilization delay (seconds) before closing.
    pub trap_delay_secs: f32,
}

/// Per-domain switches for the automatic policies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlToggles {
    pub temperature: bool,
    pub humidity: bool,
    pub lighting: bool,
    pub ventilation: bool,
    pub feeding: bool,
}

impl Default for ControlToggles {
    fn default() -> Self {
        Self {
            temperature: true,
            humidity: true,
            lighting: true,
            ventilation: true,
            feeding: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policies {
    pub temperature: TargetBand,
    pub humidity: TargetBand,
    pub lighting: LightingPolicy,
    pub ventilation: VentilationPolicy,
    pub feeding: FeedingPolicy,
    pub toggles: ControlToggles,
}

impl Default for Policies {
    fn default() -> Self {
        let mut hours = heapless::Vec::new();
        let _ = hours.push(8);
        let _ = hours.push(18);
        Self {
            temperature: TargetBand {
                target: 25.0,
                tolerance: 2.0,
            },
            humidity: TargetBand {
                target: 60.0,
                tolerance: 10.0,
            },
            lighting: LightingPolicy {
                day_start: 6,
                day_end: 18,
                max_intensity: 100,
                min_intensity: 0,
            },
            ventilation: VentilationPolicy {
                aqi_threshold: 100.0,
            },
            feeding: FeedingPolicy {
                hours,
                fly_count: 5,
                trap_delay_secs: 1.0,
            },
            toggles: ControlToggles::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeaterSettings {
    /// Degrees below target before the heater engages.
    pub hysteresis: f32,
    /// Hard thermal ceiling (°C); above it the heater is forced off.
    pub max_temperature: f32,
    /// Relay debounce (seconds).
    pub relay_min_cycle_secs: f32,
    /// Longest continuous relay on-time before a forced off (seconds).
    pub relay_max_on_secs: f32,
}

impl Default for HeaterSettings {
    fn default() -> Self {
        Self {
            hysteresis: 1.0,
            max_temperature: 35.0,
            relay_min_cycle_secs: 0.1,
            relay_max_on_secs: 3600.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HumidifierSettings {
    pub hysteresis: f32,
    /// Hard humidity ceiling (%RH).
    pub max_humidity: f32,
    /// Required idle time between two cycles (seconds).
    pub min_cycle_secs: f32,
    /// Longest single cycle (seconds).
    pub max_cycle_secs: f32,
    /// Debounce applied to the humidifier and mister relays (seconds).
    pub relay_min_cycle_secs: f32,
    /// Relay-level on-time cap, independent of `max_cycle_secs`.
    pub relay_max_on_secs: f32,
}

impl Default for HumidifierSettings {
    fn default() -> Self {
        Self {
            hysteresis: 5.0,
            max_humidity: 95.0,
            min_cycle_secs: 300.0,
            max_cycle_secs: 1800.0,
            relay_min_cycle_secs: 0.1,
            relay_max_on_secs: 3600.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FanSettings {
    /// Lowest non-zero speed (%), below which the fan stalls.
    pub min_speed: f32,
    pub max_speed: f32,
    /// Seconds to sweep from `min_speed` to `max_speed`.
    pub ramp_time_secs: f32,
}

impl Default for FanSettings {
    fn default() -> Self {
        Self {
            min_speed: 20.0,
            max_speed: 100.0,
            ramp_time_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeederSettings {
    pub max_daily_feeds: u32,
    pub min_feeding_interval_secs: f32,
    /// Watchdog ceiling for a single feed (seconds).
    pub max_feeding_duration_secs: f32,
    /// Entrance-open time per requested unit (seconds).
    pub open_secs_per_unit: f32,
}

impl Default for FeederSettings {
    fn default() -> Self {
        Self {
            max_daily_feeds: 3,
            min_feeding_interval_secs: 3600.0,
            max_feeding_duration_secs: 30.0,
            open_secs_per_unit: 0.5,
        }
    }
}

/// Complete core configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TerrariumConfig {
    pub limits: SafetyLimits,
    pub policies: Policies,
    pub heater: HeaterSettings,
    pub humidifier: HumidifierSettings,
    pub fan: FanSettings,
    pub feeder: FeederSettings,
    /// Offset applied to UTC for time-of-day policies.
    pub utc_offset_hours: i8,
}

impl TerrariumConfig {
    /// Range and consistency checks.  Never clamps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.limits;
        check(l.temperature_min < l.temperature_max, "temperature_min must be below temperature_max")?;
        check(l.humidity_min < l.humidity_max, "humidity_min must be below humidity_max")?;
        check((0.0..=100.0).contains(&l.humidity_min) && l.humidity_max <= 100.0, "humidity limits must lie in 0-100")?;
        check((0.0..=500.0).contains(&l.air_quality_max), "air_quality_max must lie in 0-500")?;
        check((0.0..=100.0).contains(&l.water_level_min), "water_level_min must lie in 0-100")?;

        let p = &self.policies;
        check(p.temperature.tolerance >= 0.0, "temperature tolerance must be non-negative")?;
        check(p.humidity.tolerance >= 0.0, "humidity tolerance must be non-negative")?;
        check((0.0..=100.0).contains(&p.humidity.target), "humidity target must lie in 0-100")?;
        check(p.lighting.day_start < 24 && p.lighting.day_end <= 24, "lighting hours must lie in 0-24")?;
        check(p.lighting.day_start < p.lighting.day_end, "day_start must be before day_end")?;
        check(p.lighting.max_intensity <= 100, "max_intensity must be at most 100")?;
        check(p.lighting.min_intensity <= p.lighting.max_intensity, "min_intensity must not exceed max_intensity")?;
        check(p.feeding.hours.iter().all(|h| *h < 24), "feeding hours must lie in 0-23")?;
        check(p.feeding.trap_delay_secs >= 0.0, "trap_delay must be non-negative")?;

        check(self.heater.hysteresis >= 0.0, "heater hysteresis must be non-negative")?;
        check(self.heater.max_temperature > p.temperature.target, "heater max_temperature must exceed the temperature target")?;
        check_relay(self.heater.relay_min_cycle_secs, self.heater.relay_max_on_secs)?;

        let h = &self.humidifier;
        check(h.hysteresis >= 0.0, "humidifier hysteresis must be non-negative")?;
        check(h.max_humidity > p.humidity.target && h.max_humidity <= 100.0, "max_humidity must exceed the humidity target and not exceed 100")?;
        check(h.min_cycle_secs >= 0.0 && h.max_cycle_secs > 0.0, "humidifier cycle times must be positive")?;
        check_relay(h.relay_min_cycle_secs, h.relay_max_on_secs)?;

        let f = &self.fan;
        check(0.0 <= f.min_speed && f.min_speed <= f.max_speed && f.max_speed <= 100.0, "fan speeds must satisfy 0 <= min <= max <= 100")?;
        check(f.ramp_time_secs > 0.0, "fan ramp_time must be positive")?;

        let fd = &self.feeder;
        check(fd.max_daily_feeds > 0, "max_daily_feeds must be positive")?;
        check(fd.min_feeding_interval_secs >= 0.0, "min_feeding_interval must be non-negative")?;
        check(fd.max_feeding_duration_secs > 0.0, "max_feeding_duration must be positive")?;
        check(fd.open_secs_per_unit > 0.0, "open_secs_per_unit must be positive")?;

        check((-12..=14).contains(&self.utc_offset_hours), "utc_offset_hours must lie in -12..=14")?;
        Ok(())
    }
}

fn check(cond: bool, msg: &'static str) -> Result<(), ConfigError> {
    if cond { Ok(()) } else { Err(ConfigError::Invalid(msg)) }
}

fn check_relay(min_cycle_secs: f32, max_on_secs: f32) -> Result<(), ConfigError> {
    check(min_cycle_secs >= 0.1, "relay min_cycle must be at least 0.1s")?;
    check(max_on_secs >= 1.0, "relay max_on must be at least 1s")?;
    check(max_on_secs > min_cycle_secs, "relay max_on must exceed min_cycle")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = TerrariumConfig::default();
        assert_eq!(c.validate(), Ok(()));
        assert!(c.limits.temperature_min < c.policies.temperature.target);
        assert!(c.policies.temperature.target < c.heater.max_temperature);
        assert_eq!(c.feeder.max_daily_feeds, 3);
        assert_eq!(c.policies.feeding.fly_count, 5);
    }

    #[test]
    fn lighting_intensity_follows_day_window() {
        let l = TerrariumConfig::default().policies.lighting;
        assert_eq!(l.intensity_at(5), 0);
        assert_eq!(l.intensity_at(6), 100);
        assert_eq!(l.intensity_at(17), 100);
        assert_eq!(l.intensity_at(18), 0);
    }

    #[test]
    fn inverted_temperature_limits_rejected() {
        let mut c = TerrariumConfig::default();
        c.limits.temperature_min = 40.0;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn heater_ceiling_below_target_rejected() {
        let mut c = TerrariumConfig::default();
        c.heater.max_temperature = 20.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn relay_cycle_limits_checked() {
        let mut c = TerrariumConfig::default();
        c.heater.relay_max_on_secs = 0.5;
        assert_eq!(c.validate(), Err(ConfigError::Invalid("relay max_on must be at least 1s")));
        c.heater.relay_max_on_secs = 600.0;
        c.humidifier.relay_min_cycle_secs = 0.0;
        assert!(c.validate().is_err());
        c.humidifier.relay_min_cycle_secs = 5.0;
        c.humidifier.relay_max_on_secs = 4.0;
        assert_eq!(c.validate(), Err(ConfigError::Invalid("relay max_on must exceed min_cycle")));
    }

    #[test]
    fn feeding_hour_out_of_range_rejected() {
        let mut c = TerrariumConfig::default();
        let _ = c.policies.feeding.hours.push(24);
        assert!(c.validate().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let c = TerrariumConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: TerrariumConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn postcard_roundtrip() {
        let c = TerrariumConfig::default();
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2: TerrariumConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(c.policies.feeding.hours, c2.policies.feeding.hours);
        assert!((c.heater.max_temperature - c2.heater.max_temperature).abs() < 0.001);
    }
}
