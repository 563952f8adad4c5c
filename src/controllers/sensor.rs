//! Sensor aggregation.
//!
//! Each cycle samples every present sensor, merges what succeeded into one
//! [`SensorSnapshot`], appends it to history and checks it against the
//! alert thresholds.  A failing sensor leaves its fields `None` for that
//! cycle; the rest of the cycle proceeds.
//!
//! ## Alerts
//!
//! One alert per [`AlertKind`] per 5 minutes.  Further breaches inside the
//! window are dropped, not queued.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::Serialize;

use super::{Controller, ControllerState, ensure_started, init_optional};
use crate::app::events::Event;
use crate::app::ports::EventSink;
use crate::clock::SharedClock;
use crate::config::SafetyLimits;
use crate::drivers::air_quality::AirQualityLevel;
use crate::drivers::{
    AirQualityReading, ClimateReading, DriverState, DriverStatus, SensorDriver, WaterLevelReading,
};
use crate::error::{ControllerError, DriverError};
use crate::history::Ring;

pub const HISTORY_CAPACITY: usize = 1000;
pub const ALERT_CAPACITY: usize = 100;
pub const ALERT_DEDUP_SECS: f64 = 300.0;

/// One merged reading of every sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SensorSnapshot {
    pub timestamp: f64,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub air_quality: Option<f32>,
    pub air_quality_level: Option<AirQualityLevel>,
    pub water_level: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TemperatureLow,
    TemperatureHigh,
    HumidityLow,
    HumidityHigh,
    AirQualityPoor,
    WaterLevelLow,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TemperatureLow => "temperature_low",
            Self::TemperatureHigh => "temperature_high",
            Self::HumidityLow => "humidity_low",
            Self::HumidityHigh => "humidity_high",
            Self::AirQualityPoor => "air_quality_poor",
            Self::WaterLevelLow => "water_level_low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: u64,
    pub kind: AlertKind,
    pub message: String,
    pub value: f32,
    pub threshold: f32,
    pub timestamp: f64,
    pub acknowledged: bool,
}

/// Availability of one sensor role, with its last good value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorStatus {
    pub role: &'static str,
    /// Hardware is fitted and not disabled.
    pub available: bool,
    /// Driver is in `Ready`.
    pub ready: bool,
    pub last_error: Option<DriverError>,
    pub driver: Option<DriverStatus>,
}

/// Last-known-good values, kept across failed cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LastGood {
    pub climate: Option<ClimateReading>,
    pub air_quality: Option<AirQualityReading>,
    pub water_level: Option<WaterLevelReading>,
}

pub struct SensorController {
    climate: Option<Box<dyn SensorDriver<ClimateReading>>>,
    air_quality: Option<Box<dyn SensorDriver<AirQualityReading>>>,
    water_level: Option<Box<dyn SensorDriver<WaterLevelReading>>>,
    limits: SafetyLimits,
    clock: SharedClock,
    state: ControllerState,
    history: Ring<SensorSnapshot, HISTORY_CAPACITY>,
    alerts: Ring<Alert, ALERT_CAPACITY>,
    last_alert_at: BTreeMap<AlertKind, f64>,
    next_alert_id: u64,
    last_good: LastGood,
    last_errors: [Option<DriverError>; 3],
}

impl SensorController {
    pub fn new(limits: SafetyLimits, clock: SharedClock) -> Self {
        Self {
            climate: None,
            air_quality: None,
            water_level: None,
            limits,
            clock,
            state: ControllerState::Uninitialized,
            history: Ring::new(),
            alerts: Ring::new(),
            last_alert_at: BTreeMap::new(),
            next_alert_id: 1,
            last_good: LastGood::default(),
            last_errors: [None; 3],
        }
    }

    pub fn with_climate(mut self, d: Box<dyn SensorDriver<ClimateReading>>) -> Self {
        self.climate = Some(d);
        self
    }

    pub fn with_air_quality(mut self, d: Box<dyn SensorDriver<AirQualityReading>>) -> Self {
        self.air_quality = Some(d);
        self
    }

    pub fn with_water_level(mut self, d: Box<dyn SensorDriver<WaterLevelReading>>) -> Self {
        self.water_level = Some(d);
        self
    }

    pub fn set_limits(&mut self, limits: SafetyLimits) {
        self.limits = limits;
    }

    /// Run one sensing cycle and publish the snapshot.
    pub fn update(&mut self, sink: &mut impl EventSink) -> Result<SensorSnapshot, ControllerError> {
        ensure_started(self.state)?;
        let now = self.clock.now();
        let mut snap = SensorSnapshot {
            timestamp: now,
            ..SensorSnapshot::default()
        };

        if let Some(d) = self.climate.as_mut() {
            match d.sample() {
                Ok(r) => {
                    snap.temperature = Some(r.temperature);
                    snap.humidity = Some(r.humidity);
                    self.last_good.climate = Some(r);
                    self.last_errors[0] = None;
                }
                Err(e) => {
                    warn!("sensors: climate read failed: {e}");
                    self.last_errors[0] = Some(e);
                }
            }
        }
        if let Some(d) = self.air_quality.as_mut() {
            match d.sample() {
                Ok(r) => {
                    snap.air_quality = Some(r.aqi);
                    snap.air_quality_level = Some(r.level);
                    self.last_good.air_quality = Some(r);
                    self.last_errors[1] = None;
                }
                Err(e) => {
                    warn!("sensors: air quality read failed: {e}");
                    self.last_errors[1] = Some(e);
                }
            }
        }
        if let Some(d) = self.water_level.as_mut() {
            match d.sample() {
                Ok(r) => {
                    snap.water_level = Some(r.level_percent);
                    self.last_good.water_level = Some(r);
                    self.last_errors[2] = None;
                }
                Err(e) => {
                    warn!("sensors: water level read failed: {e}");
                    self.last_errors[2] = Some(e);
                }
            }
        }

        self.history.push(snap);
        self.state = ControllerState::Running;
        debug!(
            "sensors: T={:?} H={:?} AQI={:?} W={:?}",
            snap.temperature, snap.humidity, snap.air_quality, snap.water_level
        );

        self.check_alerts(&snap, sink);
        sink.emit(&Event::SensorData(snap));
        Ok(snap)
    }

    fn check_alerts(&mut self, snap: &SensorSnapshot, sink: &mut impl EventSink) {
        let l = self.limits;
        if let Some(t) = snap.temperature {
            if t < l.temperature_min {
                self.raise(AlertKind::TemperatureLow, t, l.temperature_min, "temperature below minimum", sink);
            } else if t > l.temperature_max {
                self.raise(AlertKind::TemperatureHigh, t, l.temperature_max, "temperature above maximum", sink);
            }
        }
        if let Some(h) = snap.humidity {
            if h < l.humidity_min {
                self.raise(AlertKind::HumidityLow, h, l.humidity_min, "humidity below minimum", sink);
            } else if h > l.humidity_max {
                self.raise(AlertKind::HumidityHigh, h, l.humidity_max, "humidity above maximum", sink);
            }
        }
        if let Some(aqi) = snap.air_quality {
            if aqi > l.air_quality_max {
                self.raise(AlertKind::AirQualityPoor, aqi, l.air_quality_max, "air quality poor", sink);
            }
        }
        if let Some(w) = snap.water_level {
            if w < l.water_level_min {
                self.raise(AlertKind::WaterLevelLow, w, l.water_level_min, "water level low", sink);
            }
        }
    }

    fn raise(
        &mut self,
        kind: AlertKind,
        value: f32,
        threshold: f32,
        what: &str,
        sink: &mut impl EventSink,
    ) {
        let now = self.clock.now();
        if let Some(prev) = self.last_alert_at.get(&kind) {
            if now - prev < ALERT_DEDUP_SECS {
                return;
            }
        }
        self.last_alert_at.insert(kind, now);
        let alert = Alert {
            id: self.next_alert_id,
            kind,
            message: format!("{what}: {value:.1} (limit {threshold:.1})"),
            value,
            threshold,
            timestamp: now,
            acknowledged: false,
        };
        self.next_alert_id += 1;
        warn!("ALERT {} | {}", kind.as_str(), alert.message);
        sink.emit(&Event::Alert(alert.clone()));
        self.alerts.push(alert);
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn latest(&self) -> Option<SensorSnapshot> {
        self.history.latest().copied()
    }

    pub fn history(&self, limit: Option<usize>) -> Vec<SensorSnapshot> {
        self.history.recent(limit)
    }

    pub fn last_good(&self) -> LastGood {
        self.last_good
    }

    /// Newest `limit` alerts, optionally only unacknowledged ones.
    pub fn alerts(&self, unacknowledged_only: bool, limit: Option<usize>) -> Vec<Alert> {
        let mut v: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| !unacknowledged_only || !a.acknowledged)
            .cloned()
            .collect();
        if let Some(l) = limit {
            let skip = v.len().saturating_sub(l);
            v.drain(..skip);
        }
        v
    }

    /// Returns `false` when no alert carries `id`.
    pub fn acknowledge_alert(&mut self, id: u64) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(a) => {
                a.acknowledged = true;
                info!("sensors: alert {id} acknowledged");
                true
            }
            None => false,
        }
    }

    /// Drop every stored alert and reset the dedup windows.
    pub fn clear_alerts(&mut self) {
        self.alerts.clear();
        self.last_alert_at.clear();
    }

    pub fn sensor_status(&self) -> Vec<SensorStatus> {
        fn status<R>(
            role: &'static str,
            d: Option<&dyn SensorDriver<R>>,
            last_error: Option<DriverError>,
        ) -> SensorStatus {
            let driver = d.map(|d| d.health());
            SensorStatus {
                role,
                available: driver.as_ref().is_some_and(|s| s.enabled),
                ready: driver.as_ref().is_some_and(|s| s.state == DriverState::Ready),
                last_error,
                driver,
            }
        }
        vec![
            status("climate", self.climate.as_deref(), self.last_errors[0]),
            status("air_quality", self.air_quality.as_deref(), self.last_errors[1]),
            status("water_level", self.water_level.as_deref(), self.last_errors[2]),
        ]
    }

    /// Reset a disabled sensor by role name.
    pub fn reset_sensor(&mut self, role: &str) -> Result<(), ControllerError> {
        let res = match role {
            "climate" => self.climate.as_mut().map(|d| d.recover()),
            "air_quality" => self.air_quality.as_mut().map(|d| d.recover()),
            "water_level" => self.water_level.as_mut().map(|d| d.recover()),
            _ => return Err(ControllerError::InvalidArgument("unknown sensor role")),
        };
        match res {
            Some(r) => r.map_err(ControllerError::Driver),
            None => Err(ControllerError::Driver(DriverError::Unavailable)),
        }
    }
}

impl Controller for SensorController {
    fn initialize(&mut self) -> Result<(), ControllerError> {
        let mut failed = 0;
        let mut present = 0;
        if let Some(d) = self.climate.as_deref_mut() {
            present += 1;
            failed += usize::from(init_optional("sensors", d).is_some());
        }
        if let Some(d) = self.air_quality.as_deref_mut() {
            present += 1;
            failed += usize::from(init_optional("sensors", d).is_some());
        }
        if let Some(d) = self.water_level.as_deref_mut() {
            present += 1;
            failed += usize::from(init_optional("sensors", d).is_some());
        }
        info!("sensors: {}/{present} sensors initialized", present - failed);
        self.state = ControllerState::Ready;
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Some(d) = self.climate.as_mut() {
            d.shutdown();
        }
        if let Some(d) = self.air_quality.as_mut() {
            d.shutdown();
        }
        if let Some(d) = self.water_level.as_mut() {
            d.shutdown();
        }
        self.state = ControllerState::Uninitialized;
    }

    fn state(&self) -> ControllerState {
        self.state
    }
}
