//! Terrarium service: the hexagonal core.
//!
//! [`TerrariumService`] owns every controller, the safety supervisor and
//! the operating-mode / emergency-stop state.  It exposes a
//! hardware-agnostic API; events leave through the [`EventSink`] passed
//! at each call site and feeding state goes through the injected
//! [`PersistencePort`].
//!
//! ```text
//!  SensorController ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                       │       TerrariumService        │
//!  Heater · Humidifier ◀│ Safety · Mode · Policies      │ ◀─▶ PersistencePort
//!  Fan · Lighting ·Feed │ Decision log · Actuator state │
//!                       └──────────────────────────────┘
//! ```
//!
//! ## Cycle order
//!
//! 1. Sense: one [`SensorController::update`].
//! 2. Safety: evaluate faults, force the affected actuators off.  Runs in
//!    every mode.
//! 3. Emergency stop latched: heater off, humidifier off, LEDs 0, feed aborted.
//! 4. Otherwise, in `auto`: apply each domain policy, touching hardware only
//!    on change.  In `manual` / `maintenance`: ceilings only.
//! 5. Feeder watchdog and phase advance, fan ramp.
//! 6. Publish every actuator change as `actuator_action`.

use log::{error, info, warn};
use serde::Serialize;

use crate::clock::{CalendarDate, SharedClock};
use crate::config::{Policies, TargetBand, TerrariumConfig};
use crate::controllers::fan::FanStatus;
use crate::controllers::feeder::FeederStatus;
use crate::controllers::heater::HeaterStatus;
use crate::controllers::humidifier::HumidifierStatus;
use crate::controllers::sensor::{Alert, LastGood, SensorSnapshot, SensorStatus};
use crate::controllers::{
    Controller, ControllerState, FanController, FeederController, HeaterController,
    HumidifierController, LightingController, SensorController,
};
use crate::drivers::servo::ServoPosition;
use crate::drivers::{
    AirQualityReading, ClimateReading, Dimmer, Positioner, SensorDriver, Switch, WaterLevelReading,
};
use crate::error::{ConfigError, ControllerError, SafetyFault};
use crate::history::Ring;
use crate::safety::SafetySupervisor;

use super::commands::{Command, Mode};
use super::events::{ActionRecord, ActionValue, Actuator, Event};
use super::ports::{EventSink, FeedingRecord, PersistencePort};

pub const DECISION_CAPACITY: usize = 1000;
pub const ACTION_CAPACITY: usize = 500;

// ───────────────────────────────────────────────────────────────
// Wiring and snapshots
// ───────────────────────────────────────────────────────────────

/// Drivers the service is built from, one per role.  Sensors are
/// optional; every actuator except the mister is required.
pub struct Hardware {
    pub climate: Option<Box<dyn SensorDriver<ClimateReading>>>,
    pub air_quality: Option<Box<dyn SensorDriver<AirQualityReading>>>,
    pub water_level: Option<Box<dyn SensorDriver<WaterLevelReading>>>,
    pub heater: Box<dyn Switch>,
    pub humidifier: Box<dyn Switch>,
    pub mister: Option<Box<dyn Switch>>,
    pub fan: Box<dyn Dimmer>,
    pub led: Box<dyn Dimmer>,
    pub feeder: Box<dyn Positioner>,
}

/// Point-in-time actuator snapshot, copied out to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActuatorState {
    pub led_intensity: u8,
    pub heater_on: bool,
    pub humidifier_on: bool,
    pub fan_speed: f32,
    pub feeder_position: &'static str,
}

/// One control decision with its human-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub kind: &'static str,
    pub reason: String,
    pub mode: Mode,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub mode: Mode,
    pub emergency_stop: bool,
    pub faults: Vec<SafetyFault>,
    pub snapshot: Option<SensorSnapshot>,
    pub last_good: LastGood,
    pub actuators: ActuatorState,
    pub active_alerts: Vec<Alert>,
    pub sensors: Vec<SensorStatus>,
    pub heater: HeaterStatus,
    pub humidifier: HumidifierStatus,
    pub fan: FanStatus,
    pub feeder: FeederStatus,
    pub uptime_secs: f64,
    pub cycles: u64,
}

/// What the auto policies last pushed into the controllers.
#[derive(Default)]
struct Applied {
    heater_band: Option<TargetBand>,
    humidity_band: Option<TargetBand>,
    ventilation_degraded: Option<bool>,
}

// ───────────────────────────────────────────────────────────────
// TerrariumService
// ───────────────────────────────────────────────────────────────

pub struct TerrariumService {
    config: TerrariumConfig,
    clock: SharedClock,
    sensors: SensorController,
    heater: HeaterController,
    humidifier: HumidifierController,
    fan: FanController,
    lighting: LightingController,
    feeder: FeederController,
    safety: SafetySupervisor,
    store: Box<dyn PersistencePort + Send>,
    mode: Mode,
    emergency: bool,
    applied: Applied,
    actuators: ActuatorState,
    decisions: Ring<DecisionRecord, DECISION_CAPACITY>,
    actions: Ring<ActionRecord, ACTION_CAPACITY>,
    feeding_record: FeedingRecord,
    /// Day and hour of the last scheduled feed attempt, successful or not.
    feed_attempt: Option<(CalendarDate, u8)>,
    started_at: f64,
    cycles: u64,
}

impl TerrariumService {
    /// Build the controller tree.  Rejects an invalid configuration.
    ///
    /// Does **not** touch hardware; call [`initialize`](Self::initialize) next.
    pub fn new(
        config: TerrariumConfig,
        hw: Hardware,
        store: Box<dyn PersistencePort + Send>,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let p = &config.policies;

        let mut sensors = SensorController::new(config.limits, clock.clone());
        if let Some(d) = hw.climate {
            sensors = sensors.with_climate(d);
        }
        if let Some(d) = hw.air_quality {
            sensors = sensors.with_air_quality(d);
        }
        if let Some(d) = hw.water_level {
            sensors = sensors.with_water_level(d);
        }
        let heater = HeaterController::new(hw.heater, config.heater, p.temperature.target, clock.clone());
        let mut humidifier =
            HumidifierController::new(hw.humidifier, config.humidifier, p.humidity.target, clock.clone());
        if let Some(m) = hw.mister {
            humidifier = humidifier.with_mister(m);
        }
        let fan = FanController::new(hw.fan, config.fan, clock.clone());
        let lighting = LightingController::new(hw.led);
        let feeder = FeederController::new(hw.feeder, config.feeder, clock.clone());
        let safety = SafetySupervisor::new(&config);
        let started_at = clock.now();

        Ok(Self {
            config,
            clock,
            sensors,
            heater,
            humidifier,
            fan,
            lighting,
            feeder,
            safety,
            store,
            mode: Mode::Auto,
            emergency: false,
            applied: Applied::default(),
            actuators: ActuatorState {
                led_intensity: 0,
                heater_on: false,
                humidifier_on: false,
                fan_speed: 0.0,
                feeder_position: ServoPosition::Closed.as_str(),
            },
            decisions: Ring::new(),
            actions: Ring::new(),
            feeding_record: FeedingRecord::default(),
            feed_attempt: None,
            started_at,
            cycles: 0,
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Initialize every controller and restore feeding state.
    ///
    /// Every controller is attempted; one that fails stays out of the
    /// cycle and the first failure is returned.
    pub fn initialize(&mut self) -> Result<(), ControllerError> {
        let results = [
            ("sensors", self.sensors.initialize()),
            ("heater", self.heater.initialize()),
            ("humidifier", self.humidifier.initialize()),
            ("fan", self.fan.initialize()),
            ("lighting", self.lighting.initialize()),
            ("feeder", self.feeder.initialize()),
        ];
        let mut first_err = None;
        for (name, r) in results {
            if let Err(e) = r {
                error!("service: {name} controller failed to initialize: {e}");
                first_err.get_or_insert(e);
            }
        }

        match self.store.load_feeding() {
            Ok(Some(record)) => {
                self.feeder.restore(&record);
                self.feeding_record = record;
            }
            Ok(None) => info!("service: no stored feeding record"),
            Err(e) => warn!("service: feeding record unreadable ({e}), starting fresh"),
        }

        self.started_at = self.clock.now();
        info!("service: initialized in {} mode", self.mode);
        first_err.map_or(Ok(()), Err)
    }

    /// Bring every actuator to its safe state and release the drivers.
    /// Pending relay auto-off timers are cancelled by the relay cleanup.
    pub fn cleanup(&mut self) {
        self.feeder.cleanup();
        self.heater.cleanup();
        self.humidifier.cleanup();
        self.lighting.cleanup();
        self.fan.cleanup();
        self.sensors.cleanup();
        self.persist_feeding();
        info!("service: shut down after {} cycles", self.cycles);
    }

    // ── Per-cycle orchestration ───────────────────────────────

    /// Run one full control cycle: sense → safety → emergency / policy → actuators.
    pub fn tick(&mut self, sink: &mut impl EventSink) -> Result<SensorSnapshot, ControllerError> {
        let snap = self.sensors.update(sink)?;
        self.cycles += 1;

        // 1. Safety, every mode.
        let before = self.safety.faults();
        let faults = self.safety.evaluate(&snap);
        if faults != before {
            let now = self.clock.now();
            if faults != 0 {
                warn!("service: safety faults 0b{faults:08b}");
                sink.emit(&Event::SafetyFault { faults, timestamp: now });
            } else {
                sink.emit(&Event::SafetyCleared { timestamp: now });
            }
        }
        self.enforce_safety(sink);

        // 2. Emergency stop overrides everything below.
        if self.emergency {
            self.enforce_emergency(sink);
        } else {
            match self.mode {
                Mode::Auto => {
                    self.control_temperature(snap.temperature, sink);
                    self.control_humidity(snap.humidity, sink);
                    self.control_lighting();
                    self.control_feeding(sink);
                }
                Mode::Manual => {
                    if self.heater.state() != ControllerState::Uninitialized {
                        soft("heater", self.heater.supervise(snap.temperature, sink));
                    }
                    if self.humidifier.state() != ControllerState::Uninitialized {
                        soft("humidifier", self.humidifier.supervise(snap.humidity, sink));
                    }
                }
                Mode::Maintenance => self.enforce_maintenance(sink),
            }
        }

        // 3. Always-on supervision.
        if self.feeder.state() != ControllerState::Uninitialized {
            soft("feeder", self.feeder.update(sink));
        }
        self.control_ventilation(snap.air_quality, sink);

        self.sync_actuators(sink);
        Ok(snap)
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command (UI, scheduler, remote API).
    pub fn handle_command(&mut self, cmd: Command, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        let res = self.dispatch(cmd, sink);
        self.sync_actuators(sink);
        res
    }

    fn dispatch(&mut self, cmd: Command, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        match cmd {
            Command::SetMode(mode) => {
                self.set_mode(mode, sink);
                Ok(())
            }
            Command::EmergencyStop => {
                self.emergency_stop(sink);
                Ok(())
            }
            Command::EmergencyResume => {
                self.emergency_resume(sink);
                Ok(())
            }
            Command::SetHeater(on) => {
                self.require_override()?;
                if on {
                    if self.safety.heater_inhibited() {
                        return Err(ControllerError::SafetyLimit);
                    }
                    self.heater.force_on(sink)?;
                } else {
                    self.heater.force_off("manual", sink)?;
                }
                self.decide(if on { "heater_on" } else { "heater_off" }, "manual override".into());
                Ok(())
            }
            Command::SetHumidity(target) => {
                self.humidifier.set_target(target)?;
                self.config.policies.humidity.target = target;
                self.decide("humidity_target", format!("target set to {target:.0}%"));
                Ok(())
            }
            Command::SetLedIntensity(percent) => {
                self.require_override()?;
                self.lighting.set_intensity(percent, false)?;
                self.decide("led_intensity", format!("manual intensity {percent}%"));
                Ok(())
            }
            Command::SetFeederPosition(position) => {
                self.require_override()?;
                self.feeder.set_position(position)?;
                self.decide("feeder_position", format!("manual move to {position}"));
                Ok(())
            }
            Command::Feed(count) => {
                if self.emergency {
                    return Err(ControllerError::EmergencyStop);
                }
                if self.mode == Mode::Maintenance {
                    return Err(ControllerError::InvalidArgument("feeding is suspended in maintenance mode"));
                }
                let delay = self.config.policies.feeding.trap_delay_secs;
                self.feeder.start_feeding(count as f32, delay, sink)?;
                self.decide("feeding", format!("manual feed of {count}"));
                self.persist_feeding();
                Ok(())
            }
            Command::SetFanSpeed(speed) => {
                self.require_override()?;
                self.fan.set_auto(false);
                self.fan.set_speed(speed, sink)?;
                self.decide("fan_speed", format!("manual speed {speed:.0}%"));
                Ok(())
            }
            Command::SetFanAuto(auto) => {
                self.fan.set_auto(auto);
                Ok(())
            }
            Command::AcknowledgeAlert(id) => {
                if self.sensors.acknowledge_alert(id) {
                    Ok(())
                } else {
                    Err(ControllerError::InvalidArgument("unknown alert id"))
                }
            }
            Command::ClearAlerts => {
                self.sensors.clear_alerts();
                Ok(())
            }
            Command::ResetDailyFeeds => {
                self.feeder.reset_daily_count();
                self.persist_feeding();
                Ok(())
            }
        }
    }

    pub fn set_mode(&mut self, mode: Mode, sink: &mut impl EventSink) {
        if mode == self.mode {
            return;
        }
        let from = self.mode;
        self.mode = mode;
        // Re-push every policy on the next auto cycle.
        self.applied = Applied::default();
        if from == Mode::Maintenance {
            self.fan.set_auto(true);
        }
        info!("service: mode {from} -> {mode}");
        self.decide("mode", format!("mode changed from {from} to {mode}"));
        sink.emit(&Event::ModeChanged {
            from,
            to: mode,
            timestamp: self.clock.now(),
        });
    }

    /// Latch the emergency stop and force the actuators safe right away.
    pub fn emergency_stop(&mut self, sink: &mut impl EventSink) {
        if !self.emergency {
            self.emergency = true;
            error!("service: EMERGENCY STOP");
            self.decide("emergency_stop", "emergency stop requested".into());
            sink.emit(&Event::EmergencyStop {
                timestamp: self.clock.now(),
            });
        }
        self.enforce_emergency(sink);
    }

    /// Clear the latch; policies resume on the next cycle.
    pub fn emergency_resume(&mut self, sink: &mut impl EventSink) {
        if !self.emergency {
            return;
        }
        self.emergency = false;
        self.applied = Applied::default();
        info!("service: emergency stop released");
        self.decide("emergency_resume", "emergency stop released".into());
        sink.emit(&Event::EmergencyResumed {
            timestamp: self.clock.now(),
        });
    }

    /// Replace the policies.  Checked against the rest of the configuration first.
    pub fn set_policies(&mut self, policies: Policies) -> Result<(), ConfigError> {
        let mut next = self.config.clone();
        next.policies = policies;
        next.validate()?;
        self.humidifier
            .set_target(next.policies.humidity.target)
            .map_err(|_| ConfigError::Invalid("humidity target exceeds the humidifier ceiling"))?;
        self.config = next;
        self.applied = Applied::default();
        info!("service: policies updated");
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency
    }

    pub fn actuators(&self) -> ActuatorState {
        self.actuators
    }

    pub fn faults(&self) -> u8 {
        self.safety.faults()
    }

    pub fn config(&self) -> &TerrariumConfig {
        &self.config
    }

    pub fn decisions(&self, limit: Option<usize>) -> Vec<DecisionRecord> {
        self.decisions.recent(limit)
    }

    pub fn actions(&self, limit: Option<usize>) -> Vec<ActionRecord> {
        self.actions.recent(limit)
    }

    pub fn alerts(&self, unacknowledged_only: bool, limit: Option<usize>) -> Vec<Alert> {
        self.sensors.alerts(unacknowledged_only, limit)
    }

    pub fn sensor_history(&self, limit: Option<usize>) -> Vec<SensorSnapshot> {
        self.sensors.history(limit)
    }

    pub fn feeding_record(&self) -> FeedingRecord {
        self.feeding_record
    }

    /// Reset a disabled sensor driver by role (`climate`, `air_quality`, `water_level`).
    pub fn reset_sensor(&mut self, role: &str) -> Result<(), ControllerError> {
        self.sensors.reset_sensor(role)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            mode: self.mode,
            emergency_stop: self.emergency,
            faults: self.safety.active(),
            snapshot: self.sensors.latest(),
            last_good: self.sensors.last_good(),
            actuators: self.actuators,
            active_alerts: self.sensors.alerts(true, None),
            sensors: self.sensors.sensor_status(),
            heater: self.heater.status(),
            humidifier: self.humidifier.status(),
            fan: self.fan.status(),
            feeder: self.feeder.status(),
            uptime_secs: self.clock.now() - self.started_at,
            cycles: self.cycles,
        }
    }

    // ── Safety and emergency ──────────────────────────────────

    fn enforce_safety(&mut self, sink: &mut impl EventSink) {
        if self.safety.heater_inhibited() && self.heater.is_heating() {
            soft("heater", self.heater.force_off("safety fault", sink));
            self.decide("heater_off", format!("safety fault 0b{:08b}", self.safety.faults()));
        }
        if self.safety.humidifier_inhibited() && self.humidifier.is_humidifying() {
            soft("humidifier", self.humidifier.force_off("safety fault", sink));
            self.decide("humidifier_off", format!("safety fault 0b{:08b}", self.safety.faults()));
        }
    }

    /// Runs every cycle while latched, regardless of mode and hysteresis.
    fn enforce_emergency(&mut self, sink: &mut impl EventSink) {
        if self.heater.state() != ControllerState::Uninitialized {
            soft("heater", self.heater.force_off("emergency stop", sink));
        }
        if self.humidifier.state() != ControllerState::Uninitialized {
            soft("humidifier", self.humidifier.force_off("emergency stop", sink));
        }
        if self.lighting.state() != ControllerState::Uninitialized {
            soft("lighting", self.lighting.set_intensity(0, true));
        }
        self.feeder.emergency_close(sink);
    }

    /// Hold every climate actuator off.  Only writes when something is
    /// still running, so a quiet cycle touches no hardware.
    fn enforce_maintenance(&mut self, sink: &mut impl EventSink) {
        if self.heater.state() != ControllerState::Uninitialized && self.heater.is_heating() {
            soft("heater", self.heater.force_off("maintenance", sink));
            self.decide("heater_off", "maintenance mode".into());
        }
        if self.humidifier.state() != ControllerState::Uninitialized && self.humidifier.is_humidifying() {
            soft("humidifier", self.humidifier.force_off("maintenance", sink));
            self.decide("humidifier_off", "maintenance mode".into());
        }
        if self.lighting.state() != ControllerState::Uninitialized && self.lighting.intensity() != 0 {
            soft("lighting", self.lighting.set_intensity(0, true));
            self.decide("led_intensity", "maintenance mode, lights off".into());
        }
        if self.fan.state() != ControllerState::Uninitialized && (self.fan.speed() > 0.0 || self.fan.target() > 0.0) {
            soft("fan", self.fan.force_off(sink));
            self.decide("fan_speed", "maintenance mode, fan stopped".into());
        }
    }

    fn require_override(&self) -> Result<(), ControllerError> {
        if self.emergency {
            return Err(ControllerError::EmergencyStop);
        }
        if self.mode != Mode::Manual {
            return Err(ControllerError::InvalidArgument("manual override requires manual mode"));
        }
        Ok(())
    }

    // ── Auto policies ─────────────────────────────────────────

    fn control_temperature(&mut self, temperature: Option<f32>, sink: &mut impl EventSink) {
        if self.heater.state() == ControllerState::Uninitialized {
            return;
        }
        let band = self.config.policies.temperature;
        let enabled = self.config.policies.toggles.temperature;
        let Some(t) = temperature.filter(|_| enabled && !self.safety.heater_inhibited()) else {
            soft("heater", self.heater.supervise(temperature, sink));
            return;
        };
        if self.applied.heater_band != Some(band) {
            match self.heater.configure(band.target, band.tolerance) {
                Ok(()) => self.applied.heater_band = Some(band),
                Err(e) => warn!("service: temperature policy rejected: {e}"),
            }
        }
        let was = self.heater.is_heating();
        match self.heater.update(t, sink) {
            Ok(on) if on != was => {
                let kind = if on { "heater_on" } else { "heater_off" };
                self.decide(
                    kind,
                    format!("temperature {t:.1}°C, target {:.1} ±{:.1}", band.target, band.tolerance),
                );
            }
            Ok(_) => {}
            Err(e) => warn!("service: heater cycle failed: {e}"),
        }
    }

    fn control_humidity(&mut self, humidity: Option<f32>, sink: &mut impl EventSink) {
        if self.humidifier.state() == ControllerState::Uninitialized {
            return;
        }
        let band = self.config.policies.humidity;
        let enabled = self.config.policies.toggles.humidity;
        let Some(h) = humidity.filter(|_| enabled && !self.safety.humidifier_inhibited()) else {
            soft("humidifier", self.humidifier.supervise(humidity, sink));
            return;
        };
        if self.applied.humidity_band != Some(band) {
            let res = self
                .humidifier
                .set_target(band.target)
                .and_then(|()| self.humidifier.set_hysteresis(band.tolerance));
            match res {
                Ok(()) => self.applied.humidity_band = Some(band),
                Err(e) => warn!("service: humidity policy rejected: {e}"),
            }
        }
        let was = self.humidifier.is_humidifying();
        match self.humidifier.update(h, sink) {
            Ok(on) if on != was => {
                let kind = if on { "humidifier_on" } else { "humidifier_off" };
                self.decide(
                    kind,
                    format!("humidity {h:.0}%, target {:.0} ±{:.0}", band.target, band.tolerance),
                );
            }
            Ok(_) => {}
            Err(e) => warn!("service: humidifier cycle failed: {e}"),
        }
    }

    fn control_lighting(&mut self) {
        if !self.config.policies.toggles.lighting || self.lighting.state() == ControllerState::Uninitialized {
            return;
        }
        let hour = self.clock.local_time().hour;
        match self.lighting.update(&self.config.policies.lighting, hour) {
            Ok(Some(intensity)) => self.decide("led_intensity", format!("intensity {intensity}% at {hour}h")),
            Ok(None) => {}
            Err(e) => warn!("service: lighting change failed: {e}"),
        }
    }

    fn control_ventilation(&mut self, aqi: Option<f32>, sink: &mut impl EventSink) {
        if self.fan.state() == ControllerState::Uninitialized {
            return;
        }
        let auto = self.mode == Mode::Auto && self.config.policies.toggles.ventilation;
        let aqi = aqi.filter(|_| auto);
        if let Some(a) = aqi {
            let degraded = a > self.config.policies.ventilation.aqi_threshold;
            if self.applied.ventilation_degraded != Some(degraded) {
                if self.applied.ventilation_degraded.is_some() || degraded {
                    let what = if degraded { "degraded" } else { "normal" };
                    self.decide("ventilation", format!("air quality {what}: AQI {a:.0}"));
                }
                self.applied.ventilation_degraded = Some(degraded);
            }
        }
        soft("fan", self.fan.update(aqi, sink).map(|_| ()));
    }

    /// Scheduled feed, at most once per local day.
    fn control_feeding(&mut self, sink: &mut impl EventSink) {
        let policy = &self.config.policies.feeding;
        if !self.config.policies.toggles.feeding || self.feeder.state() == ControllerState::Uninitialized {
            return;
        }
        let now = self.clock.local_time();
        if !policy.hours.contains(&now.hour) || self.feeding_record.last_feeding_date == Some(now.date) {
            return;
        }
        // One attempt per scheduled hour; a refused feed is not retried every cycle.
        if self.feed_attempt == Some((now.date, now.hour)) {
            return;
        }
        self.feed_attempt = Some((now.date, now.hour));

        let (count, delay) = (policy.fly_count, policy.trap_delay_secs);
        match self.feeder.start_feeding(count as f32, delay, sink) {
            Ok(()) => {
                self.feeding_record.last_feeding_date = Some(now.date);
                self.decide("feeding", format!("scheduled feed of {count} at {}h", now.hour));
                self.persist_feeding();
            }
            Err(e) => warn!("service: scheduled feed at {}h refused: {e}", now.hour),
        }
    }

    // ── Bookkeeping ───────────────────────────────────────────

    fn decide(&mut self, kind: &'static str, reason: String) {
        info!("DECISION | {kind} | {reason}");
        self.decisions.push(DecisionRecord {
            kind,
            reason,
            mode: self.mode,
            timestamp: self.clock.now(),
        });
    }

    /// Diff the live actuator state against the last snapshot and publish changes.
    fn sync_actuators(&mut self, sink: &mut impl EventSink) {
        let next = ActuatorState {
            led_intensity: self.lighting.intensity(),
            heater_on: self.heater.is_heating(),
            humidifier_on: self.humidifier.is_humidifying(),
            fan_speed: self.fan.speed(),
            feeder_position: self.feeder.position(),
        };
        let prev = self.actuators;
        let mut changes = heapless::Vec::<(Actuator, ActionValue), 5>::new();
        if next.led_intensity != prev.led_intensity {
            let _ = changes.push((Actuator::Led, ActionValue::Level(f32::from(next.led_intensity))));
        }
        if next.heater_on != prev.heater_on {
            let _ = changes.push((Actuator::Heater, ActionValue::Switch(next.heater_on)));
        }
        if next.humidifier_on != prev.humidifier_on {
            let _ = changes.push((Actuator::Humidifier, ActionValue::Switch(next.humidifier_on)));
        }
        if next.fan_speed != prev.fan_speed {
            let _ = changes.push((Actuator::Fan, ActionValue::Level(next.fan_speed)));
        }
        if next.feeder_position != prev.feeder_position {
            let _ = changes.push((Actuator::Feeder, ActionValue::Position(next.feeder_position)));
        }
        let timestamp = self.clock.now();
        for (actuator, value) in changes {
            let record = ActionRecord {
                actuator,
                value,
                timestamp,
            };
            self.actions.push(record);
            sink.emit(&Event::ActuatorAction(record));
        }
        self.actuators = next;
    }

    fn persist_feeding(&mut self) {
        let (daily_count, count_date) = self.feeder.daily_record();
        self.feeding_record.daily_count = daily_count;
        self.feeding_record.count_date = count_date;
        if let Err(e) = self.store.save_feeding(&self.feeding_record) {
            warn!("service: failed to persist feeding record: {e}");
        }
    }
}

/// Log a failed controller call without aborting the cycle.
fn soft(what: &str, res: Result<(), ControllerError>) {
    if let Err(e) = res {
        warn!("service: {what}: {e}");
    }
}
