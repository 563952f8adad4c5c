//! Heater controller: two-point hysteresis behind a hard thermal ceiling.
//!
//! ```text
//!   on  when  T <  target − hysteresis
//!   off when  T >= target
//!   T > max_temperature  →  forced off + heater_emergency_stop
//! ```
//!
//! Between the two thresholds the relay keeps whatever state it had.

use log::{error, info, warn};
use serde::Serialize;

use super::{Controller, ControllerState, ensure_started, init_required};
use crate::app::events::{Actuation, Event};
use crate::app::ports::EventSink;
use crate::clock::SharedClock;
use crate::config::HeaterSettings;
use crate::drivers::Switch;
use crate::error::ControllerError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeaterStatus {
    pub state: ControllerState,
    pub heating: bool,
    pub current: Option<f32>,
    pub target: f32,
    pub hysteresis: f32,
    pub max_temperature: f32,
    pub cycles: u64,
    pub total_on_secs: f64,
    /// Set while the last reading was above the ceiling.
    pub tripped: bool,
}

pub struct HeaterController {
    relay: Box<dyn Switch>,
    settings: HeaterSettings,
    target: f32,
    clock: SharedClock,
    state: ControllerState,
    current: Option<f32>,
    cycles: u64,
    /// On-time of completed cycles.
    total_on_secs: f64,
    on_since: Option<f64>,
    tripped: bool,
}

impl HeaterController {
    pub fn new(relay: Box<dyn Switch>, settings: HeaterSettings, target: f32, clock: SharedClock) -> Self {
        Self {
            relay,
            settings,
            target,
            clock,
            state: ControllerState::Uninitialized,
            current: None,
            cycles: 0,
            total_on_secs: 0.0,
            on_since: None,
            tripped: false,
        }
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Refuses targets above the thermal ceiling.
    pub fn set_target(&mut self, target: f32) -> Result<(), ControllerError> {
        if !target.is_finite() {
            return Err(ControllerError::InvalidArgument("temperature target must be finite"));
        }
        if target > self.settings.max_temperature {
            warn!(
                "heater: target {target:.1}°C above ceiling {:.1}°C refused",
                self.settings.max_temperature
            );
            return Err(ControllerError::SafetyLimit);
        }
        info!("heater: target {:.1} -> {target:.1}°C", self.target);
        self.target = target;
        Ok(())
    }

    pub fn set_hysteresis(&mut self, hysteresis: f32) -> Result<(), ControllerError> {
        if !(hysteresis.is_finite() && hysteresis >= 0.0) {
            return Err(ControllerError::InvalidArgument("hysteresis must be non-negative"));
        }
        self.settings.hysteresis = hysteresis;
        Ok(())
    }

    /// Apply a target and band in one step, as the temperature policy does.
    pub fn configure(&mut self, target: f32, hysteresis: f32) -> Result<(), ControllerError> {
        self.set_hysteresis(hysteresis)?;
        if target != self.target {
            self.set_target(target)?;
        }
        Ok(())
    }

    pub fn is_heating(&self) -> bool {
        self.relay.is_on()
    }

    /// Run the control law against a fresh reading.
    ///
    /// Returns whether the relay is on afterwards.
    pub fn update(&mut self, current: f32, sink: &mut impl EventSink) -> Result<bool, ControllerError> {
        ensure_started(self.state)?;
        self.current = Some(current);
        self.state = ControllerState::Running;

        if self.check_ceiling(current, sink)? {
            return Ok(false);
        }
        if self.enforce_max_on(sink)? {
            return Ok(false);
        }

        let on = self.relay.is_on();
        if !on && current < self.target - self.settings.hysteresis {
            self.switch(true, "below hysteresis band", sink)?;
        } else if on && current >= self.target {
            self.switch(false, "target reached", sink)?;
        }
        Ok(self.relay.is_on())
    }

    /// Ceiling and max-on checks without the control law, for manual mode.
    pub fn supervise(&mut self, current: Option<f32>, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        if let Some(t) = current {
            self.current = Some(t);
            if self.check_ceiling(t, sink)? {
                return Ok(());
            }
        }
        self.enforce_max_on(sink).map(|_| ())
    }

    /// Manual on.  Refused at or above the ceiling.
    pub fn force_on(&mut self, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        if self.current.is_some_and(|t| t >= self.settings.max_temperature) {
            warn!("heater: manual on refused at {:?}°C", self.current);
            return Err(ControllerError::SafetyLimit);
        }
        if !self.relay.is_on() {
            self.switch(true, "manual", sink)?;
        }
        Ok(())
    }

    /// Manual or emergency off.  Ignores the relay debounce.
    pub fn force_off(&mut self, reason: &'static str, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        if self.relay.is_on() {
            self.relay.force(false)?;
            self.note_off();
            info!("heater: off ({reason})");
            sink.emit(&Event::HeaterStopped(self.actuation(reason)));
        }
        Ok(())
    }

    pub fn status(&self) -> HeaterStatus {
        HeaterStatus {
            state: self.state,
            heating: self.relay.is_on(),
            current: self.current,
            target: self.target,
            hysteresis: self.settings.hysteresis,
            max_temperature: self.settings.max_temperature,
            cycles: self.cycles,
            total_on_secs: self.total_on_secs + self.on_since.map_or(0.0, |t| self.clock.now() - t),
            tripped: self.tripped,
        }
    }

    // ── Internal ──────────────────────────────────────────────

    /// True if the ceiling is exceeded (relay is then off).
    fn check_ceiling(&mut self, current: f32, sink: &mut impl EventSink) -> Result<bool, ControllerError> {
        if current <= self.settings.max_temperature {
            if self.tripped {
                info!("heater: temperature back under ceiling ({current:.1}°C)");
            }
            self.tripped = false;
            return Ok(false);
        }
        if self.relay.is_on() {
            self.relay.force(false)?;
            self.note_off();
        }
        if !self.tripped {
            error!(
                "heater: {current:.1}°C over ceiling {:.1}°C, emergency off",
                self.settings.max_temperature
            );
            sink.emit(&Event::HeaterEmergencyStop(self.actuation("over temperature ceiling")));
        }
        self.tripped = true;
        Ok(true)
    }

    /// True if the relay tripped on its on-time cap this call.
    fn enforce_max_on(&mut self, sink: &mut impl EventSink) -> Result<bool, ControllerError> {
        if !self.relay.enforce_max_on()? {
            return Ok(false);
        }
        self.note_off();
        sink.emit(&Event::HeaterStopped(self.actuation("max on-time exceeded")));
        Ok(true)
    }

    fn switch(&mut self, on: bool, reason: &'static str, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        self.relay.set(on)?;
        if on {
            self.cycles += 1;
            self.on_since = Some(self.clock.now());
            info!("heater: on ({reason}) at {:?}°C, target {:.1}", self.current, self.target);
            sink.emit(&Event::HeaterStarted(self.actuation(reason)));
        } else {
            self.note_off();
            info!("heater: off ({reason}) at {:?}°C", self.current);
            sink.emit(&Event::HeaterStopped(self.actuation(reason)));
        }
        Ok(())
    }

    fn note_off(&mut self) {
        if let Some(t) = self.on_since.take() {
            self.total_on_secs += self.clock.now() - t;
        }
    }

    fn actuation(&self, reason: &'static str) -> Actuation {
        Actuation {
            value: self.current,
            target: self.target,
            reason,
            timestamp: self.clock.now(),
        }
    }
}

impl Controller for HeaterController {
    fn initialize(&mut self) -> Result<(), ControllerError> {
        init_required("heater", self.relay.as_mut())?;
        self.relay.set_cycle_limits(
            f64::from(self.settings.relay_min_cycle_secs),
            f64::from(self.settings.relay_max_on_secs),
        );
        self.state = ControllerState::Ready;
        info!(
            "heater: ready, target {:.1}°C ±{:.1}, ceiling {:.1}°C",
            self.target, self.settings.hysteresis, self.settings.max_temperature
        );
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.relay.is_on() {
            if let Err(e) = self.relay.force(false) {
                warn!("heater: forced off failed during cleanup: {e}");
            }
            self.note_off();
        }
        self.relay.shutdown();
        self.state = ControllerState::Uninitialized;
    }

    fn state(&self) -> ControllerState {
        self.state
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::{Clock, SimClock};
    use crate::drivers::relay::Relay;
    use crate::drivers::DriverConfig;
    use core::convert::Infallible;
    use embedded_hal::digital::{ErrorType, OutputPin};

    pub(crate) struct NullPin;

    impl ErrorType for NullPin {
        type Error = Infallible;
    }

    impl OutputPin for NullPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    pub(crate) fn relay(name: &str, clock: &SimClock) -> Box<dyn Switch> {
        Box::new(Relay::new(DriverConfig::new(name), NullPin, true, clock.clone(), clock.shared()))
    }

    #[derive(Default)]
    pub(crate) struct Events(pub Vec<Event>);

    impl EventSink for Events {
        fn emit(&mut self, event: &Event) {
            self.0.push(event.clone());
        }
    }

    impl Events {
        pub(crate) fn topics(&self) -> Vec<&'static str> {
            self.0.iter().map(Event::topic).collect()
        }
    }

    fn heater() -> (HeaterController, SimClock) {
        let clock = SimClock::new();
        let mut h = HeaterController::new(relay("heater", &clock), HeaterSettings::default(), 25.0, clock.shared());
        h.initialize().unwrap();
        (h, clock)
    }

    #[test]
    fn update_before_initialize_is_refused() {
        let clock = SimClock::new();
        let mut h = HeaterController::new(relay("heater", &clock), HeaterSettings::default(), 25.0, clock.shared());
        assert_eq!(h.update(10.0, &mut Events::default()), Err(ControllerError::NotReady));
    }

    #[test]
    fn hysteresis_band_holds_state() {
        let (mut h, clock) = heater();
        let mut ev = Events::default();
        assert!(!h.update(24.5, &mut ev).unwrap(), "inside band stays off");
        clock.advance_secs(1.0);
        assert!(h.update(23.9, &mut ev).unwrap());
        clock.advance_secs(1.0);
        assert!(h.update(24.9, &mut ev).unwrap(), "inside band stays on");
        clock.advance_secs(1.0);
        assert!(!h.update(25.0, &mut ev).unwrap());
        assert_eq!(ev.topics(), vec!["heater_started", "heater_stopped"]);
        assert_eq!(h.status().cycles, 1);
        assert!((h.status().total_on_secs - 2.0).abs() < 1e-6);
    }

    #[test]
    fn ceiling_forces_off_and_emits_once() {
        let (mut h, clock) = heater();
        let mut ev = Events::default();
        h.update(20.0, &mut ev).unwrap();
        clock.advance_secs(0.01);
        assert!(!h.update(36.0, &mut ev).unwrap());
        assert!(!h.is_heating());
        h.update(37.0, &mut ev).unwrap();
        assert_eq!(ev.topics(), vec!["heater_started", "heater_emergency_stop"]);
        assert!(h.status().tripped);
        clock.advance_secs(1.0);
        h.update(30.0, &mut ev).unwrap();
        assert!(!h.status().tripped);
    }

    #[test]
    fn target_above_ceiling_rejected() {
        let (mut h, _clock) = heater();
        assert_eq!(h.set_target(40.0), Err(ControllerError::SafetyLimit));
        assert_eq!(h.target(), 25.0);
        assert!(matches!(h.set_hysteresis(-1.0), Err(ControllerError::InvalidArgument(_))));
    }

    #[test]
    fn manual_on_refused_at_ceiling() {
        let (mut h, clock) = heater();
        let mut ev = Events::default();
        h.supervise(Some(35.0), &mut ev).unwrap();
        assert_eq!(h.force_on(&mut ev), Err(ControllerError::SafetyLimit));
        h.supervise(Some(30.0), &mut ev).unwrap();
        h.force_on(&mut ev).unwrap();
        assert!(h.is_heating());
        h.force_off("manual", &mut ev).unwrap();
        assert!(!h.is_heating());
        assert!(clock.now() < 1.0);
    }

    #[test]
    fn configured_max_on_trips_the_heater() {
        let clock = SimClock::new();
        let settings = HeaterSettings {
            relay_max_on_secs: 60.0,
            ..HeaterSettings::default()
        };
        let mut h = HeaterController::new(relay("heater", &clock), settings, 25.0, clock.shared());
        h.initialize().unwrap();
        let mut ev = Events::default();
        assert!(h.update(20.0, &mut ev).unwrap());
        clock.advance_secs(59.0);
        assert!(h.update(20.0, &mut ev).unwrap());
        clock.advance_secs(2.0);
        assert!(!h.update(20.0, &mut ev).unwrap());
        assert_eq!(ev.topics(), vec!["heater_started", "heater_stopped"]);
        assert!(matches!(&ev.0[1], Event::HeaterStopped(a) if a.reason == "max on-time exceeded"));

        // Still cold on the next cycle: the law re-engages.
        clock.advance_secs(5.0);
        assert!(h.update(20.0, &mut ev).unwrap());
    }

    #[test]
    fn cleanup_leaves_relay_off() {
        let (mut h, clock) = heater();
        let mut ev = Events::default();
        h.update(10.0, &mut ev).unwrap();
        clock.advance_secs(0.01);
        h.cleanup();
        assert!(!h.is_heating());
        assert_eq!(h.state(), ControllerState::Uninitialized);
    }
}
