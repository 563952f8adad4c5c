//! Humidifier controller.
//!
//! Drives the humidifier relay and, when fitted, a mister relay that runs
//! alongside it.  Control law on `diff = target − current`:
//!
//! ```text
//!   start  when diff > hysteresis, idle ≥ min_cycle_secs since last stop
//!   stop   when diff <= 0
//!   stop   when the cycle has run max_cycle_secs
//!   current > max_humidity  →  forced off + humidification_emergency_stop
//! ```
//!
//! The idle gate only delays starts; a stop is never held back.

use log::{error, info, warn};
use serde::Serialize;

use super::{Controller, ControllerState, ensure_started, init_optional, init_required};
use crate::app::events::{Actuation, Event};
use crate::app::ports::EventSink;
use crate::clock::SharedClock;
use crate::config::HumidifierSettings;
use crate::drivers::Switch;
use crate::error::ControllerError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HumidifierStatus {
    pub state: ControllerState,
    pub humidifying: bool,
    pub current: Option<f32>,
    pub target: f32,
    pub hysteresis: f32,
    pub max_humidity: f32,
    pub cycles: u64,
    /// Seconds into the running cycle, 0 when idle.
    pub cycle_secs: f64,
    pub mister_fitted: bool,
    pub tripped: bool,
}

pub struct HumidifierController {
    humidifier: Box<dyn Switch>,
    mister: Option<Box<dyn Switch>>,
    settings: HumidifierSettings,
    target: f32,
    clock: SharedClock,
    state: ControllerState,
    current: Option<f32>,
    humidifying: bool,
    cycle_start: Option<f64>,
    last_cycle_end: Option<f64>,
    cycles: u64,
    tripped: bool,
}

impl HumidifierController {
    pub fn new(
        humidifier: Box<dyn Switch>,
        settings: HumidifierSettings,
        target: f32,
        clock: SharedClock,
    ) -> Self {
        Self {
            humidifier,
            mister: None,
            settings,
            target,
            clock,
            state: ControllerState::Uninitialized,
            current: None,
            humidifying: false,
            cycle_start: None,
            last_cycle_end: None,
            cycles: 0,
            tripped: false,
        }
    }

    pub fn with_mister(mut self, mister: Box<dyn Switch>) -> Self {
        self.mister = Some(mister);
        self
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_humidifying(&self) -> bool {
        self.humidifying
    }

    /// Refuses targets above the humidity ceiling.
    pub fn set_target(&mut self, target: f32) -> Result<(), ControllerError> {
        if !(0.0..=100.0).contains(&target) {
            return Err(ControllerError::InvalidArgument("humidity target must lie in 0-100"));
        }
        if target > self.settings.max_humidity {
            warn!(
                "humidifier: target {target:.0}% above ceiling {:.0}% refused",
                self.settings.max_humidity
            );
            return Err(ControllerError::SafetyLimit);
        }
        if target != self.target {
            info!("humidifier: target {:.0} -> {target:.0}%", self.target);
        }
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

    /// Run the control law against a fresh reading.
    pub fn update(&mut self, current: f32, sink: &mut impl EventSink) -> Result<bool, ControllerError> {
        ensure_started(self.state)?;
        self.current = Some(current);
        self.state = ControllerState::Running;

        if self.check_ceiling(current, sink)? || self.check_cycle_length(sink)? {
            return Ok(self.humidifying);
        }

        let diff = self.target - current;
        if !self.humidifying && diff > self.settings.hysteresis {
            if self.idle_elapsed() {
                self.start("below hysteresis band", sink)?;
            }
        } else if self.humidifying && diff <= 0.0 {
            self.stop("target reached", sink)?;
        }
        Ok(self.humidifying)
    }

    /// Ceiling and cycle-length checks only, for manual mode.
    pub fn supervise(&mut self, current: Option<f32>, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        if let Some(h) = current {
            self.current = Some(h);
            if self.check_ceiling(h, sink)? {
                return Ok(());
            }
        }
        self.check_cycle_length(sink).map(|_| ())
    }

    /// Manual on.  Refused at or above the ceiling, and when humidity is unknown.
    pub fn force_on(&mut self, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        match self.current {
            Some(h) if h < self.settings.max_humidity => {}
            _ => {
                warn!("humidifier: manual on refused at {:?}%", self.current);
                return Err(ControllerError::SafetyLimit);
            }
        }
        if !self.humidifying {
            self.start("manual", sink)?;
        }
        Ok(())
    }

    /// Manual or emergency off, ignoring relay debounce.
    pub fn force_off(&mut self, reason: &'static str, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        if self.humidifying || self.humidifier.is_on() {
            self.release()?;
            info!("humidifier: off ({reason})");
            sink.emit(&Event::HumidificationStopped(self.actuation(reason)));
        }
        Ok(())
    }

    pub fn status(&self) -> HumidifierStatus {
        HumidifierStatus {
            state: self.state,
            humidifying: self.humidifying,
            current: self.current,
            target: self.target,
            hysteresis: self.settings.hysteresis,
            max_humidity: self.settings.max_humidity,
            cycles: self.cycles,
            cycle_secs: self.cycle_start.map_or(0.0, |t| self.clock.now() - t),
            mister_fitted: self.mister.is_some(),
            tripped: self.tripped,
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn idle_elapsed(&self) -> bool {
        self.last_cycle_end
            .is_none_or(|end| self.clock.now() - end >= f64::from(self.settings.min_cycle_secs))
    }

    fn check_ceiling(&mut self, current: f32, sink: &mut impl EventSink) -> Result<bool, ControllerError> {
        if current <= self.settings.max_humidity {
            self.tripped = false;
            return Ok(false);
        }
        if self.humidifying || self.humidifier.is_on() {
            self.release()?;
        }
        if !self.tripped {
            error!(
                "humidifier: {current:.0}% over ceiling {:.0}%, emergency off",
                self.settings.max_humidity
            );
            sink.emit(&Event::HumidificationEmergencyStop(self.actuation("over humidity ceiling")));
        }
        self.tripped = true;
        Ok(true)
    }

    fn check_cycle_length(&mut self, sink: &mut impl EventSink) -> Result<bool, ControllerError> {
        let Some(start) = self.cycle_start else {
            return Ok(false);
        };
        let ran = self.clock.now() - start;
        if ran <= f64::from(self.settings.max_cycle_secs) {
            return Ok(false);
        }
        warn!(
            "humidifier: cycle ran {ran:.0}s, over {:.0}s limit",
            self.settings.max_cycle_secs
        );
        self.release()?;
        sink.emit(&Event::HumidificationStopped(self.actuation("max cycle duration")));
        Ok(true)
    }

    fn start(&mut self, reason: &'static str, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        self.humidifier.set(true)?;
        if let Some(m) = self.mister.as_mut() {
            // The mister only speeds things up; run without it if it balks.
            if let Err(e) = m.set(true) {
                warn!("humidifier: mister failed to start: {e}");
            }
        }
        self.humidifying = true;
        self.cycle_start = Some(self.clock.now());
        self.cycles += 1;
        info!("humidifier: on ({reason}) at {:?}%, target {:.0}%", self.current, self.target);
        sink.emit(&Event::HumidificationStarted(self.actuation(reason)));
        Ok(())
    }

    fn stop(&mut self, reason: &'static str, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        let ran = self.cycle_start.map_or(0.0, |t| self.clock.now() - t);
        self.humidifier.set(false)?;
        if let Some(m) = self.mister.as_mut() {
            if let Err(e) = m.force(false) {
                warn!("humidifier: mister failed to stop: {e}");
            }
        }
        self.end_cycle();
        info!("humidifier: off ({reason}) after {ran:.1}s");
        sink.emit(&Event::HumidificationStopped(self.actuation(reason)));
        Ok(())
    }

    /// Forced off on both relays.  The cycle only ends once the
    /// humidifier relay has actually been driven off.
    fn release(&mut self) -> Result<(), ControllerError> {
        let res = self.humidifier.force(false);
        if let Some(m) = self.mister.as_mut() {
            if let Err(e) = m.force(false) {
                warn!("humidifier: mister failed to stop: {e}");
            }
        }
        res?;
        self.end_cycle();
        Ok(())
    }

    fn end_cycle(&mut self) {
        if self.humidifying {
            self.last_cycle_end = Some(self.clock.now());
        }
        self.humidifying = false;
        self.cycle_start = None;
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

impl Controller for HumidifierController {
    fn initialize(&mut self) -> Result<(), ControllerError> {
        init_required("humidifier", self.humidifier.as_mut())?;
        if let Some(m) = self.mister.as_deref_mut() {
            if init_optional("humidifier", m).is_some() {
                self.mister = None;
            }
        }
        let (min_cycle, max_on) = (
            f64::from(self.settings.relay_min_cycle_secs),
            f64::from(self.settings.relay_max_on_secs),
        );
        self.humidifier.set_cycle_limits(min_cycle, max_on);
        if let Some(m) = self.mister.as_mut() {
            m.set_cycle_limits(min_cycle, max_on);
        }
        self.state = ControllerState::Ready;
        info!(
            "humidifier: ready, target {:.0}% ±{:.0}, ceiling {:.0}%, mister {}",
            self.target,
            self.settings.hysteresis,
            self.settings.max_humidity,
            if self.mister.is_some() { "fitted" } else { "absent" }
        );
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.release() {
            warn!("humidifier: forced off failed during cleanup: {e}");
        }
        self.humidifier.shutdown();
        if let Some(m) = self.mister.as_mut() {
            m.shutdown();
        }
        self.state = ControllerState::Uninitialized;
    }

    fn state(&self) -> ControllerState {
        self.state
    }
}
