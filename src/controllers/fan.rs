//! Ventilation fan controller.
//!
//! In auto mode the air-quality index picks a target speed band; the
//! output then ramps linearly toward it at `(max − min) / ramp_time`
//! percent per second instead of stepping.  Below `min_speed` the fan
//! stalls, so the ramp jumps straight between 0 and `min_speed`.
//!
//! | AQI      | target |
//! |----------|--------|
//! | ≤ 50     | 0 %    |
//! | ≤ 100    | 30 %   |
//! | ≤ 150    | 60 %   |
//! | ≤ 200    | 80 %   |
//! | > 200    | 100 %  |

use log::{debug, info, warn};
use serde::Serialize;

use super::{Controller, ControllerState, ensure_started, init_required};
use crate::app::events::Event;
use crate::app::ports::EventSink;
use crate::clock::SharedClock;
use crate::config::FanSettings;
use crate::drivers::Dimmer;
use crate::error::ControllerError;

/// Target speed band for an air-quality index.
pub fn speed_for_aqi(aqi: f32) -> f32 {
    if aqi <= 50.0 {
        0.0
    } else if aqi <= 100.0 {
        30.0
    } else if aqi <= 150.0 {
        60.0
    } else if aqi <= 200.0 {
        80.0
    } else {
        100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FanStatus {
    pub state: ControllerState,
    pub speed: f32,
    pub target: f32,
    pub auto: bool,
    pub running: bool,
    pub speed_changes: u64,
    pub min_speed: f32,
    pub max_speed: f32,
    pub ramp_time_secs: f32,
}

pub struct FanController {
    output: Box<dyn Dimmer>,
    settings: FanSettings,
    clock: SharedClock,
    state: ControllerState,
    auto: bool,
    speed: f32,
    target: f32,
    last_step: Option<f64>,
    speed_changes: u64,
}

impl FanController {
    pub fn new(output: Box<dyn Dimmer>, settings: FanSettings, clock: SharedClock) -> Self {
        Self {
            output,
            settings,
            clock,
            state: ControllerState::Uninitialized,
            auto: true,
            speed: 0.0,
            target: 0.0,
            last_step: None,
            speed_changes: 0,
        }
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_auto(&self) -> bool {
        self.auto
    }

    pub fn set_auto(&mut self, auto: bool) {
        if auto != self.auto {
            info!("fan: auto mode {}", if auto { "on" } else { "off" });
        }
        self.auto = auto;
    }

    /// Set the ramp target.  0 stops; anything else is clamped to
    /// `[min_speed, max_speed]`.
    pub fn set_speed(&mut self, speed: f32, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        if !speed.is_finite() {
            return Err(ControllerError::InvalidArgument("fan speed must be finite"));
        }
        let target = if speed <= 0.0 {
            0.0
        } else {
            speed.clamp(self.settings.min_speed, self.settings.max_speed)
        };
        if target != self.target {
            self.target = target;
            self.speed_changes += 1;
            self.last_step = Some(self.clock.now());
            info!("fan: target {target:.0}% (now {:.0}%)", self.speed);
            sink.emit(&Event::FanSpeedChanged {
                target,
                speed: self.speed,
                timestamp: self.clock.now(),
            });
        }
        Ok(())
    }

    /// Manual full-speed (or given speed) run; leaves auto mode and skips the ramp.
    pub fn force_on(&mut self, speed: f32, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        self.set_auto(false);
        self.set_speed(speed, sink)?;
        self.apply(self.target)
    }

    /// Stop immediately; leaves auto mode.
    pub fn force_off(&mut self, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        self.set_auto(false);
        self.set_speed(0.0, sink)?;
        self.apply(0.0)
    }

    /// One cycle: pick a target from `aqi` in auto mode, then ramp.
    pub fn update(&mut self, aqi: Option<f32>, sink: &mut impl EventSink) -> Result<f32, ControllerError> {
        ensure_started(self.state)?;
        self.state = ControllerState::Running;
        if self.auto {
            if let Some(aqi) = aqi {
                self.set_speed(speed_for_aqi(aqi), sink)?;
            }
        }
        self.ramp()?;
        Ok(self.speed)
    }

    pub fn status(&self) -> FanStatus {
        FanStatus {
            state: self.state,
            speed: self.speed,
            target: self.target,
            auto: self.auto,
            running: self.speed > 0.0,
            speed_changes: self.speed_changes,
            min_speed: self.settings.min_speed,
            max_speed: self.settings.max_speed,
            ramp_time_secs: self.settings.ramp_time_secs,
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn ramp(&mut self) -> Result<(), ControllerError> {
        let now = self.clock.now();
        let elapsed = self.last_step.map_or(0.0, |t| (now - t).max(0.0)) as f32;
        self.last_step = Some(now);
        if self.speed == self.target {
            return Ok(());
        }

        let min = self.settings.min_speed;
        let next = if self.target > 0.0 && self.speed < min {
            // Spin up straight to the stall threshold.
            min.min(self.target)
        } else if self.target == 0.0 && self.speed <= min {
            0.0
        } else {
            let rate = (self.settings.max_speed - min) / self.settings.ramp_time_secs;
            let step = rate * elapsed;
            let stepped = if self.target > self.speed {
                (self.speed + step).min(self.target)
            } else {
                (self.speed - step).max(self.target)
            };
            // Heading to 0, stop once the ramp reaches the stall threshold.
            if self.target == 0.0 && stepped <= min { 0.0 } else { stepped }
        };
        debug!("fan: ramp {:.1} -> {next:.1}% (target {:.0})", self.speed, self.target);
        self.apply(next)
    }

    fn apply(&mut self, speed: f32) -> Result<(), ControllerError> {
        self.output.set_duty(speed)?;
        self.speed = speed;
        Ok(())
    }
}

impl Controller for FanController {
    fn initialize(&mut self) -> Result<(), ControllerError> {
        init_required("fan", self.output.as_mut())?;
        self.apply(0.0)?;
        self.state = ControllerState::Ready;
        info!(
            "fan: ready, {:.0}-{:.0}% over {:.1}s ramp",
            self.settings.min_speed, self.settings.max_speed, self.settings.ramp_time_secs
        );
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.apply(0.0) {
            warn!("fan: failed to stop during cleanup: {e}");
        }
        self.target = 0.0;
        self.output.shutdown();
        self.state = ControllerState::Uninitialized;
    }

    fn state(&self) -> ControllerState {
        self.state
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::controllers::heater::tests::Events;
    use crate::drivers::DriverConfig;
    use crate::drivers::pwm::PwmDriver;
    use core::convert::Infallible;
    use embedded_hal::pwm::{ErrorType, SetDutyCycle};

    pub(crate) struct NullChannel;

    impl ErrorType for NullChannel {
        type Error = Infallible;
    }

    impl SetDutyCycle for NullChannel {
        fn max_duty_cycle(&self) -> u16 {
            1000
        }
        fn set_duty_cycle(&mut self, _duty: u16) -> Result<(), Infallible> {
            Ok(())
        }
    }

    pub(crate) fn dimmer(name: &str, clock: &SimClock) -> Box<dyn Dimmer> {
        Box::new(PwmDriver::new(DriverConfig::new(name), NullChannel, clock.clone(), clock.shared()))
    }

    fn fan() -> (FanController, SimClock) {
        let clock = SimClock::new();
        let mut f = FanController::new(dimmer("fan", &clock), FanSettings::default(), clock.shared());
        f.initialize().unwrap();
        (f, clock)
    }

    #[test]
    fn aqi_bands() {
        assert_eq!(speed_for_aqi(10.0), 0.0);
        assert_eq!(speed_for_aqi(50.0), 0.0);
        assert_eq!(speed_for_aqi(75.0), 30.0);
        assert_eq!(speed_for_aqi(150.0), 60.0);
        assert_eq!(speed_for_aqi(199.0), 80.0);
        assert_eq!(speed_for_aqi(320.0), 100.0);
    }

    #[test]
    fn ramps_linearly_toward_target() {
        let (mut f, clock) = fan();
        let mut ev = Events::default();
        // Jumps to the stall threshold first.
        assert_eq!(f.update(Some(250.0), &mut ev).unwrap(), 20.0);
        // 80 %/5 s = 16 %/s.
        clock.advance_secs(1.0);
        assert!((f.update(Some(250.0), &mut ev).unwrap() - 36.0).abs() < 1e-3);
        clock.advance_secs(10.0);
        assert_eq!(f.update(Some(250.0), &mut ev).unwrap(), 100.0);
        assert_eq!(ev.topics(), vec!["fan_speed_changed"]);
    }

    #[test]
    fn ramp_down_drops_to_zero_below_stall() {
        let (mut f, clock) = fan();
        let mut ev = Events::default();
        f.force_on(30.0, &mut ev).unwrap();
        assert_eq!(f.speed(), 30.0);
        f.set_speed(0.0, &mut ev).unwrap();
        clock.advance_secs(0.5);
        assert_eq!(f.update(None, &mut ev).unwrap(), 22.0);
        clock.advance_secs(0.5);
        assert_eq!(f.update(None, &mut ev).unwrap(), 0.0);
    }

    #[test]
    fn manual_speed_ignores_aqi() {
        let (mut f, clock) = fan();
        let mut ev = Events::default();
        f.set_auto(false);
        f.set_speed(150.0, &mut ev).unwrap();
        assert_eq!(f.target(), 100.0);
        f.update(Some(10.0), &mut ev).unwrap();
        clock.advance_secs(30.0);
        f.update(Some(10.0), &mut ev).unwrap();
        assert_eq!(f.speed(), 100.0);
        f.force_off(&mut ev).unwrap();
        assert_eq!(f.speed(), 0.0);
        assert!(!f.status().running);
    }
}
