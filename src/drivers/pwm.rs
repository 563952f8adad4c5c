//! PWM output driver (LED dimming, fan speed).
//!
//! Duty is expressed in percent and clamped to the configured
//! `[min_duty, max_duty]` window before it reaches the channel.  Fades
//! step linearly and always land exactly on the target.

use embedded_hal::delay::DelayNs;
use embedded_hal::pwm::SetDutyCycle;
use log::{debug, info, warn};
use serde::Serialize;

use super::{Driver, DriverConfig, DriverCore};
use crate::clock::SharedClock;
use crate::error::DriverError;

pub const DEFAULT_FREQUENCY_HZ: u32 = 1000;
pub const DEFAULT_FADE_STEPS: u32 = 50;
pub const DEFAULT_FADE_SECS: f32 = 1.0;

/// Channels whose carrier frequency can be changed at runtime.
pub trait FrequencyControl {
    fn set_frequency_hz(&mut self, hz: u32) -> Result<(), DriverError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PwmCommand {
    /// Jump straight to a duty percentage.
    Set(f32),
    /// Step linearly to `target` over `duration_secs`.
    Fade { target: f32, duration_secs: f32, steps: u32 },
    /// Drive the output to 0 %, remembering the duty for `Start`.
    Stop,
    /// Re-apply the duty held before `Stop`.
    Start,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PwmState {
    pub duty: f32,
    pub frequency_hz: u32,
    pub running: bool,
    pub min_duty: f32,
    pub max_duty: f32,
}

/// Intermediate duties of an `steps`-step fade, last one exactly `target`.
pub fn fade_profile(start: f32, target: f32, steps: u32) -> impl Iterator<Item = f32> {
    let steps = steps.max(1);
    (1..=steps).map(move |i| {
        if i == steps {
            target
        } else {
            start + (target - start) * i as f32 / steps as f32
        }
    })
}

pub struct PwmDriver<P, D> {
    core: DriverCore,
    channel: P,
    delay: D,
    duty: f32,
    resume_duty: f32,
    min_duty: f32,
    max_duty: f32,
    frequency_hz: u32,
    running: bool,
}

impl<P: SetDutyCycle, D: DelayNs> PwmDriver<P, D> {
    pub fn new(config: DriverConfig, channel: P, delay: D, clock: SharedClock) -> Self {
        Self {
            core: DriverCore::new(config, clock),
            channel,
            delay,
            duty: 0.0,
            resume_duty: 0.0,
            min_duty: 0.0,
            max_duty: 100.0,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            running: false,
        }
    }

    pub fn duty(&self) -> f32 {
        self.duty
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn snapshot(&self) -> PwmState {
        PwmState {
            duty: self.duty,
            frequency_hz: self.frequency_hz,
            running: self.running,
            min_duty: self.min_duty,
            max_duty: self.max_duty,
        }
    }

    /// Restrict the duty window.  Inverted limits are swapped.
    pub fn set_duty_limits(&mut self, min: f32, max: f32) -> Result<(), DriverError> {
        let (lo, hi) = if min > max { (max, min) } else { (min, max) };
        self.min_duty = lo.clamp(0.0, 100.0);
        self.max_duty = hi.clamp(0.0, 100.0);
        if self.running {
            let d = self.duty;
            self.apply(d)?;
        }
        Ok(())
    }

    pub fn set_duty(&mut self, percent: f32) -> Result<(), DriverError> {
        self.core.ensure_operable()?;
        self.apply(percent)
    }

    pub fn fade_to(&mut self, target: f32, duration_secs: f32, steps: u32) -> Result<(), DriverError> {
        self.core.ensure_operable()?;
        if duration_secs.is_nan() || duration_secs < 0.0 {
            return Err(DriverError::InvalidCommand);
        }
        let steps = steps.max(1);
        let step_ms = (duration_secs * 1000.0 / steps as f32) as u32;
        debug!("{}: fade {:.1} -> {target:.1} over {duration_secs}s", self.core.name(), self.duty);
        let start = self.duty;
        for duty in fade_profile(start, target, steps) {
            self.apply(duty)?;
            self.delay.delay_ms(step_ms);
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), DriverError> {
        if self.running {
            self.resume_duty = self.duty;
        }
        self.write_hw(0.0)?;
        self.duty = 0.0;
        self.running = false;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), DriverError> {
        self.core.ensure_operable()?;
        let d = self.resume_duty;
        self.apply(d)
    }

    fn apply(&mut self, percent: f32) -> Result<(), DriverError> {
        if !percent.is_finite() {
            return Err(DriverError::InvalidCommand);
        }
        let duty = percent.clamp(self.min_duty, self.max_duty);
        self.write_hw(duty)?;
        self.duty = duty;
        self.running = duty > 0.0;
        Ok(())
    }

    fn write_hw(&mut self, percent: f32) -> Result<(), DriverError> {
        let max = self.channel.max_duty_cycle();
        let raw = (percent / 100.0 * f32::from(max)).round() as u16;
        self.channel
            .set_duty_cycle(raw.min(max))
            .map_err(|_| DriverError::Hardware)
    }
}

impl<P: SetDutyCycle + FrequencyControl, D: DelayNs> PwmDriver<P, D> {
    pub fn set_frequency(&mut self, hz: u32) -> Result<(), DriverError> {
        if hz == 0 {
            return Err(DriverError::InvalidCommand);
        }
        self.channel.set_frequency_hz(hz)?;
        self.frequency_hz = hz;
        info!("{}: frequency {hz} Hz", self.core.name());
        Ok(())
    }
}

impl<P: SetDutyCycle, D: DelayNs> Driver for PwmDriver<P, D> {
    type Reading = PwmState;
    type Command = PwmCommand;

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }

    fn initialize(&mut self) -> Result<(), DriverError> {
        self.core.begin_init()?;
        let off = self.write_hw(0.0);
        if off.is_ok() {
            self.duty = 0.0;
            self.running = false;
        }
        self.core.finish_init(off)
    }

    fn read(&mut self) -> Result<PwmState, DriverError> {
        self.core.ensure_operable()?;
        Ok(self.snapshot())
    }

    fn write(&mut self, command: PwmCommand) -> Result<(), DriverError> {
        match command {
            PwmCommand::Set(d) => self.set_duty(d),
            PwmCommand::Fade { target, duration_secs, steps } => self.fade_to(target, duration_secs, steps),
            PwmCommand::Stop => {
                self.core.ensure_operable()?;
                self.stop()
            }
            PwmCommand::Start => self.start(),
        }
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{}: failed to zero output on cleanup: {e}", self.core.name());
        }
        self.core.shut_down();
    }

    fn retry_pause(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}
