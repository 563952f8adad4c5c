//! LED lighting controller.
//!
//! Thin layer over one PWM channel: intensity changes fade over
//! [`FADE_SECS`] unless `immediate` is requested (emergency stop).

use log::{info, warn};
use serde::Serialize;

use super::{Controller, ControllerState, ensure_started, init_required};
use crate::config::LightingPolicy;
use crate::drivers::Dimmer;
use crate::drivers::pwm::DEFAULT_FADE_STEPS;
use crate::error::ControllerError;

pub const FADE_SECS: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LightingStatus {
    pub state: ControllerState,
    pub intensity: u8,
    pub changes: u64,
}

pub struct LightingController {
    led: Box<dyn Dimmer>,
    state: ControllerState,
    intensity: u8,
    changes: u64,
}

impl LightingController {
    pub fn new(led: Box<dyn Dimmer>) -> Self {
        Self {
            led,
            state: ControllerState::Uninitialized,
            intensity: 0,
            changes: 0,
        }
    }

    pub fn intensity(&self) -> u8 {
        self.intensity
    }

    /// Set intensity in percent (0–100).
    pub fn set_intensity(&mut self, percent: u8, immediate: bool) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        if percent > 100 {
            return Err(ControllerError::InvalidArgument("intensity must lie in 0-100"));
        }
        if percent == self.intensity {
            return Ok(());
        }
        if immediate {
            self.led.set_duty(f32::from(percent))?;
        } else {
            self.led.fade(f32::from(percent), FADE_SECS, DEFAULT_FADE_STEPS)?;
        }
        info!("lighting: {} -> {percent}%", self.intensity);
        self.intensity = percent;
        self.changes += 1;
        self.state = ControllerState::Running;
        Ok(())
    }

    /// Apply the day/night schedule for `hour`.  Returns the new intensity
    /// when it changed.
    pub fn update(&mut self, policy: &LightingPolicy, hour: u8) -> Result<Option<u8>, ControllerError> {
        ensure_started(self.state)?;
        let target = policy.intensity_at(hour);
        if target == self.intensity {
            return Ok(None);
        }
        self.set_intensity(target, false)?;
        Ok(Some(target))
    }

    pub fn status(&self) -> LightingStatus {
        LightingStatus {
            state: self.state,
            intensity: self.intensity,
            changes: self.changes,
        }
    }
}

impl Controller for LightingController {
    fn initialize(&mut self) -> Result<(), ControllerError> {
        init_required("lighting", self.led.as_mut())?;
        self.led.set_duty(0.0)?;
        self.intensity = 0;
        self.state = ControllerState::Ready;
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.led.set_duty(0.0) {
            warn!("lighting: failed to blank during cleanup: {e}");
        }
        self.intensity = 0;
        self.led.shutdown();
        self.state = ControllerState::Uninitialized;
    }

    fn state(&self) -> ControllerState {
        self.state
    }
}
