//! Object-safe views of drivers, one per role a controller needs.
//!
//! [`Driver`] carries associated types and a generic retry helper, so it
//! cannot be boxed.  Controllers instead hold `Box<dyn Switch>`,
//! `Box<dyn SensorDriver<ClimateReading>>` and so on.  Every write goes
//! through `safe_write`, so retries and failure escalation stay in force.

use super::pwm::{PwmCommand, PwmDriver};
use super::relay::{Relay, RelayCommand};
use super::servo::{Servo, ServoCommand, ServoPosition};
use super::{Driver, DriverState, DriverStatus};
use crate::error::DriverError;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;

/// Lifecycle shared by every role.
pub trait Managed: Send {
    fn init(&mut self) -> Result<(), DriverError>;
    fn shutdown(&mut self);
    /// Clear counters and re-initialize; the only exit from `Disabled`.
    fn recover(&mut self) -> Result<(), DriverError>;
    fn health(&self) -> DriverStatus;
    fn driver_state(&self) -> DriverState;
}

impl<T: Driver + Send> Managed for T {
    fn init(&mut self) -> Result<(), DriverError> {
        self.initialize()
    }

    fn shutdown(&mut self) {
        self.cleanup();
    }

    fn recover(&mut self) -> Result<(), DriverError> {
        self.reset()
    }

    fn health(&self) -> DriverStatus {
        self.status()
    }

    fn driver_state(&self) -> DriverState {
        self.state()
    }
}

/// A sensor producing readings of type `R`.
pub trait SensorDriver<R>: Managed {
    /// Retrying read.
    fn sample(&mut self) -> Result<R, DriverError>;
}

impl<T, R> SensorDriver<R> for T
where
    T: Driver<Reading = R> + Send,
{
    fn sample(&mut self) -> Result<R, DriverError> {
        self.safe_read()
    }
}

/// On/off actuator.
pub trait Switch: Managed {
    /// Debounced change.
    fn set(&mut self, on: bool) -> Result<(), DriverError>;
    /// Change that ignores debounce; used for safety shutdowns.
    fn force(&mut self, on: bool) -> Result<(), DriverError>;
    fn is_on(&self) -> bool;
    fn on_duration(&self) -> f64;
    fn switch_count(&self) -> u64;
    fn set_cycle_limits(&mut self, min_cycle_secs: f64, max_on_secs: f64);
    /// Trip the max-on guard; true if it forced the relay off.
    fn enforce_max_on(&mut self) -> Result<bool, DriverError>;
}

impl<P, D> Switch for Relay<P, D>
where
    P: OutputPin + Send + 'static,
    D: DelayNs + Send,
{
    fn set(&mut self, on: bool) -> Result<(), DriverError> {
        self.safe_write(RelayCommand::Set(on))
    }

    fn force(&mut self, on: bool) -> Result<(), DriverError> {
        self.safe_write(RelayCommand::Force(on))
    }

    fn is_on(&self) -> bool {
        Relay::is_on(self)
    }

    fn on_duration(&self) -> f64 {
        Relay::on_duration(self)
    }

    fn switch_count(&self) -> u64 {
        Relay::switch_count(self)
    }

    fn set_cycle_limits(&mut self, min_cycle_secs: f64, max_on_secs: f64) {
        Relay::set_cycle_limits(self, min_cycle_secs, max_on_secs);
    }

    fn enforce_max_on(&mut self) -> Result<bool, DriverError> {
        Relay::enforce_max_on(self)
    }
}

/// Variable-duty output (LEDs, fan).
pub trait Dimmer: Managed {
    fn set_duty(&mut self, percent: f32) -> Result<(), DriverError>;
    fn fade(&mut self, target: f32, duration_secs: f32, steps: u32) -> Result<(), DriverError>;
    fn duty(&self) -> f32;
    fn set_duty_limits(&mut self, min: f32, max: f32) -> Result<(), DriverError>;
}

impl<P, D> Dimmer for PwmDriver<P, D>
where
    P: SetDutyCycle + Send,
    D: DelayNs + Send,
{
    fn set_duty(&mut self, percent: f32) -> Result<(), DriverError> {
        self.safe_write(PwmCommand::Set(percent))
    }

    fn fade(&mut self, target: f32, duration_secs: f32, steps: u32) -> Result<(), DriverError> {
        self.safe_write(PwmCommand::Fade { target, duration_secs, steps })
    }

    fn duty(&self) -> f32 {
        PwmDriver::duty(self)
    }

    fn set_duty_limits(&mut self, min: f32, max: f32) -> Result<(), DriverError> {
        PwmDriver::set_duty_limits(self, min, max)
    }
}

/// Angular actuator with named positions.
pub trait Positioner: Managed {
    fn move_to(&mut self, position: ServoPosition) -> Result<(), DriverError>;
    fn move_smooth(&mut self, angle: f32, duration_secs: f32) -> Result<(), DriverError>;
    fn angle(&self) -> f32;
    /// Band name of the current angle (`closed`, `half`, `custom`, ...).
    fn position_name(&self) -> &'static str;
}

impl<P, D> Positioner for Servo<P, D>
where
    P: SetDutyCycle + Send,
    D: DelayNs + Send,
{
    fn move_to(&mut self, position: ServoPosition) -> Result<(), DriverError> {
        self.safe_write(ServoCommand::Position(position))
    }

    fn move_smooth(&mut self, angle: f32, duration_secs: f32) -> Result<(), DriverError> {
        self.safe_write(ServoCommand::Smooth { angle, duration_secs })
    }

    fn angle(&self) -> f32 {
        Servo::angle(self)
    }

    fn position_name(&self) -> &'static str {
        self.position()
    }
}
