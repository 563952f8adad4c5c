//! Hobby servo on a 50 Hz PWM channel.
//!
//! Angle maps linearly onto pulse width between `min_pulse_ms` (0°) and
//! `max_pulse_ms` (180°); the pulse is then expressed as duty of the
//! 20 ms period.  The feeder airlock uses the `trap_entrance_*` pair.

use core::fmt;
use core::str::FromStr;

use embedded_hal::delay::DelayNs;
use embedded_hal::pwm::SetDutyCycle;
use log::{debug, info, warn};
use serde::Serialize;

use super::{Driver, DriverConfig, DriverCore};
use crate::clock::SharedClock;
use crate::error::DriverError;

pub const PERIOD_MS: f32 = 20.0;
pub const MIN_ANGLE: f32 = 0.0;
pub const MAX_ANGLE: f32 = 180.0;
pub const DEFAULT_MIN_PULSE_MS: f32 = 1.0;
pub const DEFAULT_MAX_PULSE_MS: f32 = 2.0;
pub const PULSE_LIMIT_MS: (f32, f32) = (0.5, 2.5);
pub const SMOOTH_STEPS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServoPosition {
    Closed,
    Open,
    Half,
    Center,
    TrapEntranceOpen,
    TrapEntranceClosed,
}

impl ServoPosition {
    pub fn angle(self) -> f32 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 90.0,
            Self::Half => 45.0,
            Self::Center => 90.0,
            Self::TrapEntranceOpen => 0.0,
            Self::TrapEntranceClosed => 90.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::Half => "half",
            Self::Center => "center",
            Self::TrapEntranceOpen => "trap_entrance_open",
            Self::TrapEntranceClosed => "trap_entrance_closed",
        }
    }
}

impl fmt::Display for ServoPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServoPosition {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, DriverError> {
        Ok(match s {
            "closed" => Self::Closed,
            "open" => Self::Open,
            "half" => Self::Half,
            "center" => Self::Center,
            "trap_entrance_open" => Self::TrapEntranceOpen,
            "trap_entrance_closed" => Self::TrapEntranceClosed,
            _ => return Err(DriverError::InvalidCommand),
        })
    }
}

/// Coarse name for an arbitrary angle.
pub fn angle_to_position(angle: f32) -> &'static str {
    match angle {
        a if a <= 10.0 => "closed",
        a if a >= 170.0 => "open",
        a if (40.0..=50.0).contains(&a) => "half",
        a if (85.0..=95.0).contains(&a) => "center",
        _ => "custom",
    }
}

pub fn angle_to_pulse_ms(angle: f32, min_pulse: f32, max_pulse: f32) -> f32 {
    let t = (angle - MIN_ANGLE) / (MAX_ANGLE - MIN_ANGLE);
    min_pulse + t * (max_pulse - min_pulse)
}

pub fn pulse_ms_to_angle(pulse: f32, min_pulse: f32, max_pulse: f32) -> f32 {
    let t = (pulse - min_pulse) / (max_pulse - min_pulse);
    MIN_ANGLE + t * (MAX_ANGLE - MIN_ANGLE)
}

pub fn pulse_to_duty_percent(pulse_ms: f32) -> f32 {
    pulse_ms / PERIOD_MS * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServoCommand {
    Angle(f32),
    Position(ServoPosition),
    /// Interpolate to `angle` in 20 steps over `duration_secs`.
    Smooth { angle: f32, duration_secs: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ServoState {
    pub angle: f32,
    pub pulse_ms: f32,
    pub position: &'static str,
}

pub struct Servo<P, D> {
    core: DriverCore,
    channel: P,
    delay: D,
    angle: f32,
    min_pulse_ms: f32,
    max_pulse_ms: f32,
}

impl<P: SetDutyCycle, D: DelayNs> Servo<P, D> {
    pub fn new(config: DriverConfig, channel: P, delay: D, clock: SharedClock) -> Self {
        Self {
            core: DriverCore::new(config, clock),
            channel,
            delay,
            angle: 0.0,
            min_pulse_ms: DEFAULT_MIN_PULSE_MS,
            max_pulse_ms: DEFAULT_MAX_PULSE_MS,
        }
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn position(&self) -> &'static str {
        angle_to_position(self.angle)
    }

    pub fn pulse_limits(&self) -> (f32, f32) {
        (self.min_pulse_ms, self.max_pulse_ms)
    }

    /// Both ends are clamped to 0.5–2.5 ms; `min` must stay below `max`.
    pub fn set_pulse_limits(&mut self, min_ms: f32, max_ms: f32) -> Result<(), DriverError> {
        let lo = min_ms.clamp(PULSE_LIMIT_MS.0, PULSE_LIMIT_MS.1);
        let hi = max_ms.clamp(PULSE_LIMIT_MS.0, PULSE_LIMIT_MS.1);
        if lo >= hi {
            return Err(DriverError::InvalidCommand);
        }
        self.min_pulse_ms = lo;
        self.max_pulse_ms = hi;
        info!("{}: pulse limits {lo:.2}-{hi:.2} ms", self.core.name());
        Ok(())
    }

    pub fn set_angle(&mut self, angle: f32) -> Result<(), DriverError> {
        self.core.ensure_operable()?;
        if !(MIN_ANGLE..=MAX_ANGLE).contains(&angle) {
            return Err(DriverError::InvalidCommand);
        }
        self.drive(angle)
    }

    pub fn move_to(&mut self, position: ServoPosition) -> Result<(), DriverError> {
        debug!("{}: -> {position}", self.core.name());
        self.set_angle(position.angle())
    }

    /// Named move, for command surfaces that carry the position as text.
    pub fn move_to_position(&mut self, name: &str) -> Result<(), DriverError> {
        self.move_to(name.parse()?)
    }

    pub fn move_smooth(&mut self, target: f32, duration_secs: f32) -> Result<(), DriverError> {
        self.core.ensure_operable()?;
        if !(MIN_ANGLE..=MAX_ANGLE).contains(&target) || duration_secs.is_nan() || duration_secs < 0.0 {
            return Err(DriverError::InvalidCommand);
        }
        let start = self.angle;
        let step_ms = (duration_secs * 1000.0 / SMOOTH_STEPS as f32) as u32;
        for i in 1..=SMOOTH_STEPS {
            let a = if i == SMOOTH_STEPS {
                target
            } else {
                start + (target - start) * i as f32 / SMOOTH_STEPS as f32
            };
            self.drive(a)?;
            self.delay.delay_ms(step_ms);
        }
        Ok(())
    }

    fn drive(&mut self, angle: f32) -> Result<(), DriverError> {
        let pulse = angle_to_pulse_ms(angle, self.min_pulse_ms, self.max_pulse_ms);
        let duty = pulse_to_duty_percent(pulse);
        let max = self.channel.max_duty_cycle();
        let raw = (duty / 100.0 * f32::from(max)).round() as u16;
        self.channel
            .set_duty_cycle(raw.min(max))
            .map_err(|_| DriverError::Hardware)?;
        self.angle = angle;
        Ok(())
    }

    pub fn snapshot(&self) -> ServoState {
        ServoState {
            angle: self.angle,
            pulse_ms: angle_to_pulse_ms(self.angle, self.min_pulse_ms, self.max_pulse_ms),
            position: self.position(),
        }
    }
}

impl<P: SetDutyCycle, D: DelayNs> Driver for Servo<P, D> {
    type Reading = ServoState;
    type Command = ServoCommand;

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }

    fn initialize(&mut self) -> Result<(), DriverError> {
        self.core.begin_init()?;
        let home = self.drive(ServoPosition::Closed.angle());
        self.core.finish_init(home)
    }

    fn read(&mut self) -> Result<ServoState, DriverError> {
        self.core.ensure_operable()?;
        Ok(self.snapshot())
    }

    fn write(&mut self, command: ServoCommand) -> Result<(), DriverError> {
        match command {
            ServoCommand::Angle(a) => self.set_angle(a),
            ServoCommand::Position(p) => self.move_to(p),
            ServoCommand::Smooth { angle, duration_secs } => self.move_smooth(angle, duration_secs),
        }
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.drive(ServoPosition::Closed.angle()) {
            warn!("{}: failed to close on cleanup: {e}", self.core.name());
        }
        self.core.shut_down();
    }

    fn retry_pause(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, SimClock};
    use core::convert::Infallible;
    use embedded_hal::pwm::ErrorType;

    #[derive(Default)]
    struct Channel(Vec<u16>);

    impl ErrorType for Channel {
        type Error = Infallible;
    }

    impl SetDutyCycle for Channel {
        fn max_duty_cycle(&self) -> u16 {
            10_000
        }
        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Infallible> {
            self.0.push(duty);
            Ok(())
        }
    }

    fn servo() -> (Servo<Channel, SimClock>, SimClock) {
        let clock = SimClock::new();
        let mut s = Servo::new(DriverConfig::new("trap"), Channel::default(), clock.clone(), clock.shared());
        s.initialize().unwrap();
        (s, clock)
    }

    #[test]
    fn angle_maps_to_duty_of_20ms_period() {
        let (mut s, _clock) = servo();
        // 0° -> 1.0 ms -> 5 %.
        assert_eq!(s.channel.0, vec![500]);
        s.set_angle(180.0).unwrap();
        // 2.0 ms -> 10 %.
        assert_eq!(s.channel.0.last(), Some(&1000));
        s.set_angle(90.0).unwrap();
        assert_eq!(s.channel.0.last(), Some(&750));
    }

    #[test]
    fn out_of_range_angle_rejected() {
        let (mut s, _clock) = servo();
        assert_eq!(s.set_angle(181.0), Err(DriverError::InvalidCommand));
        assert_eq!(s.set_angle(-1.0), Err(DriverError::InvalidCommand));
        assert_eq!(s.angle(), 0.0);
    }

    #[test]
    fn named_positions_and_bands() {
        let (mut s, _clock) = servo();
        s.move_to_position("half").unwrap();
        assert_eq!(s.angle(), 45.0);
        assert_eq!(s.position(), "half");
        assert_eq!(s.move_to_position("sideways"), Err(DriverError::InvalidCommand));
        assert_eq!(angle_to_position(5.0), "closed");
        assert_eq!(angle_to_position(175.0), "open");
        assert_eq!(angle_to_position(92.0), "center");
        assert_eq!(angle_to_position(120.0), "custom");
    }

    #[test]
    fn smooth_move_takes_twenty_steps_and_lands_exactly() {
        let (mut s, clock) = servo();
        let writes = s.channel.0.len();
        let t0 = clock.now();
        s.move_smooth(137.3, 2.0).unwrap();
        assert_eq!(s.channel.0.len() - writes, SMOOTH_STEPS as usize);
        assert_eq!(s.angle(), 137.3);
        assert!((clock.now() - t0 - 2.0).abs() < 1e-6);
    }

    #[test]
    fn pulse_limits_clamped() {
        let (mut s, _clock) = servo();
        s.set_pulse_limits(0.1, 3.0).unwrap();
        assert_eq!(s.pulse_limits(), (0.5, 2.5));
        assert_eq!(s.set_pulse_limits(2.0, 1.0), Err(DriverError::InvalidCommand));
    }

    #[test]
    fn pulse_round_trip() {
        for a in [0.0f32, 12.5, 90.0, 179.9, 180.0] {
            let back = pulse_ms_to_angle(angle_to_pulse_ms(a, 1.0, 2.0), 1.0, 2.0);
            assert!((back - a).abs() < 1e-3);
        }
    }
}
