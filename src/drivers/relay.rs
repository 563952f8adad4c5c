//! Relay driver with switching guards.
//!
//! ## Safety contract
//!
//! - **Debounce**: a non-forced state change within `min_cycle_secs` of the
//!   previous one is refused with `InvalidCommand`.  Forced writes bypass it.
//! - **Max on-time**: `max_on_secs` is checked by [`Relay::enforce_max_on`],
//!   which the owning controller calls from its `update`.
//! - **Auto-off**: [`Relay::turn_on_for`] arms a [`TimerHandle`].  Any later
//!   state change, `cancel_auto_off`, cleanup or drop disarms it.
//!
//! Pin, state and counters sit behind one mutex shared with the timer
//! thread.  Every state change and cancel bumps an auto-off generation
//! under that mutex; an expiring timer only drives the pin when its
//! generation is still current, so a timer that wakes after a newer
//! command is a no-op.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use log::{debug, info, warn};
use serde::Serialize;

use super::timer::TimerHandle;
use super::{Driver, DriverConfig, DriverCore};
use crate::clock::SharedClock;
use crate::error::DriverError;

pub const DEFAULT_MIN_CYCLE_SECS: f64 = 0.1;
pub const DEFAULT_MAX_ON_SECS: f64 = 3600.0;
pub const MIN_CYCLE_FLOOR_SECS: f64 = 0.1;
pub const MAX_ON_FLOOR_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RelayCommand {
    /// Debounced state change.
    Set(bool),
    /// State change that ignores the debounce interval.
    Force(bool),
    /// Turn on, then off again after the given seconds.
    OnFor(f64),
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RelayState {
    pub on: bool,
    pub switch_count: u64,
    /// Seconds in the current on period, 0 when off.
    pub on_duration_secs: f64,
    pub auto_off_pending: bool,
}

struct Shared<P> {
    pin: P,
    on: bool,
    active_high: bool,
    last_switch: Option<f64>,
    on_since: Option<f64>,
    switch_count: u64,
    auto_off_gen: u64,
}

impl<P: OutputPin> Shared<P> {
    /// Debounced (unless `forced`) state change.  Returns whether the pin moved.
    fn apply(&mut self, on: bool, forced: bool, now: f64, min_cycle_secs: f64) -> Result<bool, DriverError> {
        if self.on == on {
            return Ok(false);
        }
        if !forced && self.last_switch.is_some_and(|last| now - last < min_cycle_secs) {
            return Err(DriverError::InvalidCommand);
        }
        self.drive(on, now)?;
        self.auto_off_gen += 1;
        Ok(true)
    }

    fn drive(&mut self, on: bool, now: f64) -> Result<(), DriverError> {
        let level_high = on == self.active_high;
        let res = if level_high { self.pin.set_high() } else { self.pin.set_low() };
        res.map_err(|_| DriverError::Hardware)?;
        if on != self.on {
            self.switch_count += 1;
            self.last_switch = Some(now);
        }
        self.on = on;
        self.on_since = if on { self.on_since.or(Some(now)) } else { None };
        Ok(())
    }
}

fn lock<P>(m: &Mutex<Shared<P>>) -> MutexGuard<'_, Shared<P>> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Relay<P, D> {
    core: DriverCore,
    shared: Arc<Mutex<Shared<P>>>,
    delay: D,
    min_cycle_secs: f64,
    max_on_secs: f64,
    auto_off: Option<TimerHandle>,
}

impl<P, D> Relay<P, D>
where
    P: OutputPin + Send + 'static,
    D: DelayNs,
{
    pub fn new(config: DriverConfig, pin: P, active_high: bool, delay: D, clock: SharedClock) -> Self {
        Self {
            core: DriverCore::new(config, clock),
            shared: Arc::new(Mutex::new(Shared {
                pin,
                on: false,
                active_high,
                last_switch: None,
                on_since: None,
                switch_count: 0,
                auto_off_gen: 0,
            })),
            delay,
            min_cycle_secs: DEFAULT_MIN_CYCLE_SECS,
            max_on_secs: DEFAULT_MAX_ON_SECS,
            auto_off: None,
        }
    }

    pub fn is_on(&self) -> bool {
        lock(&self.shared).on
    }

    pub fn switch_count(&self) -> u64 {
        lock(&self.shared).switch_count
    }

    /// Seconds in the current on period.
    pub fn on_duration(&self) -> f64 {
        let now = self.core.now();
        lock(&self.shared).on_since.map_or(0.0, |t| now - t)
    }

    pub fn cycle_limits(&self) -> (f64, f64) {
        (self.min_cycle_secs, self.max_on_secs)
    }

    /// `min_cycle` is floored at 0.1 s, `max_on` at 1 s.
    pub fn set_cycle_limits(&mut self, min_cycle_secs: f64, max_on_secs: f64) {
        self.min_cycle_secs = min_cycle_secs.max(MIN_CYCLE_FLOOR_SECS);
        self.max_on_secs = max_on_secs.max(MAX_ON_FLOOR_SECS);
    }

    pub fn snapshot(&self) -> RelayState {
        let now = self.core.now();
        let s = lock(&self.shared);
        RelayState {
            on: s.on,
            switch_count: s.switch_count,
            on_duration_secs: s.on_since.map_or(0.0, |t| now - t),
            auto_off_pending: self.auto_off.as_ref().is_some_and(TimerHandle::is_pending),
        }
    }

    pub fn turn_on(&mut self) -> Result<(), DriverError> {
        self.set_state(true, false)
    }

    pub fn turn_off(&mut self) -> Result<(), DriverError> {
        self.set_state(false, false)
    }

    pub fn force(&mut self, on: bool) -> Result<(), DriverError> {
        self.set_state(on, true)
    }

    pub fn toggle(&mut self) -> Result<(), DriverError> {
        let on = self.is_on();
        self.set_state(!on, false)
    }

    /// Turn on now and schedule a forced off `secs` from now.
    pub fn turn_on_for(&mut self, secs: f64) -> Result<(), DriverError> {
        if !(secs.is_finite() && secs > 0.0) {
            return Err(DriverError::InvalidCommand);
        }
        self.turn_on()?;
        self.cancel_auto_off();
        let generation = lock(&self.shared).auto_off_gen;

        let shared = Arc::clone(&self.shared);
        let clock = Arc::clone(self.core.clock());
        let name = self.core.name().to_owned();
        let timer = TimerHandle::schedule(
            &format!("{name}-auto-off"),
            Duration::from_secs_f64(secs),
            move || {
                let mut s = lock(&shared);
                if s.auto_off_gen != generation {
                    debug!("relay {name}: stale auto-off ignored");
                    return;
                }
                match s.drive(false, clock.now()) {
                    Ok(()) => info!("relay {name}: auto-off"),
                    Err(e) => warn!("relay {name}: auto-off failed: {e}"),
                }
            },
        )
        .map_err(|_| DriverError::Unavailable)?;
        self.auto_off = Some(timer);
        debug!("relay {}: auto-off in {secs}s", self.core.name());
        Ok(())
    }

    pub fn cancel_auto_off(&mut self) {
        lock(&self.shared).auto_off_gen += 1;
        self.disarm_timer();
    }

    fn disarm_timer(&mut self) {
        if let Some(mut t) = self.auto_off.take() {
            t.cancel();
        }
    }

    /// Force the relay off if it has been on longer than `max_on_secs`.
    /// Returns whether it tripped.
    pub fn enforce_max_on(&mut self) -> Result<bool, DriverError> {
        if self.is_on() && self.on_duration() > self.max_on_secs {
            warn!(
                "relay {}: on for {:.0}s, over the {:.0}s limit, forcing off",
                self.core.name(),
                self.on_duration(),
                self.max_on_secs
            );
            self.force(false)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn set_state(&mut self, on: bool, forced: bool) -> Result<(), DriverError> {
        self.core.ensure_operable()?;
        let now = self.core.now();
        let changed = lock(&self.shared).apply(on, forced, now, self.min_cycle_secs);
        match changed {
            Ok(false) => return Ok(()),
            Ok(true) => {}
            Err(DriverError::InvalidCommand) => {
                debug!("relay {}: switch refused inside the {}s cycle", self.core.name(), self.min_cycle_secs);
                return Err(DriverError::InvalidCommand);
            }
            Err(e) => return Err(e),
        }
        // The generation already moved under the lock; this only stops the thread.
        self.disarm_timer();
        debug!("relay {}: {}", self.core.name(), if on { "on" } else { "off" });
        Ok(())
    }
}

impl<P, D> Driver for Relay<P, D>
where
    P: OutputPin + Send + 'static,
    D: DelayNs,
{
    type Reading = RelayState;
    type Command = RelayCommand;

    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }

    fn initialize(&mut self) -> Result<(), DriverError> {
        self.core.begin_init()?;
        let now = self.core.now();
        let res = {
            let mut s = lock(&self.shared);
            // Drive the inactive level without counting it as a switch.
            let was = s.on;
            let r = s.drive(false, now);
            if !was {
                s.last_switch = None;
            }
            r
        };
        self.core.finish_init(res)
    }

    fn read(&mut self) -> Result<RelayState, DriverError> {
        self.core.ensure_operable()?;
        Ok(self.snapshot())
    }

    fn write(&mut self, command: RelayCommand) -> Result<(), DriverError> {
        match command {
            RelayCommand::Set(on) => self.set_state(on, false),
            RelayCommand::Force(on) => self.set_state(on, true),
            RelayCommand::OnFor(secs) => self.turn_on_for(secs),
            RelayCommand::Toggle => self.toggle(),
        }
    }

    fn cleanup(&mut self) {
        self.cancel_auto_off();
        let now = self.core.now();
        if let Err(e) = lock(&self.shared).drive(false, now) {
            warn!("relay {}: failed to release on cleanup: {e}", self.core.name());
        }
        self.core.shut_down();
    }

    fn retry_pause(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}
