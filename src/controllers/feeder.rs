//! Airlock feeder.
//!
//! A feed is a three-phase sequence driven by [`FeederController::update`]:
//!
//! ```text
//!   start_feeding ──▶ Loading   servo at trap_entrance_open,   hold open_secs
//!                ──▶ Releasing servo at trap_entrance_closed, hold stabilization
//!                ──▶ Idle      servo at closed, feeding_stopped
//! ```
//!
//! `open_secs = clamp(quantity × open_secs_per_unit, 1, 10)`.
//!
//! Interlocks are checked in order before anything moves: a feed already
//! running, the daily ceiling, the minimum interval since the last feed,
//! and the gate not being closed.  Every `update` is also the watchdog
//! tick: a feed older than `max_feeding_duration_secs` is closed at once
//! and reported as `feeding_emergency_stop`.

use log::{debug, error, info, warn};
use serde::Serialize;

use super::{Controller, ControllerState, ensure_started, init_required};
use crate::app::events::{Event, FeedingReport};
use crate::app::ports::{EventSink, FeedingRecord};
use crate::clock::{CalendarDate, SharedClock};
use crate::config::FeederSettings;
use crate::drivers::Positioner;
use crate::drivers::servo::ServoPosition;
use crate::error::{ControllerError, FeedRefusal};
use crate::history::Ring;

pub const ACTION_CAPACITY: usize = 500;
pub const MIN_OPEN_SECS: f32 = 1.0;
pub const MAX_OPEN_SECS: f32 = 10.0;

/// Entrance hold time for a requested quantity.
pub fn open_secs_for(quantity: f32, secs_per_unit: f32) -> f32 {
    (quantity * secs_per_unit).clamp(MIN_OPEN_SECS, MAX_OPEN_SECS)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum FeedPhase {
    Idle,
    /// Entrance open, flies entering the airlock.
    Loading { until: f64 },
    /// Entrance closed, exit side open toward the enclosure.
    Releasing { until: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeederStep {
    EntranceOpened,
    ExitOpened,
    Closed,
    Completed,
    EmergencyClosed,
    Refused,
    ManualMove,
    Failed,
}

/// One entry of the feeder's action history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeederAction {
    pub step: FeederStep,
    pub position: &'static str,
    pub refusal: Option<FeedRefusal>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeederStatus {
    pub state: ControllerState,
    pub phase: FeedPhase,
    pub position: &'static str,
    pub daily_feeds: u32,
    pub max_daily_feeds: u32,
    pub total_feeds: u64,
    pub feeding_errors: u64,
    pub last_feed_at: Option<f64>,
}

struct ActiveFeed {
    started: f64,
    quantity: f32,
    open_secs: f32,
    stabilization_secs: f32,
}

pub struct FeederController {
    servo: Box<dyn Positioner>,
    settings: FeederSettings,
    clock: SharedClock,
    state: ControllerState,
    phase: FeedPhase,
    active: Option<ActiveFeed>,
    daily_feeds: u32,
    count_date: Option<CalendarDate>,
    last_feed_at: Option<f64>,
    total_feeds: u64,
    feeding_errors: u64,
    actions: Ring<FeederAction, ACTION_CAPACITY>,
}

impl FeederController {
    pub fn new(servo: Box<dyn Positioner>, settings: FeederSettings, clock: SharedClock) -> Self {
        Self {
            servo,
            settings,
            clock,
            state: ControllerState::Uninitialized,
            phase: FeedPhase::Idle,
            active: None,
            daily_feeds: 0,
            count_date: None,
            last_feed_at: None,
            total_feeds: 0,
            feeding_errors: 0,
            actions: Ring::new(),
        }
    }

    pub fn is_feeding(&self) -> bool {
        self.active.is_some()
    }

    pub fn phase(&self) -> FeedPhase {
        self.phase
    }

    pub fn daily_feeds(&self) -> u32 {
        self.daily_feeds
    }

    pub fn position(&self) -> &'static str {
        self.servo.position_name()
    }

    /// Begin a feed.  Nothing moves if an interlock refuses.
    pub fn start_feeding(
        &mut self,
        quantity: f32,
        stabilization_secs: f32,
        sink: &mut impl EventSink,
    ) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(ControllerError::InvalidArgument("feed quantity must be positive"));
        }
        if !(stabilization_secs.is_finite() && stabilization_secs >= 0.0) {
            return Err(ControllerError::InvalidArgument("stabilization delay must be non-negative"));
        }
        self.roll_day();
        if let Err(refusal) = self.interlocks() {
            warn!("feeder: feed refused: {refusal}");
            self.record(FeederStep::Refused, Some(refusal));
            return Err(refusal.into());
        }

        let now = self.clock.now();
        if let Err(e) = self.servo.move_to(ServoPosition::TrapEntranceOpen) {
            self.feeding_errors += 1;
            error!("feeder: failed to open entrance: {e}");
            self.record(FeederStep::Failed, None);
            self.close_best_effort();
            return Err(e.into());
        }

        let open_secs = open_secs_for(quantity, self.settings.open_secs_per_unit);
        self.active = Some(ActiveFeed {
            started: now,
            quantity,
            open_secs,
            stabilization_secs,
        });
        self.phase = FeedPhase::Loading {
            until: now + f64::from(open_secs),
        };
        self.daily_feeds += 1;
        self.total_feeds += 1;
        self.last_feed_at = Some(now);
        self.state = ControllerState::Running;
        self.record(FeederStep::EntranceOpened, None);
        info!(
            "feeder: feed {}/{} started, quantity {quantity}, entrance open {open_secs:.1}s",
            self.daily_feeds, self.settings.max_daily_feeds
        );
        sink.emit(&Event::FeedingStarted(self.report()));
        Ok(())
    }

    /// Watchdog tick, then advance the phase once its hold time is up.
    pub fn update(&mut self, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        self.roll_day();
        let now = self.clock.now();
        let Some((started, stab)) = self.active.as_ref().map(|f| (f.started, f.stabilization_secs)) else {
            return Ok(());
        };

        let elapsed = now - started;
        if elapsed > f64::from(self.settings.max_feeding_duration_secs) {
            error!(
                "feeder: feed running {elapsed:.1}s, over {:.0}s limit, emergency close",
                self.settings.max_feeding_duration_secs
            );
            self.emergency_close(sink);
            return Ok(());
        }

        match self.phase {
            FeedPhase::Loading { until } if now >= until => {
                let stab = f64::from(stab);
                if let Err(e) = self.servo.move_to(ServoPosition::TrapEntranceClosed) {
                    // Leave the phase alone; the watchdog closes the gate if this persists.
                    warn!("feeder: failed to flip airlock: {e}");
                    self.record(FeederStep::Failed, None);
                    return Err(e.into());
                }
                self.phase = FeedPhase::Releasing { until: now + stab };
                self.record(FeederStep::ExitOpened, None);
                debug!("feeder: airlock flipped, releasing for {stab:.1}s");
            }
            FeedPhase::Releasing { until } if now >= until => {
                if let Err(e) = self.servo.move_to(ServoPosition::Closed) {
                    warn!("feeder: failed to close after release: {e}");
                    self.record(FeederStep::Failed, None);
                    return Err(e.into());
                }
                self.record(FeederStep::Closed, None);
                let report = self.report();
                self.finish();
                self.record(FeederStep::Completed, None);
                info!("feeder: feed complete after {:.1}s", report.elapsed_secs);
                sink.emit(&Event::FeedingStopped(report));
            }
            _ => {}
        }
        Ok(())
    }

    /// Abort a running feed and close the gate.
    pub fn stop_feeding(&mut self, sink: &mut impl EventSink) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        if self.active.is_none() {
            return Ok(());
        }
        let report = self.report();
        self.servo.move_to(ServoPosition::Closed)?;
        self.finish();
        self.record(FeederStep::Closed, None);
        info!("feeder: feed stopped early");
        sink.emit(&Event::FeedingStopped(report));
        Ok(())
    }

    /// Emergency-stop path: close now and report, whatever the phase.
    pub fn emergency_close(&mut self, sink: &mut impl EventSink) {
        if self.active.is_none() {
            return;
        }
        let report = self.report();
        self.close_best_effort();
        self.finish();
        self.feeding_errors += 1;
        self.record(FeederStep::EmergencyClosed, None);
        sink.emit(&Event::FeedingEmergencyStop(report));
    }

    /// Manual gate move.  Refused while a feed runs.
    pub fn set_position(&mut self, position: ServoPosition) -> Result<(), ControllerError> {
        ensure_started(self.state)?;
        if self.active.is_some() {
            warn!("feeder: manual move to {position} refused during a feed");
            return Err(FeedRefusal::AlreadyFeeding.into());
        }
        self.servo.move_to(position)?;
        self.record(FeederStep::ManualMove, None);
        info!("feeder: moved to {position}");
        Ok(())
    }

    pub fn reset_daily_count(&mut self) {
        info!("feeder: daily count reset (was {})", self.daily_feeds);
        self.daily_feeds = 0;
        self.count_date = Some(self.clock.local_time().date);
    }

    /// Seed the counter from persisted state; a record from another day is ignored.
    pub fn restore(&mut self, record: &FeedingRecord) {
        let today = self.clock.local_time().date;
        if record.count_date == Some(today) {
            self.daily_feeds = record.daily_count;
            self.count_date = Some(today);
            info!("feeder: restored {} feeds for {today}", record.daily_count);
        }
    }

    /// Counter state to persist.
    pub fn daily_record(&self) -> (u32, Option<CalendarDate>) {
        (self.daily_feeds, self.count_date)
    }

    pub fn actions(&self, limit: Option<usize>) -> Vec<FeederAction> {
        self.actions.recent(limit)
    }

    pub fn status(&self) -> FeederStatus {
        FeederStatus {
            state: self.state,
            phase: self.phase,
            position: self.servo.position_name(),
            daily_feeds: self.daily_feeds,
            max_daily_feeds: self.settings.max_daily_feeds,
            total_feeds: self.total_feeds,
            feeding_errors: self.feeding_errors,
            last_feed_at: self.last_feed_at,
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn interlocks(&self) -> Result<(), FeedRefusal> {
        if self.active.is_some() {
            return Err(FeedRefusal::AlreadyFeeding);
        }
        if self.daily_feeds >= self.settings.max_daily_feeds {
            return Err(FeedRefusal::DailyLimitReached);
        }
        if let Some(last) = self.last_feed_at {
            if self.clock.now() - last < f64::from(self.settings.min_feeding_interval_secs) {
                return Err(FeedRefusal::IntervalNotElapsed);
            }
        }
        if self.servo.position_name() != ServoPosition::Closed.as_str() {
            return Err(FeedRefusal::NotClosed);
        }
        Ok(())
    }

    fn roll_day(&mut self) {
        let today = self.clock.local_time().date;
        match self.count_date {
            Some(d) if d == today => {}
            Some(d) => {
                info!("feeder: new day {today}, {} feeds on {d}", self.daily_feeds);
                self.daily_feeds = 0;
                self.count_date = Some(today);
            }
            None => self.count_date = Some(today),
        }
    }

    fn close_best_effort(&mut self) {
        if let Err(e) = self.servo.move_to(ServoPosition::Closed) {
            error!("feeder: failed to close gate: {e}");
        }
    }

    fn finish(&mut self) {
        self.active = None;
        self.phase = FeedPhase::Idle;
        if self.state == ControllerState::Running {
            self.state = ControllerState::Ready;
        }
    }

    fn report(&self) -> FeedingReport {
        let now = self.clock.now();
        FeedingReport {
            quantity: self.active.as_ref().map_or(0.0, |f| f.quantity),
            open_secs: self.active.as_ref().map_or(0.0, |f| f.open_secs),
            elapsed_secs: self.active.as_ref().map_or(0.0, |f| now - f.started),
            daily_feeds: self.daily_feeds,
            timestamp: now,
        }
    }

    fn record(&mut self, step: FeederStep, refusal: Option<FeedRefusal>) {
        self.actions.push(FeederAction {
            step,
            position: self.servo.position_name(),
            refusal,
            timestamp: self.clock.now(),
        });
    }
}

impl Controller for FeederController {
    fn initialize(&mut self) -> Result<(), ControllerError> {
        init_required("feeder", self.servo.as_mut())?;
        self.servo.move_to(ServoPosition::Closed)?;
        self.roll_day();
        self.state = ControllerState::Ready;
        info!(
            "feeder: ready, {}/day, {:.0}s apart, watchdog {:.0}s",
            self.settings.max_daily_feeds,
            self.settings.min_feeding_interval_secs,
            self.settings.max_feeding_duration_secs
        );
        Ok(())
    }

    fn cleanup(&mut self) {
        self.close_best_effort();
        self.finish();
        self.servo.shutdown();
        self.state = ControllerState::Uninitialized;
    }

    fn state(&self) -> ControllerState {
        self.state
    }
}
