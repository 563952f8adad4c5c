//! Time source port.
//!
//! Controllers never call `Instant::now()` directly; they hold a
//! [`SharedClock`] so every interval check (debounce, cache window,
//! alert dedup, feeding interval, watchdog) can be driven from a
//! simulated clock in tests.
//!
//! - [`SystemClock`]: monotonic seconds from `std::time::Instant`, wall
//!   time from `chrono::Utc::now()` shifted by a fixed UTC offset.
//! - [`SimClock`]: shared atomic microsecond counter on top of a local
//!   `NaiveDateTime` epoch.  Implements `DelayNs`, so every driver delay
//!   advances simulated time instead of sleeping.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, Timelike, Utc};
use embedded_hal::delay::DelayNs;

/// Monotonic time plus local calendar time.
pub trait Clock: Send + Sync {
    /// Seconds since the clock was created (monotonic).
    fn now(&self) -> f64;

    /// Local calendar date and hour-of-day.
    fn local_time(&self) -> LocalTime;
}

/// Clock handle shared by every driver and controller.
pub type SharedClock = Arc<dyn Clock>;

// ---------------------------------------------------------------------------
// Calendar types
// ---------------------------------------------------------------------------

/// Local calendar day.  Serialises as `YYYY-MM-DD` through chrono's serde support.
pub type CalendarDate = NaiveDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub date: CalendarDate,
    /// Hour of day, 0–23.
    pub hour: u8,
}

impl LocalTime {
    pub fn from_naive(local: NaiveDateTime) -> Self {
        Self {
            date: local.date(),
            hour: local.hour() as u8,
        }
    }
}

// ---------------------------------------------------------------------------
// System clock
// ---------------------------------------------------------------------------

pub struct SystemClock {
    start: Instant,
    offset: FixedOffset,
}

impl SystemClock {
    /// Offsets outside chrono's ±24 h range fall back to UTC.
    pub fn new(utc_offset_hours: i8) -> Self {
        let offset = FixedOffset::east_opt(i32::from(utc_offset_hours) * 3600).unwrap_or(Utc.fix());
        Self {
            start: Instant::now(),
            offset,
        }
    }

    pub fn shared(utc_offset_hours: i8) -> SharedClock {
        Arc::new(Self::new(utc_offset_hours))
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn local_time(&self) -> LocalTime {
        LocalTime::from_naive(Utc::now().with_timezone(&self.offset).naive_local())
    }
}

// ---------------------------------------------------------------------------
// Simulated clock
// ---------------------------------------------------------------------------

/// Deterministic clock for simulation and tests.
///
/// Clones share the same counter, so a `SimClock` handed to a driver as
/// its delay and to a controller as its clock stay in lock-step.
#[derive(Clone)]
pub struct SimClock {
    micros: Arc<AtomicU64>,
    /// Local wall time at `now() == 0`.
    local_epoch: NaiveDateTime,
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimClock {
    /// Starts at 2024-01-01 12:00 local time.
    pub fn new() -> Self {
        Self::starting_at(1_704_110_400)
    }

    /// Start at an arbitrary local unix timestamp.  Out-of-range values
    /// start at 1970-01-01 00:00.
    pub fn starting_at(local_unix: i64) -> Self {
        let epoch = DateTime::from_timestamp(local_unix, 0).map(|t| t.naive_utc()).unwrap_or_default();
        Self::starting_at_local(epoch)
    }

    pub fn starting_at_local(local_epoch: NaiveDateTime) -> Self {
        Self {
            micros: Arc::new(AtomicU64::new(0)),
            local_epoch,
        }
    }

    fn local_now(&self) -> NaiveDateTime {
        let elapsed = TimeDelta::microseconds(self.micros.load(Ordering::SeqCst) as i64);
        self.local_epoch + elapsed
    }

    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }

    pub fn advance_secs(&self, secs: f64) {
        self.advance_micros((secs * 1_000_000.0) as u64);
    }

    pub fn advance_micros(&self, us: u64) {
        self.micros.fetch_add(us, Ordering::SeqCst);
    }

    /// Jump forward to the next occurrence of `hour:00` local time.
    pub fn advance_to_hour(&self, hour: u8) {
        let Some(at) = NaiveTime::from_hms_opt(u32::from(hour), 0, 0) else {
            return;
        };
        let now = self.local_now();
        let mut target = now.date().and_time(at);
        if target <= now {
            target += TimeDelta::days(1);
        }
        if let Some(us) = (target - now).num_microseconds() {
            self.advance_micros(us as u64);
        }
    }
}

impl Clock for SimClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }

    fn local_time(&self) -> LocalTime {
        LocalTime::from_naive(self.local_now())
    }
}

impl DelayNs for SimClock {
    fn delay_ns(&mut self, ns: u32) {
        self.advance_micros(u64::from(ns.div_ceil(1000)));
    }

    fn delay_us(&mut self, us: u32) {
        self.advance_micros(u64::from(us));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance_micros(u64::from(ms) * 1000);
    }
}
