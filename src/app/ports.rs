//! Port traits: the boundary between the control core and its collaborators.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ TerrariumService (domain)
//! ```
//!
//! Hardware sits behind the driver role traits in
//! [`drivers::roles`](crate::drivers::roles); the two ports here cover
//! what leaves the core: published events and the small amount of
//! feeding state that must survive a restart.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::events::Event;
use crate::clock::CalendarDate;

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → bus / logging)
// ───────────────────────────────────────────────────────────────

/// The core publishes [`Event`]s through this port.  Implementations
/// must not block: a slow consumer loses events rather than stalling
/// a control cycle.
pub trait EventSink {
    fn emit(&mut self, event: &Event);
}

// ───────────────────────────────────────────────────────────────
// Persistence port (driven adapter: domain ↔ storage)
// ───────────────────────────────────────────────────────────────

/// Feeding state carried across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeedingRecord {
    /// Day of the last scheduled feed (once-per-day guard).
    pub last_feeding_date: Option<CalendarDate>,
    /// Feeds counted on `count_date`.
    pub daily_count: u32,
    pub count_date: Option<CalendarDate>,
}

/// Loads and stores [`FeedingRecord`]s.  The encoding is the adapter's
/// business; the core never sees bytes.
pub trait PersistencePort {
    /// `Ok(None)` on first boot.
    fn load_feeding(&self) -> Result<Option<FeedingRecord>, PersistenceError>;

    fn save_feeding(&mut self, record: &FeedingRecord) -> Result<(), PersistenceError>;
}

/// Errors from [`PersistencePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceError {
    /// Stored record failed to decode.
    Corrupted,
    /// Backend refused the write.
    Full,
    /// Generic I/O error from the backend.
    Io,
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted => write!(f, "stored record corrupted"),
            Self::Full => write!(f, "storage full"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for PersistenceError {}

/// Fan-out: every event goes to both sinks, left first.
impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&mut self, event: &Event) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: &Event) {
        (**self).emit(event);
    }
}
