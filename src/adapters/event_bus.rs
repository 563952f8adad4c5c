//! Bounded event bus.
//!
//! A fixed-depth `embassy-sync` channel between the control core and its
//! consumers (persistence, notification, UI).  The core publishes through
//! a [`BusPublisher`], which implements [`EventSink`] with `try_send`:
//! when the queue is full the event is dropped and counted, so a slow
//! consumer never stalls a control cycle.
//!
//! ```text
//! ┌──────────────┐   Event    ┌──────────────┐
//! │ Control core │──────────▶│  Consumers    │
//! │  (sync)      │ try_send   │ try_receive   │
//! └──────────────┘            └──────────────┘
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use log::warn;

use crate::app::events::Event;
use crate::app::ports::EventSink;

/// Channel depth of the shared bus.
pub const BUS_DEPTH: usize = 32;

/// Process-wide bus for binaries that wire a single core.
pub static EVENT_BUS: EventBus<BUS_DEPTH> = EventBus::new();

pub struct EventBus<const N: usize> {
    channel: Channel<CriticalSectionRawMutex, Event, N>,
    dropped: AtomicU32,
}

impl<const N: usize> Default for EventBus<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EventBus<N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Sink handle for the control core.
    pub fn publisher(&self) -> BusPublisher<'_, N> {
        BusPublisher { bus: self }
    }

    /// Next queued event, if any.
    pub fn try_next(&self) -> Option<Event> {
        self.channel.try_receive().ok()
    }

    /// Everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        core::iter::from_fn(|| self.try_next()).collect()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Events lost to a full queue since startup.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// [`EventSink`] that publishes onto an [`EventBus`].
pub struct BusPublisher<'a, const N: usize> {
    bus: &'a EventBus<N>,
}

impl<const N: usize> EventSink for BusPublisher<'_, N> {
    fn emit(&mut self, event: &Event) {
        if let Err(TrySendError::Full(ev)) = self.bus.channel.try_send(event.clone()) {
            let n = self.bus.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("bus: queue full, dropped {} ({n} total)", ev.topic());
        }
    }
}

/// Wire form of an event: `{"topic": ..., "payload": ...}`.
pub fn to_json(event: &Event) -> anyhow::Result<String> {
    serde_json::to_string(event).with_context(|| format!("serializing {} event", event.topic()))
}
