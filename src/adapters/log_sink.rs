//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing one `info!` line per event to the
//! `log` facade.  Whatever logger the embedding binary installs decides
//! where the lines end up.

use log::info;

use crate::app::events::{ActionValue, Actuation, Event, FeedingReport};
use crate::app::ports::EventSink;

fn fmt_opt(v: Option<f32>) -> String {
    v.map_or_else(|| "--".into(), |v| format!("{v:.1}"))
}

fn actuation(tag: &str, a: &Actuation) -> String {
    format!(
        "{tag} | {} | value={} target={:.1}",
        a.reason,
        fmt_opt(a.value),
        a.target
    )
}

fn feeding(tag: &str, r: &FeedingReport) -> String {
    format!(
        "{tag} | qty={:.0} open={:.1}s elapsed={:.1}s today={}",
        r.quantity, r.open_secs, r.elapsed_secs, r.daily_feeds
    )
}

/// Adapter that logs every [`Event`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &Event) {
        match event {
            Event::SensorData(s) => {
                info!(
                    "SENSE | T={}\u{00b0}C RH={}% AQI={} water={}%",
                    fmt_opt(s.temperature),
                    fmt_opt(s.humidity),
                    fmt_opt(s.air_quality),
                    fmt_opt(s.water_level),
                );
            }
            Event::Alert(a) => {
                info!(
                    "ALERT | #{} {} | {} (value={:.1}, threshold={:.1})",
                    a.id,
                    a.kind.as_str(),
                    a.message,
                    a.value,
                    a.threshold
                );
            }
            Event::ActuatorAction(rec) => {
                let value = match rec.value {
                    ActionValue::Switch(on) => if on { "on" } else { "off" }.to_string(),
                    ActionValue::Level(l) => format!("{l:.0}%"),
                    ActionValue::Position(p) => p.to_string(),
                };
                info!("ACT   | {:?} -> {value}", rec.actuator);
            }
            Event::HeaterStarted(a) => info!("{}", actuation("HEAT  | on", a)),
            Event::HeaterStopped(a) => info!("{}", actuation("HEAT  | off", a)),
            Event::HeaterEmergencyStop(a) => info!("{}", actuation("HEAT  | EMERGENCY", a)),
            Event::HumidificationStarted(a) => info!("{}", actuation("HUMID | on", a)),
            Event::HumidificationStopped(a) => info!("{}", actuation("HUMID | off", a)),
            Event::HumidificationEmergencyStop(a) => info!("{}", actuation("HUMID | EMERGENCY", a)),
            Event::FanSpeedChanged { target, speed, .. } => {
                info!("FAN   | target={target:.0}% now={speed:.0}%");
            }
            Event::FeedingStarted(r) => info!("{}", feeding("FEED  | start", r)),
            Event::FeedingStopped(r) => info!("{}", feeding("FEED  | done", r)),
            Event::FeedingEmergencyStop(r) => info!("{}", feeding("FEED  | EMERGENCY", r)),
            Event::ModeChanged { from, to, .. } => info!("MODE  | {from} -> {to}"),
            Event::EmergencyStop { .. } => info!("ESTOP | engaged"),
            Event::EmergencyResumed { .. } => info!("ESTOP | released"),
            Event::SafetyFault { faults, .. } => info!("FAULT | flags=0b{faults:08b}"),
            Event::SafetyCleared { .. } => info!("FAULT | all cleared"),
        }
    }
}
