//! Simulated hardware for integration tests.
//!
//! Real drivers run on top of these: relay pins record every level they
//! were driven to, PWM channels remember their last duty, and the DHT22
//! bus replays whatever climate the test dialled in through a
//! [`ClimateSource`].  Everything shares one [`SimClock`].

use core::convert::Infallible;
use std::sync::{Arc, Mutex};

use embedded_hal::digital::{self, OutputPin};
use embedded_hal::pwm::{self, SetDutyCycle};

use terrarium::adapters::memory_store::MemoryStore;
use terrarium::app::events::Event;
use terrarium::app::ports::EventSink;
use terrarium::app::service::{Hardware, TerrariumService};
use terrarium::clock::SimClock;
use terrarium::config::TerrariumConfig;
use terrarium::drivers::DriverConfig;
use terrarium::drivers::dht22::{Dht22, Dht22Bus, FRAME_BITS, checksum};
use terrarium::drivers::pwm::PwmDriver;
use terrarium::drivers::relay::Relay;
use terrarium::drivers::servo::Servo;
use terrarium::error::DriverError;

// ── Relay pin ─────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingPin {
    levels: Arc<Mutex<Vec<bool>>>,
}

#[allow(dead_code)]
impl RecordingPin {
    pub fn history(&self) -> Vec<bool> {
        self.levels.lock().unwrap().clone()
    }

    pub fn is_high(&self) -> bool {
        self.levels.lock().unwrap().last().copied().unwrap_or(false)
    }
}

impl digital::ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.levels.lock().unwrap().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.levels.lock().unwrap().push(true);
        Ok(())
    }
}

// ── PWM channel ───────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingPwm {
    duty: Arc<Mutex<u16>>,
}

#[allow(dead_code)]
impl RecordingPwm {
    pub const MAX_DUTY: u16 = 1000;

    pub fn duty(&self) -> u16 {
        *self.duty.lock().unwrap()
    }
}

impl pwm::ErrorType for RecordingPwm {
    type Error = Infallible;
}

impl SetDutyCycle for RecordingPwm {
    fn max_duty_cycle(&self) -> u16 {
        Self::MAX_DUTY
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Infallible> {
        *self.duty.lock().unwrap() = duty;
        Ok(())
    }
}

// ── DHT22 ─────────────────────────────────────────────────────

/// Test-side handle on the simulated climate.  `None` means the sensor
/// stops answering.
#[derive(Clone, Default)]
pub struct ClimateSource {
    reading: Arc<Mutex<Option<(f32, f32)>>>,
}

#[allow(dead_code)]
impl ClimateSource {
    pub fn set(&self, temperature: f32, humidity: f32) {
        *self.reading.lock().unwrap() = Some((temperature, humidity));
    }

    pub fn disconnect(&self) {
        *self.reading.lock().unwrap() = None;
    }
}

/// Encode a reading the way the sensor puts it on the wire.
pub fn encode_frame(temperature: f32, humidity: f32) -> [u8; 5] {
    let h = (humidity * 10.0).round() as u16;
    let mut t = (temperature.abs() * 10.0).round() as u16 & 0x7FFF;
    if temperature < 0.0 {
        t |= 0x8000;
    }
    let [h0, h1] = h.to_be_bytes();
    let [t0, t1] = t.to_be_bytes();
    [h0, h1, t0, t1, checksum(&[h0, h1, t0, t1])]
}

pub struct ScriptedDhtBus {
    source: ClimateSource,
    frame: Option<[u8; 5]>,
    bit: usize,
}

impl ScriptedDhtBus {
    pub fn new(source: ClimateSource) -> Self {
        Self {
            source,
            frame: None,
            bit: 0,
        }
    }
}

impl Dht22Bus for ScriptedDhtBus {
    fn start_signal(&mut self, _low_ms: u32) -> Result<(), DriverError> {
        self.frame = self.source.reading.lock().unwrap().map(|(t, h)| encode_frame(t, h));
        self.bit = 0;
        Ok(())
    }

    fn await_ack(&mut self, _timeout_us: u32) -> Result<(), DriverError> {
        self.frame.map(|_| ()).ok_or(DriverError::Timeout)
    }

    fn high_pulse_us(&mut self, _timeout_us: u32) -> Result<u32, DriverError> {
        let frame = self.frame.ok_or(DriverError::Timeout)?;
        if self.bit >= FRAME_BITS {
            return Err(DriverError::Timeout);
        }
        let set = frame[self.bit / 8] & (0x80 >> (self.bit % 8)) != 0;
        self.bit += 1;
        Ok(if set { 70 } else { 26 })
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<Event>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn topics(&self) -> Vec<&'static str> {
        self.events.iter().map(Event::topic).collect()
    }

    /// Topics starting with `prefix`, in emission order.
    pub fn topics_with(&self, prefix: &str) -> Vec<&'static str> {
        self.topics().into_iter().filter(|t| t.starts_with(prefix)).collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.topics().iter().filter(|t| **t == topic).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &Event) {
        self.events.push(event.clone());
    }
}

// ── Rig ───────────────────────────────────────────────────────

/// One simulated terrarium.  [`Rig::service`] can be called again to
/// model a restart against the same hardware and storage.
#[derive(Clone, Default)]
pub struct Rig {
    pub clock: SimClock,
    pub climate: ClimateSource,
    pub heater: RecordingPin,
    pub humidifier: RecordingPin,
    pub fan: RecordingPwm,
    pub led: RecordingPwm,
    pub feeder: RecordingPwm,
    pub store: MemoryStore,
}

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hardware(&self) -> Hardware {
        let c = &self.clock;
        Hardware {
            climate: Some(Box::new(Dht22::new(
                DriverConfig::new("dht22").with_retries(2, 10),
                ScriptedDhtBus::new(self.climate.clone()),
                c.clone(),
                c.shared(),
            ))),
            air_quality: None,
            water_level: None,
            heater: Box::new(Relay::new(
                DriverConfig::new("heater"),
                self.heater.clone(),
                true,
                c.clone(),
                c.shared(),
            )),
            humidifier: Box::new(Relay::new(
                DriverConfig::new("humidifier"),
                self.humidifier.clone(),
                true,
                c.clone(),
                c.shared(),
            )),
            mister: None,
            fan: Box::new(PwmDriver::new(DriverConfig::new("fan"), self.fan.clone(), c.clone(), c.shared())),
            led: Box::new(PwmDriver::new(DriverConfig::new("led"), self.led.clone(), c.clone(), c.shared())),
            feeder: Box::new(Servo::new(DriverConfig::new("feeder"), self.feeder.clone(), c.clone(), c.shared())),
        }
    }

    /// Build and initialize a service on this rig.
    pub fn service(&self, config: TerrariumConfig) -> TerrariumService {
        let mut svc = TerrariumService::new(config, self.hardware(), Box::new(self.store.clone()), self.clock.shared())
            .expect("valid config");
        svc.initialize().expect("all controllers start");
        svc
    }

    /// Advance simulated time, then run one cycle.
    pub fn step(&self, svc: &mut TerrariumService, secs: f64, sink: &mut RecordingSink) {
        self.clock.advance_secs(secs);
        svc.tick(sink).expect("cycle runs");
    }
}
