//! Service events flowing through the bounded bus and the log adapter.

use terrarium::adapters::event_bus::{EventBus, to_json};
use terrarium::adapters::log_sink::LogEventSink;
use terrarium::config::TerrariumConfig;

use crate::mock_hw::{RecordingSink, Rig};

#[test]
fn cycle_events_reach_the_bus_in_order() {
    let rig = Rig::new();
    rig.climate.set(18.0, 60.0);
    let mut svc = rig.service(TerrariumConfig::default());
    let bus: EventBus<64> = EventBus::new();

    let mut sink = (bus.publisher(), LogEventSink::new());
    svc.tick(&mut sink).unwrap();

    let topics: Vec<_> = bus.drain().iter().map(|e| e.topic()).collect();
    assert_eq!(topics.first(), Some(&"sensor_data"));
    let started = topics.iter().position(|t| *t == "heater_started").unwrap();
    let action = topics.iter().rposition(|t| *t == "actuator_action").unwrap();
    assert!(started < action, "actuator_action follows the decision: {topics:?}");
    assert_eq!(bus.dropped(), 0);
}

#[test]
fn slow_consumer_loses_events_without_stalling_the_cycle() {
    let rig = Rig::new();
    rig.climate.set(18.0, 60.0);
    let mut svc = rig.service(TerrariumConfig::default());
    let bus: EventBus<2> = EventBus::new();

    let mut recorder = RecordingSink::default();
    for _ in 0..5 {
        let mut sink = (bus.publisher(), &mut recorder);
        svc.tick(&mut sink).unwrap();
        rig.clock.advance_secs(5.0);
    }
    assert_eq!(bus.len(), 2);
    assert_eq!(bus.dropped() as usize, recorder.events.len() - 2);
}

#[test]
fn bus_payloads_render_as_topic_json() {
    let rig = Rig::new();
    rig.climate.set(25.0, 60.0);
    let mut svc = rig.service(TerrariumConfig::default());
    let bus: EventBus<64> = EventBus::new();
    svc.tick(&mut bus.publisher()).unwrap();

    let first = bus.try_next().expect("sensor_data published");
    let json: serde_json::Value = serde_json::from_str(&to_json(&first).unwrap()).unwrap();
    assert_eq!(json["topic"], "sensor_data");
    assert_eq!(json["payload"]["temperature"], 25.0);
}
