//! End-to-end cycles through `TerrariumService` on simulated hardware.

use terrarium::app::commands::{Command, Mode};
use terrarium::app::events::{ActionValue, Actuator, Event};
use terrarium::app::ports::PersistencePort;
use terrarium::clock::Clock;
use terrarium::config::TerrariumConfig;
use terrarium::controllers::feeder::FeedPhase;
use terrarium::drivers::servo::ServoPosition;
use terrarium::error::{ControllerError, SafetyFault};

use crate::mock_hw::{RecordingSink, Rig};

fn rig_at(temperature: f32, humidity: f32) -> (Rig, terrarium::app::service::TerrariumService, RecordingSink) {
    let rig = Rig::new();
    rig.climate.set(temperature, humidity);
    let svc = rig.service(TerrariumConfig::default());
    (rig, svc, RecordingSink::default())
}

// ── Temperature policy ────────────────────────────────────────

#[test]
fn heater_starts_below_band_and_stops_at_target() {
    // Target 25 ±2.
    let (rig, mut svc, mut sink) = rig_at(18.0, 60.0);

    svc.tick(&mut sink).unwrap();
    assert!(svc.actuators().heater_on);
    assert!(rig.heater.is_high());

    rig.climate.set(25.5, 60.0);
    rig.step(&mut svc, 5.0, &mut sink);
    assert!(!svc.actuators().heater_on);
    assert!(!rig.heater.is_high());

    assert_eq!(sink.topics_with("heater_"), vec!["heater_started", "heater_stopped"]);

    let heater_actions: Vec<_> = svc
        .actions(None)
        .into_iter()
        .filter(|a| a.actuator == Actuator::Heater)
        .map(|a| a.value)
        .collect();
    assert_eq!(heater_actions, vec![ActionValue::Switch(true), ActionValue::Switch(false)]);

    let kinds: Vec<_> = svc.decisions(None).iter().map(|d| d.kind).collect();
    assert!(kinds.contains(&"heater_on") && kinds.contains(&"heater_off"));
}

#[test]
fn inside_the_band_the_heater_holds_its_state() {
    let (rig, mut svc, mut sink) = rig_at(22.0, 60.0);
    svc.tick(&mut sink).unwrap();
    assert!(svc.actuators().heater_on);

    // 24 is inside the band: still heating.
    rig.climate.set(24.0, 60.0);
    rig.step(&mut svc, 5.0, &mut sink);
    assert!(svc.actuators().heater_on);
    assert_eq!(sink.count("heater_started"), 1);
    assert_eq!(sink.count("heater_stopped"), 0);
}

#[test]
fn every_cycle_publishes_sensor_data() {
    let (rig, mut svc, mut sink) = rig_at(25.0, 60.0);
    svc.tick(&mut sink).unwrap();
    rig.step(&mut svc, 5.0, &mut sink);
    assert_eq!(sink.count("sensor_data"), 2);
    let Some(Event::SensorData(snap)) = sink.events.iter().find(|e| e.topic() == "sensor_data") else {
        panic!("no sensor_data event");
    };
    assert_eq!(snap.temperature, Some(25.0));
    assert_eq!(snap.humidity, Some(60.0));
    assert_eq!(svc.sensor_history(None).len(), 2);
}

// ── Lighting ──────────────────────────────────────────────────

#[test]
fn daylight_hours_drive_led_intensity() {
    // Rig clock starts at 12:00, inside the default 6-18 day.
    let (rig, mut svc, mut sink) = rig_at(25.0, 60.0);
    svc.tick(&mut sink).unwrap();
    assert_eq!(svc.actuators().led_intensity, 100);
    assert_eq!(rig.led.duty(), 1000);

    rig.clock.advance_to_hour(19);
    svc.tick(&mut sink).unwrap();
    assert_eq!(svc.actuators().led_intensity, 0);
    assert_eq!(rig.led.duty(), 0);
}

// ── Safety ────────────────────────────────────────────────────

#[test]
fn over_temperature_forces_heater_off_in_manual_mode() {
    let (rig, mut svc, mut sink) = rig_at(30.0, 60.0);
    svc.handle_command(Command::SetMode(Mode::Manual), &mut sink).unwrap();
    svc.tick(&mut sink).unwrap();
    svc.handle_command(Command::SetHeater(true), &mut sink).unwrap();
    assert!(rig.heater.is_high());

    rig.climate.set(36.0, 60.0);
    rig.step(&mut svc, 5.0, &mut sink);
    assert!(!rig.heater.is_high());
    assert_eq!(svc.faults(), SafetyFault::OverTemperature.mask());
    assert_eq!(sink.count("safety_fault"), 1);

    let refused = svc.handle_command(Command::SetHeater(true), &mut sink);
    assert!(matches!(refused, Err(ControllerError::SafetyLimit)));
    assert!(!rig.heater.is_high());

    rig.climate.set(30.0, 60.0);
    rig.step(&mut svc, 5.0, &mut sink);
    assert_eq!(svc.faults(), 0);
    assert_eq!(sink.count("safety_cleared"), 1);
}

#[test]
fn silent_climate_sensor_raises_sensor_lost() {
    let (rig, mut svc, mut sink) = rig_at(18.0, 60.0);
    svc.tick(&mut sink).unwrap();
    assert!(svc.actuators().heater_on);

    rig.climate.disconnect();
    for _ in 0..3 {
        rig.step(&mut svc, 5.0, &mut sink);
    }
    let status = svc.status();
    assert!(status.faults.contains(&SafetyFault::ClimateSensorLost));
    assert!(!status.actuators.heater_on);
    assert!(status.last_good.climate.is_some());
}

// ── Manual overrides ──────────────────────────────────────────

#[test]
fn overrides_are_refused_in_auto_mode() {
    let (_rig, mut svc, mut sink) = rig_at(25.0, 60.0);
    for cmd in [
        Command::SetHeater(true),
        Command::SetLedIntensity(10),
        Command::SetFanSpeed(50.0),
        Command::SetFeederPosition(ServoPosition::Open),
    ] {
        let res = svc.handle_command(cmd.clone(), &mut sink);
        assert!(matches!(res, Err(ControllerError::InvalidArgument(_))), "{cmd:?} accepted in auto");
    }

    svc.handle_command(Command::SetMode(Mode::Manual), &mut sink).unwrap();
    svc.handle_command(Command::SetLedIntensity(10), &mut sink).unwrap();
    assert_eq!(svc.actuators().led_intensity, 10);
    assert_eq!(sink.count("mode_changed"), 1);
}

#[test]
fn manual_mode_leaves_policies_alone() {
    let (rig, mut svc, mut sink) = rig_at(18.0, 60.0);
    svc.handle_command(Command::SetMode(Mode::Manual), &mut sink).unwrap();
    svc.tick(&mut sink).unwrap();
    rig.step(&mut svc, 5.0, &mut sink);
    assert!(!svc.actuators().heater_on);
    assert_eq!(svc.actuators().led_intensity, 0);
}

// ── Maintenance ───────────────────────────────────────────────

#[test]
fn maintenance_mode_holds_every_actuator_off() {
    let (rig, mut svc, mut sink) = rig_at(18.0, 40.0);
    svc.tick(&mut sink).unwrap();
    assert!(svc.actuators().heater_on);
    assert!(svc.actuators().humidifier_on);
    assert_eq!(svc.actuators().led_intensity, 100);

    svc.handle_command(Command::SetMode(Mode::Manual), &mut sink).unwrap();
    svc.handle_command(Command::SetFanSpeed(60.0), &mut sink).unwrap();
    rig.step(&mut svc, 5.0, &mut sink);
    assert!(svc.actuators().fan_speed > 0.0);

    svc.handle_command(Command::SetMode(Mode::Maintenance), &mut sink).unwrap();
    rig.step(&mut svc, 5.0, &mut sink);
    let a = svc.actuators();
    assert!(!a.heater_on && !a.humidifier_on);
    assert_eq!(a.led_intensity, 0);
    assert_eq!(a.fan_speed, 0.0);
    assert!(!rig.heater.is_high() && !rig.humidifier.is_high());
    assert_eq!((rig.led.duty(), rig.fan.duty()), (0, 0));

    // Quiet cycles write nothing new; overrides and feeds are refused.
    let actions = svc.actions(None).len();
    rig.step(&mut svc, 5.0, &mut sink);
    assert_eq!(svc.actions(None).len(), actions);
    for cmd in [Command::SetHeater(true), Command::SetLedIntensity(50), Command::Feed(2)] {
        let res = svc.handle_command(cmd.clone(), &mut sink);
        assert!(matches!(res, Err(ControllerError::InvalidArgument(_))), "{cmd:?} accepted in maintenance");
    }

    svc.handle_command(Command::SetMode(Mode::Auto), &mut sink).unwrap();
    rig.step(&mut svc, 5.0, &mut sink);
    assert!(svc.actuators().heater_on);
    assert_eq!(svc.actuators().led_intensity, 100);
    assert!(svc.status().fan.auto);
}

// ── Emergency stop ────────────────────────────────────────────

#[test]
fn emergency_stop_holds_actuators_off_until_resumed() {
    let (rig, mut svc, mut sink) = rig_at(18.0, 60.0);
    svc.tick(&mut sink).unwrap();
    assert!(svc.actuators().heater_on);
    assert_eq!(svc.actuators().led_intensity, 100);

    svc.handle_command(Command::EmergencyStop, &mut sink).unwrap();
    assert!(svc.is_emergency_stopped());
    assert!(!svc.actuators().heater_on);
    assert_eq!(svc.actuators().led_intensity, 0);
    assert!(!rig.heater.is_high());

    // Policies would turn the heater back on; the latch wins.
    rig.step(&mut svc, 5.0, &mut sink);
    assert!(!svc.actuators().heater_on);
    assert!(matches!(
        svc.handle_command(Command::Feed(3), &mut sink),
        Err(ControllerError::EmergencyStop)
    ));
    svc.handle_command(Command::SetMode(Mode::Manual), &mut sink).unwrap();
    assert!(matches!(
        svc.handle_command(Command::SetHeater(true), &mut sink),
        Err(ControllerError::EmergencyStop)
    ));

    svc.handle_command(Command::EmergencyResume, &mut sink).unwrap();
    svc.handle_command(Command::SetMode(Mode::Auto), &mut sink).unwrap();
    rig.step(&mut svc, 5.0, &mut sink);
    assert!(svc.actuators().heater_on);
    assert_eq!(sink.count("emergency_stop"), 1);
    assert_eq!(sink.count("emergency_resumed"), 1);
}

#[test]
fn emergency_stop_aborts_a_running_feed() {
    let (rig, mut svc, mut sink) = rig_at(25.0, 60.0);
    svc.tick(&mut sink).unwrap();
    svc.handle_command(Command::Feed(5), &mut sink).unwrap();
    assert_eq!(svc.actuators().feeder_position, "closed");
    assert!(!matches!(svc.status().feeder.phase, FeedPhase::Idle));

    svc.handle_command(Command::EmergencyStop, &mut sink).unwrap();
    assert!(matches!(svc.status().feeder.phase, FeedPhase::Idle));
    assert_eq!(sink.count("feeding_emergency_stop"), 1);
    assert_eq!(rig.feeder.duty(), 50);
}

// ── Feeding ───────────────────────────────────────────────────

#[test]
fn manual_feed_runs_the_airlock_sequence() {
    let (rig, mut svc, mut sink) = rig_at(25.0, 60.0);
    svc.tick(&mut sink).unwrap();
    svc.handle_command(Command::Feed(5), &mut sink).unwrap();

    // 5 × 0.5 s entrance, then 1 s release.
    rig.step(&mut svc, 3.0, &mut sink);
    assert_eq!(svc.actuators().feeder_position, "center");
    rig.step(&mut svc, 2.0, &mut sink);
    assert_eq!(svc.actuators().feeder_position, "closed");
    assert_eq!(sink.topics_with("feeding_"), vec!["feeding_started", "feeding_stopped"]);
    assert_eq!(svc.status().feeder.daily_feeds, 1);

    // Second feed inside the hour is refused.
    assert!(matches!(
        svc.handle_command(Command::Feed(5), &mut sink),
        Err(ControllerError::Interlock(_))
    ));
}

#[test]
fn stuck_feed_is_closed_by_the_watchdog() {
    let (rig, mut svc, mut sink) = rig_at(25.0, 60.0);
    svc.tick(&mut sink).unwrap();
    svc.handle_command(Command::Feed(5), &mut sink).unwrap();

    // The cycle stalls past the 30 s ceiling before the next update.
    rig.step(&mut svc, 45.0, &mut sink);
    assert!(matches!(svc.status().feeder.phase, FeedPhase::Idle));
    assert_eq!(sink.count("feeding_emergency_stop"), 1);
    assert_eq!(sink.count("feeding_stopped"), 0);
    assert_eq!(svc.actuators().feeder_position, "closed");
}

#[test]
fn scheduled_feed_runs_once_per_day_and_survives_restart() {
    let (rig, mut svc, mut sink) = rig_at(25.0, 60.0);

    rig.clock.advance_to_hour(18);
    svc.tick(&mut sink).unwrap();
    rig.step(&mut svc, 5.0, &mut sink);
    rig.step(&mut svc, 5.0, &mut sink);
    assert_eq!(sink.count("feeding_started"), 1);
    assert_eq!(sink.count("feeding_stopped"), 1);

    let today = rig.clock.local_time().date;
    let stored = rig.store.load_feeding().unwrap().expect("record persisted");
    assert_eq!(stored.last_feeding_date, Some(today));
    assert_eq!(stored.daily_count, 1);

    // Same hour, later cycle: nothing new.
    rig.step(&mut svc, 600.0, &mut sink);
    assert_eq!(sink.count("feeding_started"), 1);

    // Restart within the same day.
    svc.cleanup();
    let mut svc = rig.service(TerrariumConfig::default());
    assert_eq!(svc.feeding_record().last_feeding_date, Some(today));
    assert_eq!(svc.status().feeder.daily_feeds, 1);
    rig.step(&mut svc, 60.0, &mut sink);
    assert_eq!(sink.count("feeding_started"), 1);

    // Next morning's slot feeds again.
    rig.clock.advance_to_hour(8);
    svc.tick(&mut sink).unwrap();
    assert_eq!(sink.count("feeding_started"), 2);
    assert_eq!(svc.status().feeder.daily_feeds, 1);
}

#[test]
fn corrupted_feeding_record_starts_fresh() {
    let rig = Rig::new();
    rig.climate.set(25.0, 60.0);
    rig.store.put_feeding_blob(&[0xde, 0xad]).unwrap();
    let svc = rig.service(TerrariumConfig::default());
    assert_eq!(svc.feeding_record().last_feeding_date, None);
    assert_eq!(svc.status().feeder.daily_feeds, 0);
}

// ── Commands ──────────────────────────────────────────────────

#[test]
fn humidity_target_command_updates_policy() {
    let (_rig, mut svc, mut sink) = rig_at(25.0, 60.0);
    svc.handle_command(Command::SetHumidity(70.0), &mut sink).unwrap();
    assert_eq!(svc.config().policies.humidity.target, 70.0);
    assert!(svc.handle_command(Command::SetHumidity(120.0), &mut sink).is_err());
    assert_eq!(svc.config().policies.humidity.target, 70.0);
}

#[test]
fn unknown_alert_id_is_rejected() {
    let (rig, mut svc, mut sink) = rig_at(10.0, 60.0);
    svc.tick(&mut sink).unwrap();
    let alerts = svc.alerts(true, None);
    assert_eq!(alerts.len(), 1);
    svc.handle_command(Command::AcknowledgeAlert(alerts[0].id), &mut sink).unwrap();
    assert!(svc.alerts(true, None).is_empty());
    assert!(svc.handle_command(Command::AcknowledgeAlert(9999), &mut sink).is_err());
    rig.step(&mut svc, 5.0, &mut sink);
    svc.handle_command(Command::ClearAlerts, &mut sink).unwrap();
    assert!(svc.alerts(false, None).is_empty());
}
