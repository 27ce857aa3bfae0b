//! End-to-end ticks against the in-memory bus: sensors, control law, log
//! rows, telemetry and the relay outputs.

mod common;

use common::{crc_failure, payload, MockBus, RecordingLog, RecordingTelemetry};
use pump_host::config::HostConfig;
use pump_host::controller::ActuatorController;
use pump_host::emission::{EmissionGate, EmissionPolicy};
use pump_host::hal::{HardwareProvider, Level};
use pump_host::log_sink::format_row;
use pump_host::sampler::{Sampler, SharedState};
use pump_host::sensor::SensorReader;
use std::sync::Arc;
use std::time::Duration;

const PUMP: u8 = 27;
const RELAY_V: u8 = 22;
const TRIGGER: u8 = 23;

struct Rig {
    bus: Arc<MockBus>,
    shared: SharedState,
    log: RecordingLog,
    telemetry: Arc<RecordingTelemetry>,
    sampler: Sampler,
}

async fn rig(bus: Arc<MockBus>, config: &HostConfig, policy: EmissionPolicy) -> Rig {
    let hal: Arc<dyn HardwareProvider> = bus.clone();
    let controller = Arc::new(ActuatorController::new(hal.clone(), &config.gpio, &config.control));
    controller.setup().unwrap();
    let reader = SensorReader::new(hal, "28-", config.sensors.read_retries, Duration::ZERO);
    let shared = SharedState::new(controller, reader, config.sensors.aliases.clone());
    shared.discover().await;

    let log = RecordingLog::default();
    let telemetry = Arc::new(RecordingTelemetry::default());
    let gate = EmissionGate::new(policy, Duration::from_secs(4), 0.05);
    let sampler = Sampler::new(shared.clone(), Box::new(log.clone()), telemetry.clone(), gate, Duration::ZERO)
        .show_sensor_data(false);
    Rig { bus, shared, log, telemetry, sampler }
}

fn three_sensors() -> Arc<MockBus> {
    let bus = MockBus::new();
    bus.add_sensor("28-000000000a01", 21_000);
    bus.add_sensor("28-000000000a02", 22_000);
    bus.add_sensor("28-000000000a03", 23_000);
    bus
}

#[tokio::test]
async fn sequence_counts_up_from_one() {
    let mut rig = rig(three_sensors(), &HostConfig::default(), EmissionPolicy::EveryTick).await;
    assert_eq!(rig.sampler.sequence(), 0);

    for expected in 1..=3 {
        let sample = rig.sampler.tick().await;
        assert_eq!(sample.sequence, expected);
    }
    let rows = rig.log.rows.lock().unwrap();
    let sequences: Vec<u64> = rows.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test]
async fn partial_readings_average_and_switch_the_pump() {
    let bus = MockBus::new();
    bus.add_sensor("28-000000000a01", 21_111);
    bus.script("28-000000000a02", vec![Some(crc_failure())]);
    bus.add_sensor("28-000000000a03", 23_222);
    let mut rig = rig(bus, &HostConfig::default(), EmissionPolicy::EveryTick).await;

    let sample = rig.sampler.tick().await;
    assert_eq!(sample.readings, [Some(21.111), None, Some(23.222)]);
    assert_eq!(sample.average, Some(22.167));
    assert!(sample.pump_on);
    assert_eq!(rig.bus.level(PUMP), Some(Level::High));
    assert_eq!(rig.bus.reads_of("28-000000000a02"), 3);

    let row = format_row(&sample).join(",");
    assert!(row.ends_with(",21.111,,23.222,22.167,ON,1"), "{}", row);

    let snapshots = rig.telemetry.snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].temps["sensor_2"], None);
    assert_eq!(snapshots[0].avg, Some(22.167));
    assert_eq!(snapshots[0].gpio.bomba, Some(1));
}

#[tokio::test]
async fn all_sensors_failing_turns_the_pump_off() {
    let bus = three_sensors();
    let mut rig = rig(bus.clone(), &HostConfig::default(), EmissionPolicy::EveryTick).await;
    rig.shared.controller.set_pump(true);

    for id in ["28-000000000a01", "28-000000000a02", "28-000000000a03"] {
        bus.script(id, vec![None]);
    }
    let sample = rig.sampler.tick().await;
    assert_eq!(sample.readings, [None, None, None]);
    assert_eq!(sample.average, None);
    assert!(!sample.pump_on);
    assert_eq!(bus.level(PUMP), Some(Level::Low));
    assert!(format_row(&sample).join(",").ends_with(",,,,,OFF,1"));
}

#[tokio::test]
async fn empty_bus_still_ticks() {
    let mut rig = rig(MockBus::new(), &HostConfig::default(), EmissionPolicy::EveryTick).await;
    assert_eq!(rig.shared.slots.read().await.assigned(), 0);

    let sample = rig.sampler.tick().await;
    assert_eq!(sample.readings, [None, None, None]);
    assert!(!sample.pump_on);
    assert_eq!(rig.log.rows.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn transient_crc_failure_is_retried() {
    let bus = three_sensors();
    bus.script(
        "28-000000000a01",
        vec![Some(crc_failure()), None, Some(payload(20_500))],
    );
    let mut rig = rig(bus, &HostConfig::default(), EmissionPolicy::EveryTick).await;

    let sample = rig.sampler.tick().await;
    assert_eq!(sample.readings[0], Some(20.5));
    assert_eq!(rig.bus.reads_of("28-000000000a01"), 3);
    assert_eq!(sample.average, Some(21.833));
}

#[tokio::test]
async fn extra_devices_are_ignored() {
    let bus = three_sensors();
    bus.add_sensor("28-000000000a04", 90_000);
    let mut rig = rig(bus, &HostConfig::default(), EmissionPolicy::EveryTick).await;

    let sample = rig.sampler.tick().await;
    assert_eq!(sample.average, Some(22.0));
    assert_eq!(rig.bus.reads_of("28-000000000a04"), 0);
}

#[tokio::test]
async fn rediscovery_picks_up_a_replaced_sensor() {
    let bus = three_sensors();
    let mut rig = rig(bus.clone(), &HostConfig::default(), EmissionPolicy::EveryTick).await;

    bus.remove_sensor("28-000000000a02");
    let sample = rig.sampler.tick().await;
    assert_eq!(sample.readings[1], None);

    bus.add_sensor("28-000000000a05", 24_000);
    let table = rig.shared.discover().await;
    assert_eq!(table.assigned(), 3);
    assert_eq!(table.slots()[2].device.as_ref().map(|d| d.id.as_str()), Some("28-000000000a05"));

    let sample = rig.sampler.tick().await;
    assert_eq!(sample.readings, [Some(21.0), Some(23.0), Some(24.0)]);
}

#[tokio::test]
async fn actuator_write_failure_does_not_stop_the_loop() {
    let bus = three_sensors();
    bus.add_sensor("28-000000000a01", 30_000);
    let mut rig = rig(bus.clone(), &HostConfig::default(), EmissionPolicy::EveryTick).await;
    bus.fail_writes_on(PUMP);

    let first = rig.sampler.tick().await;
    let second = rig.sampler.tick().await;
    assert!(first.pump_on && second.pump_on);
    assert_eq!(second.sequence, 2);
    // logical state says ON, the readback shows the relay never moved
    assert!(rig.shared.controller.state().pump);
    assert_eq!(rig.shared.controller.gpio_status().bomba, Some(0));
}

#[tokio::test]
async fn log_failure_is_reported_and_the_tick_continues() {
    let mut rig = rig(three_sensors(), &HostConfig::default(), EmissionPolicy::EveryTick).await;
    *rig.log.fail.lock().unwrap() = true;

    let sample = rig.sampler.tick().await;
    assert_eq!(sample.sequence, 1);
    let errors = rig.telemetry.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("disk full"), "{}", errors[0]);
    assert_eq!(rig.telemetry.snapshots.lock().unwrap().len(), 1);

    let status = rig.shared.snapshot().await;
    assert_eq!(status.avg, Some(22.0));
}

#[tokio::test]
async fn gated_telemetry_skips_small_moves() {
    let bus = three_sensors();
    let mut rig = rig(bus.clone(), &HostConfig::default(), EmissionPolicy::Gated).await;

    rig.sampler.tick().await;
    bus.add_sensor("28-000000000a01", 21_030);
    rig.sampler.tick().await;
    assert_eq!(rig.telemetry.snapshots.lock().unwrap().len(), 1);

    bus.add_sensor("28-000000000a01", 21_100);
    rig.sampler.tick().await;
    assert_eq!(rig.telemetry.snapshots.lock().unwrap().len(), 2);
    // the log still gets every tick
    assert_eq!(rig.log.rows.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn relay_v_follows_the_trigger_not_the_pump() {
    let bus = three_sensors();
    let mut rig = rig(bus.clone(), &HostConfig::default(), EmissionPolicy::EveryTick).await;

    bus.set_input(TRIGGER, Level::High);
    assert_eq!(bus.level(RELAY_V), Some(Level::High));

    let sample = rig.sampler.tick().await;
    assert!(!sample.pump_on);
    assert_eq!(bus.level(RELAY_V), Some(Level::High));

    bus.set_input(TRIGGER, Level::Low);
    assert_eq!(bus.level(RELAY_V), Some(Level::Low));
    assert_eq!(bus.level(PUMP), Some(Level::Low));
}

#[tokio::test]
async fn all_off_leaves_every_output_inactive() {
    let mut config = HostConfig::default();
    config.gpio.pump.active_level = Level::Low;
    let bus = three_sensors();
    bus.add_sensor("28-000000000a01", 40_000);
    let mut rig = rig(bus.clone(), &config, EmissionPolicy::EveryTick).await;

    assert!(rig.sampler.tick().await.pump_on);
    bus.set_input(TRIGGER, Level::High);
    assert_eq!(bus.level(PUMP), Some(Level::Low));
    assert_eq!(bus.level(RELAY_V), Some(Level::High));

    rig.shared.controller.all_off();
    bus.release();
    assert_eq!(bus.level(PUMP), Some(Level::High));
    assert_eq!(bus.level(RELAY_V), Some(Level::Low));
    assert!(bus.released());
    assert_eq!(bus.writes().last(), Some(&(RELAY_V, Level::Low)));
}
