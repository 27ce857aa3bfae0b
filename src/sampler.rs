//! ==============================================================================
//! sampler.rs - the sampling / control loop
//! ==============================================================================
//!
//! purpose:
//!     one tick, strictly in order:
//!         1. read the three slots (blocking reads on a worker thread)
//!         2. average the valid readings
//!         3. feed the average to the pump state machine
//!         4. append the sample to the csv log
//!         5. publish the live state and maybe push telemetry
//!         6. sleep the sampling interval (processing time is not compensated)
//!
//! shared state:
//!     SharedState is the clone-able handle the web layer also holds.
//!     - slots: written only by discovery. a tick holds the read lock for
//!       the whole read phase so re-discovery waits for it.
//!     - live:  written only by the tick, read (copied) by status queries.
//!
//! relationships:
//!     - uses: sensor.rs, aggregate.rs, controller.rs, emission.rs
//!     - writes to: log_sink.rs (rows), telemetry.rs (snapshots)
//!     - used by: main.rs (run loop), web.rs (SharedState)
//!
//! ==============================================================================

use crate::aggregate;
use crate::controller::ActuatorController;
use crate::domain::{temps_by_alias, LiveState, Sample, SlotTable, Snapshot, SLOT_COUNT};
use crate::emission::EmissionGate;
use crate::log_sink::SampleSink;
use crate::sensor::SensorReader;
use crate::telemetry::TelemetrySink;
use chrono::Local;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

// ==============================================================================
// shared state
// ==============================================================================
// held by the sampling loop and the web server.
// arc<rwlock<>> as everywhere else: many readers OR one writer.

#[derive(Clone)]
pub struct SharedState {
    pub slots: Arc<RwLock<SlotTable>>,
    pub live: Arc<RwLock<LiveState>>,
    pub controller: Arc<ActuatorController>,
    pub reader: SensorReader,
    aliases: Vec<String>,
}

impl SharedState {
    /// starts with empty slots; call `discover` before the first tick
    pub fn new(controller: Arc<ActuatorController>, reader: SensorReader, aliases: Vec<String>) -> Self {
        let live = LiveState { last_sample: None, aliases: aliases.clone() };
        Self {
            slots: Arc::new(RwLock::new(SlotTable::assign(&aliases, Vec::new()))),
            live: Arc::new(RwLock::new(live)),
            controller,
            reader,
            aliases,
        }
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// (re)build the slot table from the bus. waits for an in-flight tick.
    pub async fn discover(&self) -> SlotTable {
        let mut slots = self.slots.write().await;
        let reader = self.reader.clone();
        let devices = match tokio::task::spawn_blocking(move || reader.discover()).await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::error!("sensor discovery task failed: {}", e);
                Vec::new()
            }
        };
        let found = devices.len();
        *slots = SlotTable::assign(&self.aliases, devices);

        if found < SLOT_COUNT {
            tracing::warn!("found {} DS18B20 sensor(s), expected {}", found, SLOT_COUNT);
        }
        for slot in slots.slots() {
            match &slot.device {
                Some(device) => tracing::info!("  {} -> {}", slot.alias, device.id),
                None => tracing::info!("  {} -> (none)", slot.alias),
            }
        }
        slots.clone()
    }

    /// best available snapshot, with a fresh gpio readback
    pub async fn snapshot(&self) -> Snapshot {
        let gpio = self.controller.gpio_status();
        self.live.read().await.snapshot(gpio)
    }
}

// ==============================================================================
// sampling loop
// ==============================================================================

pub struct Sampler {
    shared: SharedState,
    log: Box<dyn SampleSink>,
    telemetry: Arc<dyn TelemetrySink>,
    gate: EmissionGate,
    interval: Duration,
    sequence: u64,
    show_sensor_data: bool,
}

impl Sampler {
    pub fn new(
        shared: SharedState,
        log: Box<dyn SampleSink>,
        telemetry: Arc<dyn TelemetrySink>,
        gate: EmissionGate,
        interval: Duration,
    ) -> Self {
        Self {
            shared,
            log,
            telemetry,
            gate,
            interval,
            sequence: 0,
            show_sensor_data: true,
        }
    }

    pub fn show_sensor_data(mut self, show: bool) -> Self {
        self.show_sensor_data = show;
        self
    }

    /// sequence number of the last produced sample (0 before the first tick)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub async fn tick(&mut self) -> Sample {
        let timestamp = Local::now();

        // 1. read, holding the slot table so re-discovery can't swap it mid-read
        let readings = {
            let slots = self.shared.slots.read().await;
            let devices = slots.devices();
            let reader = self.shared.reader.clone();
            match tokio::task::spawn_blocking(move || reader.read_slots(&devices)).await {
                Ok(readings) => readings,
                Err(e) => {
                    tracing::error!("sensor read task failed: {}", e);
                    [None; SLOT_COUNT]
                }
            }
        };

        // 2-3. aggregate and control
        let average = aggregate::average(&readings);
        let pump_on = self.shared.controller.apply_average(average);

        self.sequence += 1;
        let sample = Sample { timestamp, readings, average, pump_on, sequence: self.sequence };

        // 4. persist
        if let Err(e) = self.log.append(&sample) {
            tracing::error!("measurement log append failed: {:#}", e);
            self.telemetry.report_error(format!("log append failed: {:#}", e));
        }

        if self.show_sensor_data {
            self.print_sample(&sample);
        }

        // 5. publish
        self.shared.live.write().await.last_sample = Some(sample.clone());

        let temps = temps_by_alias(self.shared.aliases(), &sample.readings);
        let now = Instant::now();
        if self.gate.should_emit(now, &temps, average) {
            let snapshot = Snapshot::from_sample(&sample, self.shared.aliases(), self.shared.controller.gpio_status());
            self.telemetry.push_snapshot(snapshot);
            self.gate.record(now, &temps, average);
        }

        sample
    }

    /// never returns; the caller races it against shutdown signals
    pub async fn run(mut self) {
        tracing::info!("[RUNTIME] Starting sampling ({:?} interval)", self.interval);
        loop {
            self.tick().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    fn print_sample(&self, sample: &Sample) {
        let pretty = self
            .shared
            .aliases()
            .iter()
            .zip(sample.readings.iter())
            .map(|(alias, t)| match t {
                Some(t) => format!("{}: {:.3} °C", alias, t),
                None => format!("{}: N/A", alias),
            })
            .collect::<Vec<_>>()
            .join(" | ");
        let avg = sample.average.map_or_else(|| "N/A".to_string(), |a| format!("{:.3}", a));
        tracing::info!(
            "{} | avg: {} °C | threshold: {:.2} °C | pump: {} | seq: {}",
            pretty,
            avg,
            self.shared.controller.threshold(),
            if sample.pump_on { "ON" } else { "OFF" },
            sample.sequence
        );
    }
}
