//! In-memory 1-wire bus and gpio for integration tests.
//!
//! Payloads are scripted per device; every output write is recorded so tests
//! can assert on the relay history without a Pi.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use pump_host::domain::Sample;
use pump_host::domain::Snapshot;
use pump_host::hal::{Edge, EdgeHandler, HardwareProvider, Level, PullMode};
use pump_host::log_sink::SampleSink;
use pump_host::telemetry::TelemetrySink;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BUS: &str = "/mock/w1";

/// a well formed DS18B20 payload for `millis` millidegrees
pub fn payload(millis: i64) -> String {
    format!("72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t={}\n", millis)
}

/// same bytes, failed crc
pub fn crc_failure() -> String {
    "72 01 4b 46 7f ff 0e 10 57 : crc=00 NO\n72 01 4b 46 7f ff 0e 10 57 t=99999\n".to_string()
}

// ── MockBus ───────────────────────────────────────────────────

#[derive(Default)]
struct BusState {
    devices: Vec<String>,
    /// per device: responses consumed in order, the last one repeats
    script: HashMap<String, VecDeque<Option<String>>>,
    reads: HashMap<String, usize>,
    levels: HashMap<u8, Level>,
    writes: Vec<(u8, Level)>,
    failing_pins: HashSet<u8>,
    watches: HashMap<u8, (Edge, EdgeHandler)>,
    released: bool,
}

#[derive(Default)]
pub struct MockBus {
    state: Mutex<BusState>,
}

impl MockBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// add a device that always answers with `millis`
    pub fn add_sensor(&self, id: &str, millis: i64) {
        self.script(id, vec![Some(payload(millis))]);
    }

    /// add (or replace) a device with a response script. `None` is an io error.
    pub fn script(&self, id: &str, responses: Vec<Option<String>>) {
        let mut state = self.state.lock().unwrap();
        if !state.devices.iter().any(|d| d == id) {
            state.devices.push(id.to_string());
        }
        state.script.insert(id.to_string(), responses.into());
    }

    pub fn remove_sensor(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.devices.retain(|d| d != id);
        state.script.remove(id);
    }

    pub fn reads_of(&self, id: &str) -> usize {
        self.state.lock().unwrap().reads.get(id).copied().unwrap_or(0)
    }

    pub fn fail_writes_on(&self, pin: u8) {
        self.state.lock().unwrap().failing_pins.insert(pin);
    }

    pub fn writes(&self) -> Vec<(u8, Level)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        self.state.lock().unwrap().levels.get(&pin).copied()
    }

    pub fn released(&self) -> bool {
        self.state.lock().unwrap().released
    }

    /// change an input line, firing its handler like the interrupt thread would
    pub fn set_input(&self, pin: u8, level: Level) {
        let fire = {
            let mut state = self.state.lock().unwrap();
            let previous = state.levels.insert(pin, level).unwrap_or(Level::Low);
            match state.watches.get(&pin) {
                Some((edge, handler)) if edge.matches(previous, level) => Some(handler.clone()),
                _ => None,
            }
        };
        if let Some(handler) = fire {
            handler(level);
        }
    }
}

impl HardwareProvider for MockBus {
    fn list_device_dirs(&self, prefix: &str) -> Result<Vec<PathBuf>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .devices
            .iter()
            .filter(|id| id.starts_with(prefix))
            .map(|id| Path::new(BUS).join(id))
            .collect())
    }

    fn read_raw_payload(&self, path: &Path) -> Result<String> {
        let id = path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("bad path {}", path.display()))?;
        let mut state = self.state.lock().unwrap();
        *state.reads.entry(id.clone()).or_default() += 1;
        let script = state.script.get_mut(&id).ok_or_else(|| anyhow!("{} is gone", id))?;
        let response = if script.len() > 1 { script.pop_front().flatten() } else { script.front().cloned().flatten() };
        response.ok_or_else(|| anyhow!("{}: i/o error", id))
    }

    fn setup_output(&self, pin: u8, initial: Level) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.levels.insert(pin, initial);
        state.writes.push((pin, initial));
        Ok(())
    }

    fn setup_input(&self, pin: u8, pull: PullMode) -> Result<()> {
        let level = if pull == PullMode::Up { Level::High } else { Level::Low };
        self.state.lock().unwrap().levels.insert(pin, level);
        Ok(())
    }

    fn set_output_level(&self, pin: u8, level: Level) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_pins.contains(&pin) {
            return Err(anyhow!("gpio {} write failed", pin));
        }
        state.levels.insert(pin, level);
        state.writes.push((pin, level));
        Ok(())
    }

    fn read_level(&self, pin: u8) -> Option<Level> {
        self.state.lock().unwrap().levels.get(&pin).copied()
    }

    fn subscribe_edge(&self, pin: u8, edge: Edge, _debounce: Duration, handler: EdgeHandler) -> Result<()> {
        self.state.lock().unwrap().watches.insert(pin, (edge, handler));
        Ok(())
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.watches.clear();
        state.released = true;
    }
}

// ── recording sinks ───────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingLog {
    pub rows: Arc<Mutex<Vec<Sample>>>,
    pub fail: Arc<Mutex<bool>>,
}

impl SampleSink for RecordingLog {
    fn append(&mut self, sample: &Sample) -> Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("disk full"));
        }
        self.rows.lock().unwrap().push(sample.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    pub snapshots: Mutex<Vec<Snapshot>>,
    pub errors: Mutex<Vec<String>>,
}

impl TelemetrySink for RecordingTelemetry {
    fn push_snapshot(&self, snapshot: Snapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }

    fn report_error(&self, error: String) {
        self.errors.lock().unwrap().push(error);
    }
}
