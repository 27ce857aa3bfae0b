//! ==============================================================================
//! sensor.rs - DS18B20 discovery and validated reads
//! ==============================================================================
//! ```text
//!
//! purpose:
//!     finds the temperature sensors on the 1-wire bus and turns one raw
//!     `w1_slave` payload per sensor into a reading, retrying a bounded number
//!     of times. every failure path ends as an absent reading; nothing escapes.
//!
//! payload format (w1_therm driver):
//!
//!     72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//!     72 01 4b 46 7f ff 0e 10 57 t=23125
//!
//!     line 1 must end in "YES" (crc ok), line 2 carries millidegrees after "t=".
//!
//! relationships:
//!     - uses: hal.rs (list_device_dirs, read_raw_payload)
//!     - used by: sampler.rs (every tick), web.rs (re-discovery)
//!
//! ```
//! ==============================================================================

use crate::domain::{BusDevice, Reading, SLOT_COUNT};
use crate::hal::HardwareProvider;
use std::sync::Arc;
use std::time::Duration;

const PAYLOAD_FILE: &str = "w1_slave";

#[derive(Clone)]
pub struct SensorReader {
    hal: Arc<dyn HardwareProvider>,
    family_prefix: String,
    retries: u32,
    retry_delay: Duration,
}

impl SensorReader {
    pub fn new(hal: Arc<dyn HardwareProvider>, family_prefix: impl Into<String>, retries: u32, retry_delay: Duration) -> Self {
        Self {
            hal,
            family_prefix: family_prefix.into(),
            retries: retries.max(1),
            retry_delay,
        }
    }

    /// sensor devices on the bus, sorted by id so aliases stay stable across runs
    pub fn discover(&self) -> Vec<BusDevice> {
        let dirs = match self.hal.list_device_dirs(&self.family_prefix) {
            Ok(dirs) => dirs,
            Err(e) => {
                tracing::warn!("1-wire discovery failed: {:#}", e);
                return Vec::new();
            }
        };
        let mut devices: Vec<BusDevice> = dirs
            .into_iter()
            .filter_map(|dir| {
                let id = dir.file_name()?.to_string_lossy().into_owned();
                Some(BusDevice { id, dir })
            })
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// one validated reading, or `None` once the retries are used up
    pub fn read_one(&self, device: &BusDevice) -> Reading {
        let path = device.dir.join(PAYLOAD_FILE);
        for attempt in 1..=self.retries {
            match self.hal.read_raw_payload(&path) {
                Ok(raw) => match parse_payload(&raw) {
                    Some(celsius) => return Some(celsius),
                    None => tracing::debug!("{}: invalid payload (attempt {})", device.id, attempt),
                },
                Err(e) => tracing::debug!("{}: read failed (attempt {}): {:#}", device.id, attempt, e),
            }
            if attempt < self.retries {
                std::thread::sleep(self.retry_delay);
            }
        }
        tracing::debug!("{}: no valid reading after {} attempts", device.id, self.retries);
        None
    }

    /// blocking; empty slots read as absent without touching the bus
    pub fn read_slots(&self, devices: &[Option<BusDevice>]) -> [Reading; SLOT_COUNT] {
        let mut readings = [None; SLOT_COUNT];
        for (reading, device) in readings.iter_mut().zip(devices) {
            *reading = device.as_ref().and_then(|d| self.read_one(d));
        }
        readings
    }
}

/// °C from a `w1_slave` payload, `None` on crc failure or a malformed value
pub fn parse_payload(raw: &str) -> Option<f64> {
    let mut lines = raw.trim().lines();
    let status = lines.next()?;
    let data = lines.next()?;
    if !status.trim().ends_with("YES") {
        return None;
    }
    let mut parts = data.split("t=");
    let _bytes = parts.next()?;
    let value = parts.next()?.trim();
    if parts.next().is_some() {
        return None;
    }
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let millis: i64 = value.parse().ok()?;
    Some(millis as f64 / 1000.0)
}
