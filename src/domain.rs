use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// fixed number of sensor positions on the bus
pub const SLOT_COUNT: usize = 3;

/// one sensor's value for one tick, °C. `None` = failed validation after retries
pub type Reading = Option<f64>;

/// local timestamp format used in rows and snapshots
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// a sensor found on the 1-wire bus
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BusDevice {
    /// directory name, e.g. "28-3c01d607d4ab"
    pub id: String,
    #[serde(skip)]
    pub dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SensorSlot {
    pub alias: String,
    pub device: Option<BusDevice>,
}

/// the three slots, in alias order
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlotTable {
    slots: Vec<SensorSlot>,
}

impl SlotTable {
    /// pair aliases with discovered devices; extra devices are ignored and
    /// missing ones leave the slot empty
    pub fn assign(aliases: &[String], devices: Vec<BusDevice>) -> Self {
        let mut devices = devices.into_iter();
        let slots = (0..SLOT_COUNT)
            .map(|i| SensorSlot {
                alias: aliases.get(i).cloned().unwrap_or_else(|| format!("sensor_{}", i + 1)),
                device: devices.next(),
            })
            .collect();
        Self { slots }
    }

    pub fn slots(&self) -> &[SensorSlot] {
        &self.slots
    }

    pub fn aliases(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.alias.clone()).collect()
    }

    pub fn devices(&self) -> Vec<Option<BusDevice>> {
        self.slots.iter().map(|s| s.device.clone()).collect()
    }

    pub fn assigned(&self) -> usize {
        self.slots.iter().filter(|s| s.device.is_some()).count()
    }
}

/// one finished tick, the unit written to the csv log and pushed as telemetry
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub readings: [Reading; SLOT_COUNT],
    pub average: Option<f64>,
    pub pump_on: bool,
    pub sequence: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ActuatorState {
    pub pump: bool,
    pub secondary_relay: bool,
}

/// raw pin levels (0/1) as read back from the hardware; `None` when the pin is
/// not configured or cannot be read
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GpioStatus {
    pub bomba: Option<u8>,
    pub relay_v: Option<u8>,
    pub trigger: Option<u8>,
}

/// the telemetry payload seen by the dashboard
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub temps: BTreeMap<String, Option<f64>>,
    pub avg: Option<f64>,
    pub ts: Option<String>,
    pub gpio: GpioStatus,
}

impl Snapshot {
    pub fn from_sample(sample: &Sample, aliases: &[String], gpio: GpioStatus) -> Self {
        Self {
            temps: temps_by_alias(aliases, &sample.readings),
            avg: sample.average,
            ts: Some(sample.timestamp.format(TIMESTAMP_FORMAT).to_string()),
            gpio,
        }
    }
}

pub fn temps_by_alias(aliases: &[String], readings: &[Reading]) -> BTreeMap<String, Option<f64>> {
    aliases.iter().cloned().zip(readings.iter().copied()).collect()
}

/// the single "current state" record behind the status api.
/// written only by the sampling loop; everyone else reads a copy.
#[derive(Clone, Debug, Default)]
pub struct LiveState {
    pub last_sample: Option<Sample>,
    pub aliases: Vec<String>,
}

impl LiveState {
    pub fn snapshot(&self, gpio: GpioStatus) -> Snapshot {
        match &self.last_sample {
            Some(sample) => Snapshot::from_sample(sample, &self.aliases, gpio),
            None => Snapshot {
                temps: self.aliases.iter().map(|a| (a.clone(), None)).collect(),
                gpio,
                ..Snapshot::default()
            },
        }
    }
}
