//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a narrow interface for the hardware the controller touches:
//!     the 1-wire sysfs tree (device listing, raw `w1_slave` payloads) and
//!     gpio lines (relay outputs, the trigger input and its edge interrupts).
//!     abstracts away the difference between running on a real Raspberry Pi
//!     (using `rppal`) and a development machine (using mocks).
//!
//! design philosophy:
//!     - "Compile Anywhere": The host should compile on Windows/Mac/Linux.
//!     - "Zero Cost": On the Pi, this compiles down to direct `rppal` calls.
//!     - "Logical vs Electrical": this layer only knows HIGH/LOW. which level
//!       energizes a relay is decided by the controller from config.
//!
//! relationships:
//!     - used by: sensor.rs (1-wire discovery and payload reads)
//!     - used by: controller.rs (relay outputs, trigger input)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Electrical level of a gpio line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    #[serde(rename = "HIGH", alias = "high")]
    High,
    #[serde(rename = "LOW", alias = "low")]
    Low,
}

impl Level {
    pub fn inverse(self) -> Self {
        match self {
            Level::High => Level::Low,
            Level::Low => Level::High,
        }
    }

    pub fn is_high(self) -> bool {
        matches!(self, Level::High)
    }

    /// 0/1 as the dashboard shows pin levels
    pub fn as_bit(self) -> u8 {
        u8::from(self.is_high())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullMode {
    Up,
    Down,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// whether a `from -> to` transition fires this edge
    pub fn matches(self, from: Level, to: Level) -> bool {
        match self {
            Edge::Rising => from == Level::Low && to == Level::High,
            Edge::Falling => from == Level::High && to == Level::Low,
            Edge::Both => from != to,
        }
    }
}

/// Called with the line level after a qualifying edge.
///
/// may run on an interrupt thread owned by the backend.
pub type EdgeHandler = Arc<dyn Fn(Level) + Send + Sync + 'static>;

pub trait HardwareProvider: Send + Sync {
    /// device directories under the bus whose name starts with `prefix`.
    /// an absent bus is an empty list, not an error.
    fn list_device_dirs(&self, prefix: &str) -> Result<Vec<PathBuf>>;
    fn read_raw_payload(&self, path: &Path) -> Result<String>;
    fn setup_output(&self, pin: u8, initial: Level) -> Result<()>;
    fn setup_input(&self, pin: u8, pull: PullMode) -> Result<()>;
    fn set_output_level(&self, pin: u8, level: Level) -> Result<()>;
    /// current level of a configured pin (outputs read back what was driven)
    fn read_level(&self, pin: u8) -> Option<Level>;
    fn subscribe_edge(&self, pin: u8, edge: Edge, debounce: Duration, handler: EdgeHandler) -> Result<()>;
    /// drop interrupts and hand the pins back to the system
    fn release(&self);
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ==============================================================================================
// 1-WIRE SYSFS (shared by both backends)
// ==============================================================================================
// the w1-gpio kernel driver exposes every slave as /sys/bus/w1/devices/<id>/.
// DS18B20 ids start with the "28-" family code.

fn list_w1_dirs(base: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if !base.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(base).with_context(|| format!("listing {}", base.display()))? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn read_w1_payload(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For WSL / Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
struct MockPin {
    level: Level,
    watch: Option<(Edge, EdgeHandler)>,
}

#[cfg(not(feature = "hardware"))]
pub struct Hal {
    w1_base: PathBuf,
    pins: Mutex<std::collections::HashMap<u8, MockPin>>,
}

#[cfg(not(feature = "hardware"))]
impl Hal {
    pub fn new(w1_base: impl Into<PathBuf>) -> Result<Self> {
        tracing::info!("Using MOCK HAL (No gpio access)");
        Ok(Self {
            w1_base: w1_base.into(),
            pins: Mutex::new(std::collections::HashMap::new()),
        })
    }

    /// drive a mocked input line, firing its edge handler like an interrupt would
    pub fn simulate_input(&self, pin: u8, level: Level) {
        let fire = {
            let mut pins = lock(&self.pins);
            let entry = pins.entry(pin).or_insert(MockPin { level: Level::Low, watch: None });
            let previous = entry.level;
            entry.level = level;
            match &entry.watch {
                Some((edge, handler)) if edge.matches(previous, level) => Some(handler.clone()),
                _ => None,
            }
        };
        tracing::debug!("[MOCK GPIO] Pin {} input {:?}", pin, level);
        if let Some(handler) = fire {
            handler(level);
        }
    }
}

#[cfg(not(feature = "hardware"))]
impl HardwareProvider for Hal {
    fn list_device_dirs(&self, prefix: &str) -> Result<Vec<PathBuf>> {
        list_w1_dirs(&self.w1_base, prefix)
    }

    fn read_raw_payload(&self, path: &Path) -> Result<String> {
        read_w1_payload(path)
    }

    fn setup_output(&self, pin: u8, initial: Level) -> Result<()> {
        tracing::debug!("[MOCK GPIO] Pin {} output, initial {:?}", pin, initial);
        lock(&self.pins).insert(pin, MockPin { level: initial, watch: None });
        Ok(())
    }

    fn setup_input(&self, pin: u8, pull: PullMode) -> Result<()> {
        tracing::debug!("[MOCK GPIO] Pin {} input, pull {:?}", pin, pull);
        let level = if pull == PullMode::Up { Level::High } else { Level::Low };
        lock(&self.pins).insert(pin, MockPin { level, watch: None });
        Ok(())
    }

    fn set_output_level(&self, pin: u8, level: Level) -> Result<()> {
        tracing::debug!("[MOCK GPIO] Pin {} write {:?}", pin, level);
        let mut pins = lock(&self.pins);
        let entry = pins
            .get_mut(&pin)
            .ok_or_else(|| anyhow::anyhow!("pin {} is not set up", pin))?;
        entry.level = level;
        Ok(())
    }

    fn read_level(&self, pin: u8) -> Option<Level> {
        lock(&self.pins).get(&pin).map(|p| p.level)
    }

    fn subscribe_edge(&self, pin: u8, edge: Edge, debounce: Duration, handler: EdgeHandler) -> Result<()> {
        tracing::debug!("[MOCK GPIO] Pin {} watching {:?} edges ({:?} debounce)", pin, edge, debounce);
        let mut pins = lock(&self.pins);
        let entry = pins
            .get_mut(&pin)
            .ok_or_else(|| anyhow::anyhow!("pin {} is not set up as input", pin))?;
        entry.watch = Some((edge, handler));
        Ok(())
    }

    fn release(&self) {
        tracing::debug!("[MOCK GPIO] Releasing all pins");
        lock(&self.pins).clear();
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Hal {
    w1_base: PathBuf,
    gpio: rppal::gpio::Gpio,
    outputs: Mutex<std::collections::HashMap<u8, rppal::gpio::OutputPin>>,
    inputs: Mutex<std::collections::HashMap<u8, rppal::gpio::InputPin>>,
}

#[cfg(feature = "hardware")]
impl Hal {
    pub fn new(w1_base: impl Into<PathBuf>) -> Result<Self> {
        tracing::info!("Using REAL HARDWARE HAL (rppal)");
        let gpio = rppal::gpio::Gpio::new().context("opening /dev/gpiomem")?;
        Ok(Self {
            w1_base: w1_base.into(),
            gpio,
            outputs: Mutex::new(std::collections::HashMap::new()),
            inputs: Mutex::new(std::collections::HashMap::new()),
        })
    }
}

#[cfg(feature = "hardware")]
impl From<Level> for rppal::gpio::Level {
    fn from(level: Level) -> Self {
        match level {
            Level::High => rppal::gpio::Level::High,
            Level::Low => rppal::gpio::Level::Low,
        }
    }
}

#[cfg(feature = "hardware")]
impl From<rppal::gpio::Level> for Level {
    fn from(level: rppal::gpio::Level) -> Self {
        match level {
            rppal::gpio::Level::High => Level::High,
            rppal::gpio::Level::Low => Level::Low,
        }
    }
}

#[cfg(feature = "hardware")]
impl HardwareProvider for Hal {
    fn list_device_dirs(&self, prefix: &str) -> Result<Vec<PathBuf>> {
        list_w1_dirs(&self.w1_base, prefix)
    }

    fn read_raw_payload(&self, path: &Path) -> Result<String> {
        read_w1_payload(path)
    }

    fn setup_output(&self, pin: u8, initial: Level) -> Result<()> {
        let p = self.gpio.get(pin)?;
        let out = match initial {
            Level::High => p.into_output_high(),
            Level::Low => p.into_output_low(),
        };
        lock(&self.outputs).insert(pin, out);
        Ok(())
    }

    fn setup_input(&self, pin: u8, pull: PullMode) -> Result<()> {
        let p = self.gpio.get(pin)?;
        let input = match pull {
            PullMode::Up => p.into_input_pullup(),
            PullMode::Down => p.into_input_pulldown(),
            PullMode::Off => p.into_input(),
        };
        lock(&self.inputs).insert(pin, input);
        Ok(())
    }

    fn set_output_level(&self, pin: u8, level: Level) -> Result<()> {
        let mut outputs = lock(&self.outputs);
        let out = outputs
            .get_mut(&pin)
            .ok_or_else(|| anyhow::anyhow!("pin {} is not set up as output", pin))?;
        out.write(level.into());
        Ok(())
    }

    fn read_level(&self, pin: u8) -> Option<Level> {
        if let Some(out) = lock(&self.outputs).get(&pin) {
            return Some(if out.is_set_high() { Level::High } else { Level::Low });
        }
        lock(&self.inputs).get(&pin).map(|input| input.read().into())
    }

    fn subscribe_edge(&self, pin: u8, edge: Edge, debounce: Duration, handler: EdgeHandler) -> Result<()> {
        use rppal::gpio::Trigger;

        let trigger = match edge {
            Edge::Rising => Trigger::RisingEdge,
            Edge::Falling => Trigger::FallingEdge,
            Edge::Both => Trigger::Both,
        };
        let mut inputs = lock(&self.inputs);
        let input = inputs
            .get_mut(&pin)
            .ok_or_else(|| anyhow::anyhow!("pin {} is not set up as input", pin))?;
        input.set_async_interrupt(trigger, Some(debounce), move |event| {
            let level = match event.trigger {
                Trigger::RisingEdge => Level::High,
                Trigger::FallingEdge => Level::Low,
                _ => return,
            };
            handler(level);
        })?;
        Ok(())
    }

    fn release(&self) {
        for input in lock(&self.inputs).values_mut() {
            if let Err(e) = input.clear_async_interrupt() {
                tracing::warn!("clearing interrupt on pin {} failed: {}", input.pin(), e);
            }
        }
        // rppal resets each pin to its previous mode on drop
        lock(&self.inputs).clear();
        lock(&self.outputs).clear();
    }
}
