//! ==============================================================================
//! controller.rs - pump and relay V state machines
//! ==============================================================================
//! ```text
//!
//! purpose:
//!     owns the logical actuator state and is the only thing that writes the
//!     relay outputs.
//!
//!     pump:     ON iff the average is present and strictly above the
//!               threshold. re-evaluated from scratch every tick (optional
//!               hysteresis band, off by default).
//!     relay V:  follows the trigger input level. high -> ON, low -> OFF.
//!               driven by the edge interrupt, never by the tick.
//!
//! concurrency:
//!     the tick, the edge interrupt thread and dashboard commands all land
//!     here. one mutex guards the state and is held across the matching pin
//!     write so logical and electrical order agree.
//!
//! failure semantics:
//!     a failed pin write is logged and the logical target is still recorded.
//!     the readback in gpio_status() shows any divergence.
//!
//! ```
//! ==============================================================================

use crate::config::{ControlConfig, GpioConfig, OutputPinConfig, TriggerConfig};
use crate::domain::{ActuatorState, GpioStatus};
use crate::error::CommandError;
use crate::hal::{lock, Edge, EdgeHandler, HardwareProvider, Level};
use anyhow::{Context, Result};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// on/off request coming from the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    On,
    Off,
}

impl Action {
    pub fn is_on(self) -> bool {
        matches!(self, Action::On)
    }
}

impl FromStr for Action {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Action::On),
            "off" => Ok(Action::Off),
            _ => Err(CommandError::InvalidAction),
        }
    }
}

/// threshold rule for the pump
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpLaw {
    pub threshold: f64,
    pub hysteresis: f64,
}

impl PumpLaw {
    pub fn decide(&self, average: Option<f64>, currently_on: bool) -> bool {
        let Some(avg) = average else {
            return false;
        };
        if avg > self.threshold {
            return true;
        }
        currently_on && self.hysteresis > 0.0 && avg > self.threshold - self.hysteresis
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: ActuatorState,
    trigger: Option<Level>,
    /// set by all_off; outputs stay inactive from then on
    halted: bool,
}

pub struct ActuatorController {
    hal: Arc<dyn HardwareProvider>,
    pump: OutputPinConfig,
    relay_v: Option<OutputPinConfig>,
    trigger: Option<TriggerConfig>,
    law: PumpLaw,
    inner: Mutex<Inner>,
}

impl ActuatorController {
    pub fn new(hal: Arc<dyn HardwareProvider>, gpio: &GpioConfig, control: &ControlConfig) -> Self {
        Self {
            hal,
            pump: gpio.pump,
            relay_v: gpio.relay_v,
            trigger: gpio.trigger,
            law: PumpLaw { threshold: control.threshold_c, hysteresis: control.hysteresis_c },
            inner: Mutex::new(Inner::default()),
        }
    }

    /// claim the pins, outputs start inactive. failure here is fatal to startup.
    pub fn setup(self: &Arc<Self>) -> Result<()> {
        self.hal
            .setup_output(self.pump.pin, self.pump.inactive())
            .with_context(|| format!("pump output on gpio {}", self.pump.pin))?;
        if let Some(relay) = self.relay_v {
            self.hal
                .setup_output(relay.pin, relay.inactive())
                .with_context(|| format!("relay V output on gpio {}", relay.pin))?;
        }
        if let Some(trigger) = self.trigger {
            self.attach_trigger(trigger)?;
        }
        Ok(())
    }

    fn attach_trigger(self: &Arc<Self>, trigger: TriggerConfig) -> Result<()> {
        self.hal
            .setup_input(trigger.pin, trigger.pull)
            .with_context(|| format!("trigger input on gpio {}", trigger.pin))?;

        // weak: the hal keeps the handler for the life of the process
        let controller = Arc::downgrade(self);
        let handler: EdgeHandler = Arc::new(move |level| {
            if let Some(controller) = controller.upgrade() {
                controller.on_trigger_level(level);
            }
        });
        self.hal
            .subscribe_edge(trigger.pin, Edge::Both, Duration::from_millis(trigger.debounce_ms), handler)
            .with_context(|| format!("edge interrupt on gpio {}", trigger.pin))?;

        if let Some(level) = self.hal.read_level(trigger.pin) {
            self.on_trigger_level(level);
        }
        Ok(())
    }

    /// tick path: evaluate the pump law and drive the relay. returns the new pump state.
    pub fn apply_average(&self, average: Option<f64>) -> bool {
        let mut inner = lock(&self.inner);
        if inner.halted {
            tracing::debug!("controller halted, pump evaluation skipped");
            return false;
        }
        let on = self.law.decide(average, inner.state.pump);
        self.drive(&self.pump, on, "pump");
        inner.state.pump = on;
        on
    }

    /// manual override; holds only until the next tick re-evaluates
    pub fn set_pump(&self, on: bool) {
        let mut inner = lock(&self.inner);
        if inner.halted {
            tracing::debug!("controller halted, pump {} command ignored", on_off(on));
            return;
        }
        self.drive(&self.pump, on, "pump");
        inner.state.pump = on;
        tracing::info!("pump set {} by command", on_off(on));
    }

    pub fn set_secondary_relay(&self, on: bool) -> Result<(), CommandError> {
        let relay = self.relay_v.ok_or(CommandError::RelayUnavailable)?;
        let mut inner = lock(&self.inner);
        if inner.halted {
            tracing::debug!("controller halted, relay V {} command ignored", on_off(on));
            return Ok(());
        }
        self.drive(&relay, on, "relay V");
        inner.state.secondary_relay = on;
        tracing::info!("relay V set {} by command", on_off(on));
        Ok(())
    }

    /// edge path: relay V mirrors the trigger level
    pub fn on_trigger_level(&self, level: Level) {
        let mut inner = lock(&self.inner);
        inner.trigger = Some(level);
        let on = level.is_high();
        if inner.halted {
            tracing::debug!("controller halted, trigger {:?} ignored", level);
            return;
        }
        if let Some(relay) = self.relay_v {
            self.drive(&relay, on, "relay V");
            inner.state.secondary_relay = on;
        }
        tracing::debug!("trigger {:?} -> relay V {}", level, on_off(on));
    }

    pub fn state(&self) -> ActuatorState {
        lock(&self.inner).state
    }

    pub fn trigger_level(&self) -> Option<Level> {
        lock(&self.inner).trigger
    }

    pub fn threshold(&self) -> f64 {
        self.law.threshold
    }

    pub fn has_secondary_relay(&self) -> bool {
        self.relay_v.is_some()
    }

    /// electrical levels as the hardware reports them right now
    pub fn gpio_status(&self) -> GpioStatus {
        let read = |pin: Option<u8>| pin.and_then(|p| self.hal.read_level(p)).map(Level::as_bit);
        GpioStatus {
            bomba: read(Some(self.pump.pin)),
            relay_v: read(self.relay_v.map(|r| r.pin)),
            trigger: read(self.trigger.map(|t| t.pin)),
        }
    }

    /// drive every output to its inactive level and ignore later requests (shutdown path)
    pub fn all_off(&self) {
        let mut inner = lock(&self.inner);
        inner.halted = true;
        self.drive(&self.pump, false, "pump");
        inner.state.pump = false;
        if let Some(relay) = self.relay_v {
            self.drive(&relay, false, "relay V");
            inner.state.secondary_relay = false;
        }
    }

    fn drive(&self, output: &OutputPinConfig, on: bool, name: &str) {
        if let Err(e) = self.hal.set_output_level(output.pin, output.level_for(on)) {
            tracing::error!("{} write {} failed on gpio {}: {:#}", name, on_off(on), output.pin, e);
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}
