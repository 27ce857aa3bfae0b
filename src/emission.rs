//! ==============================================================================
//! emission.rs - telemetry gating
//! ==============================================================================
//!
//! purpose:
//!     decides which samples are pushed to the dashboard. gated mode emits
//!     when the emission interval has elapsed, when any sensor moved more than
//!     epsilon from the last *emitted* value, or when the average did.
//!     a sensor appearing or disappearing counts as a move.
//!
//! relationships:
//!     - used by: sampler.rs (after each tick is published)
//!
//! ==============================================================================

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmissionPolicy {
    EveryTick,
    Gated,
}

#[derive(Debug)]
pub struct EmissionGate {
    policy: EmissionPolicy,
    interval: Duration,
    epsilon: f64,
    last_emit: Option<Instant>,
    last_temps: Option<BTreeMap<String, f64>>,
    last_average: Option<f64>,
}

impl EmissionGate {
    pub fn new(policy: EmissionPolicy, interval: Duration, epsilon: f64) -> Self {
        Self {
            policy,
            interval,
            epsilon,
            last_emit: None,
            last_temps: None,
            last_average: None,
        }
    }

    pub fn should_emit(&self, now: Instant, temps: &BTreeMap<String, Option<f64>>, average: Option<f64>) -> bool {
        if self.policy == EmissionPolicy::EveryTick {
            return true;
        }
        let Some(last) = self.last_emit else {
            return true;
        };
        now.saturating_duration_since(last) >= self.interval
            || self.temps_changed(temps)
            || self.average_changed(average)
    }

    /// remember what was just pushed
    pub fn record(&mut self, now: Instant, temps: &BTreeMap<String, Option<f64>>, average: Option<f64>) {
        self.last_emit = Some(now);
        self.last_temps = Some(
            temps
                .iter()
                .filter_map(|(alias, t)| t.map(|t| (alias.clone(), t)))
                .collect(),
        );
        self.last_average = average;
    }

    fn temps_changed(&self, temps: &BTreeMap<String, Option<f64>>) -> bool {
        let Some(previous) = &self.last_temps else {
            return true;
        };
        temps.iter().any(|(alias, current)| match (previous.get(alias), current) {
            (Some(old), Some(new)) => (new - old).abs() > self.epsilon,
            (None, None) => false,
            _ => true,
        })
    }

    // only compared when both values are present and non-zero
    fn average_changed(&self, average: Option<f64>) -> bool {
        match (self.last_average, average) {
            (Some(old), Some(new)) if old != 0.0 && new != 0.0 => (new - old).abs() > self.epsilon,
            _ => false,
        }
    }
}
