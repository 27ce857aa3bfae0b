//! ==============================================================================
//! telemetry.rs - outbound telemetry
//! ==============================================================================
//!
//! purpose:
//!     the sampling loop pushes snapshots through [`TelemetrySink`]. pushing
//!     never blocks and never fails the tick.
//!
//! relationships:
//!     - used by: sampler.rs (snapshots, sink errors)
//!     - used by: web.rs (subscribes and forwards events as sse)
//!
//! ==============================================================================

use crate::domain::Snapshot;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Telemetry(Snapshot),
    TelemetryError { error: String },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::Telemetry(_) => "telemetry",
            TelemetryEvent::TelemetryError { .. } => "telemetry_error",
        }
    }
}

pub trait TelemetrySink: Send + Sync {
    /// fire-and-forget
    fn push_snapshot(&self, snapshot: Snapshot);
    /// internal error event (sink failures, log append failures)
    fn report_error(&self, error: String);
}

#[derive(Clone)]
pub struct BroadcastTelemetry {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl BroadcastTelemetry {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: TelemetryEvent) {
        // no subscribers is the normal state with no dashboard open
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("telemetry dropped: {} (no subscribers)", e.0.name());
        }
    }
}

impl TelemetrySink for BroadcastTelemetry {
    fn push_snapshot(&self, snapshot: Snapshot) {
        self.publish(TelemetryEvent::Telemetry(snapshot));
    }

    fn report_error(&self, error: String) {
        self.publish(TelemetryEvent::TelemetryError { error });
    }
}
