//! ==============================================================================
//! web.rs - dashboard and json api
//! ==============================================================================
//!
//! routes:
//!     GET  /              html dashboard (live via /api/stream)
//!     GET  /api/status    latest snapshot as json
//!     POST /api/bomba     {"action": "on"|"off"} manual pump command
//!     POST /api/relev     {"action": "on"|"off"} manual relay V command
//!     POST /api/discover  re-scan the 1-wire bus
//!     GET  /api/stream    server-sent events: telemetry / telemetry_error
//!
//! the web layer only reads copies of the live state and forwards commands
//! to the controller; it never touches the sampling loop.
//!
//! ==============================================================================

use crate::controller::Action;
use crate::domain::Snapshot;
use crate::error::CommandError;
use crate::sampler::SharedState;
use crate::telemetry::{BroadcastTelemetry, TelemetryEvent};
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, Json,
    },
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct WebState {
    pub shared: SharedState,
    pub telemetry: BroadcastTelemetry,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api/status", get(status_handler))
        .route("/api/bomba", post(pump_handler))
        .route("/api/relev", post(relay_handler))
        .route("/api/discover", post(discover_handler))
        .route("/api/stream", get(stream_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(bind: &str, state: WebState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("[STARTUP] ✓ Dashboard live at http://{}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn status_handler(State(state): State<WebState>) -> Json<Snapshot> {
    Json(state.shared.snapshot().await)
}

/// command params
#[derive(Deserialize, Default)]
struct CommandBody {
    action: Option<String>,
}

/// a missing or unparseable body counts as a malformed action
fn parse_action(body: &[u8]) -> Result<Action, CommandError> {
    let body: CommandBody = serde_json::from_slice(body).unwrap_or_default();
    body.action.as_deref().unwrap_or_default().parse()
}

fn rejected(e: CommandError) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({"ok": false, "error": e.to_string()})))
}

async fn pump_handler(State(state): State<WebState>, body: Bytes) -> (StatusCode, Json<Value>) {
    let action = match parse_action(&body) {
        Ok(action) => action,
        Err(e) => return rejected(e),
    };
    let controller = &state.shared.controller;
    controller.set_pump(action.is_on());
    (StatusCode::OK, Json(json!({"ok": true, "gpio": controller.gpio_status()})))
}

async fn relay_handler(State(state): State<WebState>, body: Bytes) -> (StatusCode, Json<Value>) {
    let controller = &state.shared.controller;
    if !controller.has_secondary_relay() {
        return rejected(CommandError::RelayUnavailable);
    }
    let result = parse_action(&body).and_then(|action| controller.set_secondary_relay(action.is_on()));
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({"ok": true, "gpio": controller.gpio_status()}))),
        Err(e) => rejected(e),
    }
}

async fn discover_handler(State(state): State<WebState>) -> Json<Value> {
    tracing::info!("re-discovery requested");
    let table = state.shared.discover().await;
    Json(json!({"ok": true, "slots": table.slots()}))
}

/// current snapshot first, then every event the loop publishes
async fn stream_handler(State(state): State<WebState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.telemetry.subscribe();
    let current = TelemetryEvent::Telemetry(state.shared.snapshot().await);
    // lagged receivers just skip what they missed
    let updates = BroadcastStream::new(rx).filter_map(|msg| msg.ok());
    let stream = tokio_stream::once(current).chain(updates).map(|event| Ok(to_sse(&event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &TelemetryEvent) -> Event {
    let encoded = match event {
        TelemetryEvent::Telemetry(snapshot) => Event::default().json_data(snapshot),
        TelemetryEvent::TelemetryError { error } => Event::default().json_data(json!({ "error": error })),
    };
    match encoded {
        Ok(sse) => sse.event(event.name()),
        Err(e) => Event::default().comment(format!("encode error: {}", e)),
    }
}

async fn dashboard_handler(State(state): State<WebState>) -> Html<String> {
    let rows: String = state
        .shared
        .aliases()
        .iter()
        .map(|alias| {
            let alias = html_escape(alias);
            format!(r#"<tr><td>{alias}</td><td id="t-{alias}">N/A</td></tr>"#)
        })
        .collect();
    let threshold = state.shared.controller.threshold();
    Html(DASHBOARD_TEMPLATE.replace("{rows}", &rows).replace("{threshold}", &format!("{:.2}", threshold)))
}

const DASHBOARD_TEMPLATE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>pump host</title></head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
  <h1>DS18B20 monitor</h1>
  <p>threshold: {threshold} °C · last update: <span id="ts">-</span></p>
  <table>{rows}<tr><td><b>avg</b></td><td id="avg">N/A</td></tr></table>
  <p>pump: <span id="bomba">-</span> · relay V: <span id="relay_v">-</span> · trigger: <span id="trigger">-</span></p>
  <p>
    <button onclick="cmd('/api/bomba','on')">pump on</button>
    <button onclick="cmd('/api/bomba','off')">pump off</button>
    <button onclick="cmd('/api/relev','on')">relay V on</button>
    <button onclick="cmd('/api/relev','off')">relay V off</button>
  </p>
  <pre id="err" style="color: #ff6b6b;"></pre>
<script>
const fmt = v => v === null || v === undefined ? 'N/A' : Number(v).toFixed(3);
const lvl = v => v === null || v === undefined ? 'n/a' : String(v);
function cmd(url, action) {
  fetch(url, {method: 'POST', headers: {'Content-Type': 'application/json'}, body: JSON.stringify({action})});
}
const es = new EventSource('/api/stream');
es.addEventListener('telemetry', e => {
  const s = JSON.parse(e.data);
  for (const [alias, t] of Object.entries(s.temps)) {
    const cell = document.getElementById('t-' + alias);
    if (cell) cell.textContent = fmt(t);
  }
  document.getElementById('avg').textContent = fmt(s.avg);
  document.getElementById('ts').textContent = s.ts || '-';
  for (const k of ['bomba', 'relay_v', 'trigger']) document.getElementById(k).textContent = lvl(s.gpio[k]);
});
es.addEventListener('telemetry_error', e => {
  document.getElementById('err').textContent = JSON.parse(e.data).error;
});
</script>
</body>
</html>"#;

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
