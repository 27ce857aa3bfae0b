//! ==============================================================================
//! main.rs - pump host entry point
//! ==============================================================================
//!
//! purpose:
//!     samples three DS18B20 sensors, averages the valid readings and switches
//!     the pump relay when the average crosses the threshold. a trigger input
//!     is mirrored onto relay V. a small dashboard shows it all live.
//!
//! responsibilities:
//!     - load configuration and start logging
//!     - acquire gpio (fatal if unavailable) and put outputs in a safe state
//!     - discover sensors and open the per-run csv file
//!     - run the sampling loop and the web server side by side
//!     - on SIGINT/SIGTERM (or any early exit) drive outputs inactive and
//!       release the pins
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    rust host (this file)                     │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ sample loop │  │ web server  │  │ trigger interrupt   │  │
//!     │  │ (5s cycle)  │  │ (port 5000) │  │ (hal thread)        │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         │                │                    │             │
//!     │         └────────────────┼────────────────────┘             │
//!     │                    ┌─────┴──────┐                           │
//!     │                    │ controller │ <- controller.rs          │
//!     │                    └─────┬──────┘                           │
//!     └──────────────────────────┼──────────────────────────────────┘
//!                                │ HardwareProvider
//!                    ┌───────────┴───────────┐
//!                    ▼                       ▼
//!             ┌─────────────┐         ┌─────────────┐
//!             │ 1-wire bus  │         │ gpio relays │
//!             │  (sysfs)    │         │  (rppal)    │
//!             └─────────────┘         └─────────────┘
//!
//! ==============================================================================

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use pump_host::config::HostConfig;
use pump_host::controller::ActuatorController;
use pump_host::emission::{EmissionGate, EmissionPolicy};
use pump_host::hal::{Hal, HardwareProvider};
use pump_host::log_sink::CsvMeasurementLog;
use pump_host::sampler::{Sampler, SharedState};
use pump_host::sensor::SensorReader;
use pump_host::telemetry::BroadcastTelemetry;
use pump_host::web::{self, WebState};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "pump-host", about = "DS18B20 monitor and pump controller")]
struct Args {
    /// config file (default: config/pump.toml, then ../config/pump.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

// ==============================================================================
// safe outputs guard
// ==============================================================================
// dropped on every way out of main (normal return, `?`, panic unwind):
// relays go to their inactive level first, then the pins are released.

struct OutputGuard {
    controller: Arc<ActuatorController>,
    hal: Arc<dyn HardwareProvider>,
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        self.controller.all_off();
        self.hal.release();
        tracing::info!("[SHUTDOWN] outputs inactive, gpio released");
    }
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // config is read before logging is up so its level can seed the filter;
    // load messages go through a temporary default subscriber
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt().finish(),
        || HostConfig::load_or_default(args.config.as_deref()),
    )?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .init();

    tracing::info!("===========================================================");
    tracing::info!("  DS18B20 Pump Host");
    tracing::info!("===========================================================");
    config.log_summary();

    // step 1: hardware. the only fatal failures live here
    let hal: Arc<dyn HardwareProvider> = Arc::new(Hal::new(config.sensors.w1_base.clone())?);
    let controller = Arc::new(ActuatorController::new(hal.clone(), &config.gpio, &config.control));
    let _guard = OutputGuard { controller: controller.clone(), hal: hal.clone() };
    controller.setup()?;
    tracing::info!("[STARTUP] ✓ GPIO ready");

    // step 2: sensors
    let reader = SensorReader::new(
        hal.clone(),
        config.sensors.family_prefix.clone(),
        config.sensors.read_retries,
        config.sensors.retry_delay(),
    );
    let shared = SharedState::new(controller.clone(), reader, config.sensors.aliases.clone());
    tracing::info!("Sensor mapping (alias -> id):");
    shared.discover().await;

    // step 3: sinks
    let log = CsvMeasurementLog::create(&config.storage.measurements_dir, Local::now(), shared.aliases())?;
    tracing::info!("[STARTUP] ✓ Measurements -> {}", log.path().display());
    let telemetry = BroadcastTelemetry::new(config.telemetry.channel_capacity);

    // step 4: web server in background
    if config.web.enabled {
        let web_state = WebState { shared: shared.clone(), telemetry: telemetry.clone() };
        let bind = config.web.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = web::run_server(&bind, web_state).await {
                tracing::error!("[ERROR] Web server error: {:#}", e);
            }
        });
    }

    // step 5: sampling loop until a signal arrives
    let policy = if config.telemetry.gated { EmissionPolicy::Gated } else { EmissionPolicy::EveryTick };
    let gate = EmissionGate::new(policy, config.telemetry.emit_interval(), config.telemetry.change_epsilon_c);
    let sampler = Sampler::new(shared, Box::new(log), Arc::new(telemetry), gate, config.sampling.interval())
        .show_sensor_data(config.logging.show_sensor_data);

    let signal = shutdown_signal()?;
    tokio::select! {
        _ = sampler.run() => {}
        reason = signal => {
            tracing::warn!(signal = reason, "shutting down - turning outputs off");
        }
    }

    Ok(())
}

/// resolves with the name of the first termination signal received
fn shutdown_signal() -> Result<impl std::future::Future<Output = &'static str>> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(async move {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    })
}
