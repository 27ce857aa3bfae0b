//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `pump.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - SamplingConfig: how often the loop reads the sensors.
//!     - TelemetryConfig: gated vs ungated emission, interval and epsilon.
//!     - ControlConfig: pump threshold and optional hysteresis band.
//!     - SensorsConfig: 1-wire bus path, family prefix, aliases, retries.
//!     - GpioConfig: pump relay, optional relay V and optional trigger input.
//!     - StorageConfig / WebConfig / LoggingConfig: the sinks around the loop.
//!
//! ==============================================================================

use crate::error::ConfigError;
use crate::hal::{Level, PullMode};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub sampling: SamplingConfig,
    pub telemetry: TelemetryConfig,
    pub control: ControlConfig,
    pub sensors: SensorsConfig,
    pub gpio: GpioConfig,
    pub storage: StorageConfig,
    pub web: WebConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval_seconds: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    /// false = push a snapshot on every tick
    pub gated: bool,
    pub emit_interval_seconds: f64,
    pub change_epsilon_c: f64,
    /// broadcast buffer for slow dashboard clients
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControlConfig {
    /// pump ON when the average is strictly above this value (°C)
    pub threshold_c: f64,
    /// 0.0 disables the band
    pub hysteresis_c: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorsConfig {
    pub w1_base: PathBuf,
    pub family_prefix: String,
    pub aliases: Vec<String>,
    pub read_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct OutputPinConfig {
    pub pin: u8,
    pub active_level: Level,
}

impl OutputPinConfig {
    pub fn active(&self) -> Level {
        self.active_level
    }

    pub fn inactive(&self) -> Level {
        self.active_level.inverse()
    }

    /// electrical level for a logical on/off
    pub fn level_for(&self, on: bool) -> Level {
        if on { self.active() } else { self.inactive() }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    pub pin: u8,
    #[serde(default = "default_pull")]
    pub pull: PullMode,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_pull() -> PullMode {
    PullMode::Down
}

fn default_debounce_ms() -> u64 {
    150
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GpioConfig {
    pub pump: OutputPinConfig,
    /// secondary relay ("relay V"). without a [gpio] section the wiring
    /// defaults apply; inside one, a missing table means not fitted.
    #[serde(default)]
    pub relay_v: Option<OutputPinConfig>,
    #[serde(default)]
    pub trigger: Option<TriggerConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub measurements_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { interval_seconds: 5.0 }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            gated: true,
            emit_interval_seconds: 4.0,
            change_epsilon_c: 0.05,
            channel_capacity: 64,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { threshold_c: 22.0, hysteresis_c: 0.0 }
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            w1_base: PathBuf::from("/sys/bus/w1/devices"),
            family_prefix: "28-".to_string(),
            aliases: vec!["sensor_1".to_string(), "sensor_2".to_string(), "sensor_3".to_string()],
            read_retries: 3,
            retry_delay_ms: 200,
        }
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            pump: OutputPinConfig { pin: 27, active_level: Level::High },
            relay_v: Some(OutputPinConfig { pin: 22, active_level: Level::High }),
            trigger: Some(TriggerConfig { pin: 23, pull: PullMode::Down, debounce_ms: 150 }),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { measurements_dir: PathBuf::from("mediciones") }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { enabled: true, bind: "0.0.0.0:5000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_seconds)
    }
}

impl TelemetryConfig {
    pub fn emit_interval(&self) -> Duration {
        Duration::from_secs_f64(self.emit_interval_seconds)
    }
}

impl SensorsConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: HostConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// an explicit path must load; the search paths only warn.
    pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            let config = Self::load(path)?;
            tracing::info!("[CONFIG] Loaded from {}", path.display());
            return Ok(config);
        }

        let paths = [
            PathBuf::from("config").join("pump.toml"),
            PathBuf::from("..").join("config").join("pump.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!("[CONFIG] Loaded from {}", path.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("[CONFIG] Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        tracing::warn!("[CONFIG] No config file found - using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &'static str, value: f64| {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { field, value });
            }
            // interval()/emit_interval() convert without checking
            Duration::try_from_secs_f64(value).map_err(|_| ConfigError::TooLarge { field, value })?;
            Ok(())
        };
        positive("sampling.interval_seconds", self.sampling.interval_seconds)?;
        positive("telemetry.emit_interval_seconds", self.telemetry.emit_interval_seconds)?;

        if !(self.telemetry.change_epsilon_c >= 0.0) {
            return Err(ConfigError::Negative {
                field: "telemetry.change_epsilon_c",
                value: self.telemetry.change_epsilon_c,
            });
        }
        if !(self.control.hysteresis_c >= 0.0) {
            return Err(ConfigError::Negative {
                field: "control.hysteresis_c",
                value: self.control.hysteresis_c,
            });
        }
        if self.sensors.aliases.len() != crate::domain::SLOT_COUNT {
            return Err(ConfigError::AliasCount(self.sensors.aliases.len()));
        }
        if self.sensors.read_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.telemetry.channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        let mut seen = HashSet::new();
        let pins = std::iter::once(self.gpio.pump.pin)
            .chain(self.gpio.relay_v.map(|r| r.pin))
            .chain(self.gpio.trigger.map(|t| t.pin));
        for pin in pins {
            if !seen.insert(pin) {
                return Err(ConfigError::DuplicatePin(pin));
            }
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        let optional_pin = |pin: Option<u8>| pin.map_or_else(|| "-".to_string(), |p| p.to_string());
        tracing::info!("┌─────────────────────────────────────────┐");
        tracing::info!("│           HOST CONFIGURATION            │");
        tracing::info!("├─────────────────────────────────────────┤");
        tracing::info!("│ Sample Interval: {}s", self.sampling.interval_seconds);
        tracing::info!("│ Threshold: {:.2} °C (hysteresis {:.2})", self.control.threshold_c, self.control.hysteresis_c);
        tracing::info!(
            "│ Telemetry: {} (every {}s or Δ>{} °C)",
            if self.telemetry.gated { "gated" } else { "every tick" },
            self.telemetry.emit_interval_seconds,
            self.telemetry.change_epsilon_c
        );
        tracing::info!("│ Pump Pin: {} (active {:?})", self.gpio.pump.pin, self.gpio.pump.active_level);
        tracing::info!("│ Relay V Pin: {}", optional_pin(self.gpio.relay_v.map(|r| r.pin)));
        tracing::info!("│ Trigger Pin: {}", optional_pin(self.gpio.trigger.map(|t| t.pin)));
        tracing::info!("│ Log Level: {}", self.logging.level);
        tracing::info!("└─────────────────────────────────────────┘");
    }
}
