//! DS18B20 sampling and pump control for a Raspberry Pi.
//!
//! Leaves first: [`hal`] (bus and pins), [`sensor`] (discovery, validated
//! reads), [`aggregate`] (mean of valid readings), [`controller`] (pump and
//! relay V state machines), [`emission`] (telemetry gating), and
//! [`sampler`] which runs them in order every tick. [`log_sink`],
//! [`telemetry`] and [`web`] are the sinks around the loop.

pub mod aggregate;
pub mod config;
pub mod controller;
pub mod domain;
pub mod emission;
pub mod error;
pub mod hal;
pub mod log_sink;
pub mod sampler;
pub mod sensor;
pub mod telemetry;
pub mod web;
