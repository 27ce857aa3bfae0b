//! ==============================================================================
//! log_sink.rs - per-run csv measurement log
//! ==============================================================================
//!
//! purpose:
//!     one file per process run, `<dir>/YYYY-MM-DD_HH-MM-SS_temperaturas.csv`.
//!     header written once, one record appended per sample. fields go through
//!     the csv writer so aliases with commas or quotes stay one column.
//!
//! relationships:
//!     - used by: sampler.rs (through the SampleSink trait), main.rs
//!
//! ==============================================================================

use crate::domain::{Sample, TIMESTAMP_FORMAT};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// where finished samples are recorded
pub trait SampleSink: Send {
    fn append(&mut self, sample: &Sample) -> Result<()>;
}

pub struct CsvMeasurementLog {
    path: PathBuf,
}

impl CsvMeasurementLog {
    /// create the directory and the file with its header
    pub fn create(dir: &Path, started: DateTime<Local>, aliases: &[String]) -> Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(format!("{}_temperaturas.csv", started.format("%Y-%m-%d_%H-%M-%S")));
        if !path.exists() {
            let mut wtr = csv::Writer::from_path(&path).with_context(|| format!("creating {}", path.display()))?;
            wtr.write_record(header(aliases))
                .with_context(|| format!("writing header to {}", path.display()))?;
            wtr.flush()?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleSink for CsvMeasurementLog {
    fn append(&mut self, sample: &Sample) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        wtr.write_record(format_row(sample))
            .with_context(|| format!("appending to {}", self.path.display()))?;
        wtr.flush()?;
        Ok(())
    }
}

/// column names: timestamp, one per alias, then avg / pump / sequence
pub fn header(aliases: &[String]) -> Vec<String> {
    std::iter::once("timestamp_local")
        .chain(aliases.iter().map(String::as_str))
        .chain(["avg_c", "bomba_state", "consecutivo"])
        .map(String::from)
        .collect()
}

/// fields of one record; absent values are empty, numbers have 3 decimals
pub fn format_row(sample: &Sample) -> Vec<String> {
    let number = |value: Option<f64>| value.map(|v| format!("{:.3}", v)).unwrap_or_default();
    let mut fields = vec![sample.timestamp.format(TIMESTAMP_FORMAT).to_string()];
    fields.extend(sample.readings.iter().map(|r| number(*r)));
    fields.push(number(sample.average));
    fields.push(if sample.pump_on { "ON" } else { "OFF" }.to_string());
    fields.push(sample.sequence.to_string());
    fields
}
