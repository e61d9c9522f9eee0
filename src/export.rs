use chrono::Local;
use log::info;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::ExportConfig;
use crate::error::SmuError;
use crate::types::MeasurementSample;

/// File name for a sweep finished now, e.g. `iv_sweep_20250101_120000.csv`
pub fn default_file_name() -> String {
    format!("iv_sweep_{}.csv", Local::now().format("%Y%m%d_%H%M%S"))
}

/// `output_dir/default_file_name()`
pub fn default_output_path(config: &ExportConfig) -> PathBuf {
    Path::new(&config.output_dir).join(default_file_name())
}

fn format_value(value: f64, precision: usize) -> String {
    format!("{value:.precision$e}")
}

/// Write a header row and one row per sample. An undefined resistance is
/// written as an empty field.
pub fn write_samples<W: Write>(
    writer: W,
    samples: &[MeasurementSample],
    config: &ExportConfig,
) -> Result<(), SmuError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(&config.header)?;

    for sample in samples {
        let resistance = sample
            .resistance
            .map(|r| format_value(r, config.precision))
            .unwrap_or_default();
        csv_writer.write_record([
            format_value(sample.voltage, config.precision),
            format_value(sample.current, config.precision),
            resistance,
        ])?;
    }

    csv_writer
        .flush()
        .map_err(|e| SmuError::Export(format!("Flushing CSV failed: {e}")))?;
    Ok(())
}

/// Save samples to `path`, creating missing parent directories.
pub fn write_csv(
    path: &Path,
    samples: &[MeasurementSample],
    config: &ExportConfig,
) -> Result<(), SmuError> {
    if samples.is_empty() {
        return Err(SmuError::Export("No data to save".to_string()));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SmuError::Io {
            source: e,
            context: format!("creating {}", parent.display()),
        })?;
    }

    let file = fs::File::create(path).map_err(|e| SmuError::Io {
        source: e,
        context: format!("creating {}", path.display()),
    })?;
    write_samples(file, samples, config)?;

    info!("Saved {} points to {}", samples.len(), path.display());
    Ok(())
}
