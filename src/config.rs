use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::instrument::PROLOGIX_DEFAULT_PORT;
use crate::types::{CurrentRange, SweepConfig, Terminals};

/// Vendor default GPIB address of the 2450
pub const DEFAULT_GPIB_ADDRESS: u8 = 18;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub instrument: InstrumentConfig,
    pub measurement: MeasurementConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.address > 30 {
            return Err(ConfigError::Message(format!(
                "connection.address must be between 0 and 30, got {}",
                self.connection.address
            )));
        }
        if self.connection.attempts == 0 {
            return Err(ConfigError::Message(
                "connection.attempts must be at least 1".to_string(),
            ));
        }
        if !(self.instrument.small_current_threshold >= 0.0) {
            return Err(ConfigError::Message(
                "instrument.small_current_threshold cannot be negative".to_string(),
            ));
        }
        if !(0.01..=10.0).contains(&self.instrument.nplc) {
            return Err(ConfigError::Message(format!(
                "instrument.nplc must be between 0.01 and 10, got {}",
                self.instrument.nplc
            )));
        }
        if self.export.header.len() != 3 {
            return Err(ConfigError::Message(format!(
                "export.header needs 3 column titles, got {}",
                self.export.header.len()
            )));
        }
        self.measurement
            .sweep_config()
            .validate()
            .map_err(|e| ConfigError::Message(format!("Invalid measurement: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConnectionConfig {
    pub address: u8,
    /// Open timeout for every candidate
    pub timeout_ms: u64,
    /// Passes over the whole candidate list before giving up
    pub attempts: u32,
    pub retry_delay_ms: u64,
    /// Require a non-empty `*IDN?` answer before accepting a session
    pub verify_identity: bool,
    /// VISA resource strings tried in order, `{address}` is substituted
    pub visa_resource_templates: Vec<String>,
    /// After the templates, search the VISA library for the address
    pub visa_discovery: bool,
    /// Host of a Prologix GPIB-ETHERNET controller
    pub prologix_host: Option<String>,
    pub prologix_port: u16,
    /// Serial port of a Prologix GPIB-USB controller
    pub prologix_serial_port: Option<String>,
    pub prologix_baud_rate: u32,
    /// Talk to the built-in simulated instrument instead of hardware
    pub simulate: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_GPIB_ADDRESS,
            timeout_ms: 3000,
            attempts: 3,
            retry_delay_ms: 2000,
            verify_identity: true,
            visa_resource_templates: vec![
                "GPIB0::{address}::INSTR".to_string(),
                "GPIB::{address}::INSTR".to_string(),
                "GPIB{address}".to_string(),
                "GPIB::{address}".to_string(),
            ],
            visa_discovery: true,
            prologix_host: None,
            prologix_port: PROLOGIX_DEFAULT_PORT,
            prologix_serial_port: None,
            prologix_baud_rate: 115_200,
            simulate: false,
        }
    }
}

impl ConnectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InstrumentConfig {
    /// Currents at or below this magnitude (A) give an undefined resistance
    pub small_current_threshold: f64,
    /// Integration time in power line cycles
    pub nplc: f64,
    pub terminals: Terminals,
    /// Measure the voltage actually applied instead of the programmed one
    pub source_readback: bool,
    /// Send `*RST` and `*CLS` right after connecting
    pub reset_on_connect: bool,
    /// Open a new session at the new address after a remote address change
    pub reconnect_after_address_change: bool,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            small_current_threshold: 1e-12,
            nplc: 1.0,
            terminals: Terminals::Rear,
            source_readback: true,
            reset_on_connect: true,
            reconnect_after_address_change: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MeasurementConfig {
    pub start_voltage: f64,
    pub stop_voltage: f64,
    pub steps: usize,
    pub current_limit: f64,
    pub current_range: CurrentRange,
    pub delay_ms: u64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        let sweep = SweepConfig::default();
        Self {
            start_voltage: sweep.start_voltage,
            stop_voltage: sweep.stop_voltage,
            steps: sweep.steps,
            current_limit: sweep.current_limit,
            current_range: sweep.current_range,
            delay_ms: sweep.delay.as_millis() as u64,
        }
    }
}

impl MeasurementConfig {
    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig::new(self.start_voltage, self.stop_voltage, self.steps)
            .with_current_limit(self.current_limit)
            .with_current_range(self.current_range)
            .with_delay(Duration::from_millis(self.delay_ms))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExportConfig {
    /// Column titles for voltage, current and resistance
    pub header: Vec<String>,
    /// Digits after the decimal point, scientific notation
    pub precision: usize,
    pub output_dir: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            header: vec![
                "Voltage (V)".to_string(),
                "Current (A)".to_string(),
                "Resistance (Ω)".to_string(),
            ],
            precision: 6,
            output_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimulationConfig {
    /// Resistance of the simulated device under test in ohms
    pub load_ohms: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { load_ohms: 1000.0 }
    }
}

/// Load configuration from file with layered fallbacks
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else {
        for path in ["smu_sweep.toml", "config.toml"] {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
                break;
            }
        }
    }

    // Environment overrides, e.g. SMU_SWEEP__CONNECTION__ADDRESS=12
    builder = builder.add_source(
        Environment::with_prefix("SMU_SWEEP")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?.try_deserialize::<AppConfig>()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration with better error handling and defaults
pub fn load_config_or_default(config_path: Option<&Path>) -> AppConfig {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::warn!("Failed to load config ({}), using defaults", e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_front_panel_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.connection.address, 18);
        assert_eq!(config.measurement.steps, 101);
        assert_eq!(config.measurement.current_range, CurrentRange::Auto);
        assert_eq!(config.instrument.small_current_threshold, 1e-12);
        assert_eq!(config.export.header[2], "Resistance (Ω)");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[connection]
address = 12
prologix_host = "192.168.0.50"

[measurement]
start_voltage = 0.0
stop_voltage = 2.0
steps = 21
current_range = "10 mA"
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.connection.address, 12);
        assert_eq!(config.connection.prologix_host.as_deref(), Some("192.168.0.50"));
        // Untouched keys keep their defaults
        assert_eq!(config.connection.attempts, 3);

        let sweep = config.measurement.sweep_config();
        assert_eq!(sweep.steps, 21);
        assert_eq!(sweep.stop_voltage, 2.0);
        assert!(matches!(sweep.current_range, CurrentRange::Fixed(a) if (a - 0.01).abs() < 1e-12));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[measurement]\nsteps = 1").unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(load_config(Some(Path::new("/nonexistent/smu_sweep.toml"))).is_err());
    }
}
