use std::fmt;

use thiserror::Error;

use crate::types::MeasurementSample;

#[derive(Error, Debug)]
pub enum SmuError {
    #[error("IO error: {context}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Instrument timeout")]
    Timeout,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Invalid GPIB address: {0}")]
    InvalidAddress(String),
    #[error("Invalid sweep configuration: {0}")]
    InvalidSweep(String),
    #[error("Not connected to instrument")]
    NotConnected,
    #[error("Controller is {actual}, expected {expected}")]
    InvalidState { expected: String, actual: String },
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("Instrument rejected `{command}`: {reason}")]
    Configuration { command: String, reason: String },
    #[error(transparent)]
    Sweep(#[from] SweepError),
    #[error("GPIB address change failed: {0}")]
    AddressChange(String),
    #[error("Export failed: {0}")]
    Export(String),
}

impl From<std::io::Error> for SmuError {
    fn from(source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => SmuError::Timeout,
            _ => SmuError::Io {
                source,
                context: "instrument I/O".to_string(),
            },
        }
    }
}

impl From<csv::Error> for SmuError {
    fn from(e: csv::Error) -> Self {
        SmuError::Export(e.to_string())
    }
}

/// One failed attempt to open a session with a single connection strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionAttempt {
    pub candidate: String,
    pub reason: String,
}

/// Every candidate failed for the requested address.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionError {
    pub address: u8,
    pub attempts: Vec<ConnectionAttempt>,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to connect to GPIB address {} ({} attempts)",
            self.address,
            self.attempts.len()
        )?;
        for (i, attempt) in self.attempts.iter().enumerate() {
            write!(f, "\n  {}. {}: {}", i + 1, attempt.candidate, attempt.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConnectionError {}

/// A point command failed mid-sweep. `partial` holds every sample taken
/// before the failing point.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepError {
    pub partial: Vec<MeasurementSample>,
    pub index: usize,
    pub voltage: f64,
    pub reason: String,
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sweep aborted at point {} ({:.6} V): {} ({} samples kept)",
            self.index + 1,
            self.voltage,
            self.reason,
            self.partial.len()
        )
    }
}

impl std::error::Error for SweepError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_lists_every_attempt() {
        let err = ConnectionError {
            address: 18,
            attempts: vec![
                ConnectionAttempt {
                    candidate: "visa GPIB0::18::INSTR".to_string(),
                    reason: "VISA support not compiled in".to_string(),
                },
                ConnectionAttempt {
                    candidate: "prologix-tcp 10.0.0.5:1234".to_string(),
                    reason: "Instrument timeout".to_string(),
                },
            ],
        };

        let text = err.to_string();
        assert!(text.contains("GPIB address 18"));
        assert!(text.contains("1. visa GPIB0::18::INSTR"));
        assert!(text.contains("2. prologix-tcp 10.0.0.5:1234: Instrument timeout"));
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(matches!(SmuError::from(io), SmuError::Timeout));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(SmuError::from(io), SmuError::Io { .. }));
    }
}
