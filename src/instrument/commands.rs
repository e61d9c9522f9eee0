//! The fixed SCPI/TSP command subset used with the Keithley 2450.

use crate::error::SmuError;
use crate::types::{CurrentRange, Terminals};

pub const IDENTIFY: &str = "*IDN?";
pub const RESET: &str = "*RST";
pub const CLEAR_STATUS: &str = "*CLS";
pub const ERROR_QUERY: &str = "SYST:ERR?";

pub const SOURCE_FUNCTION_VOLTAGE: &str = "SOUR:FUNC VOLT";
pub const MEASURE_FUNCTION_CURRENT: &str = "SENS:FUNC \"CURR\"";
pub const CURRENT_RANGE_AUTO: &str = "SENS:CURR:RANG:AUTO ON";
pub const MEASURE_CURRENT: &str = "MEAS:CURR?";

pub const OUTPUT_ON: &str = "OUTP ON";
pub const OUTPUT_OFF: &str = "OUTP OFF";

/// TSP form, answered with a bare number
pub const GPIB_ADDRESS_QUERY_TSP: &str = "print(gpib.address)";
pub const GPIB_ADDRESS_QUERY: &str = ":SYSTem:GPIB:ADDRess?";

/// Magnitude the 2450 reports in place of an invalid reading
const INVALID_READING: f64 = 9.9e37;

/// Model string expected in the `*IDN?` response
pub const MODEL_MARKER: &str = "MODEL 2450";

pub fn terminals(terminals: Terminals) -> String {
    match terminals {
        Terminals::Front => "ROUT:TERM FRON".to_string(),
        Terminals::Rear => "ROUT:TERM REAR".to_string(),
    }
}

pub fn source_range(volts: f64) -> String {
    format!("SOUR:VOLT:RANG {volts}")
}

pub fn current_limit(amps: f64) -> String {
    format!("SOUR:VOLT:ILIM {amps}")
}

pub fn current_range(range: CurrentRange) -> String {
    match range {
        CurrentRange::Auto => CURRENT_RANGE_AUTO.to_string(),
        CurrentRange::Fixed(amps) => format!("SENS:CURR:RANG {amps}"),
    }
}

pub fn nplc(cycles: f64) -> String {
    format!("SENS:CURR:NPLC {cycles}")
}

pub fn source_readback(enabled: bool) -> String {
    format!("SOUR:VOLT:READ {}", if enabled { "ON" } else { "OFF" })
}

pub fn source_voltage(volts: f64) -> String {
    format!("SOUR:VOLT {volts}")
}

pub fn set_gpib_address(address: u8) -> String {
    format!(":SYSTem:GPIB:ADDRess {address}")
}

/// Parse a `MEAS:CURR?` response. Only the first field is used when the
/// instrument returns several reading elements.
pub fn parse_reading(response: &str) -> Result<f64, SmuError> {
    let field = response.split(',').next().unwrap_or("").trim();
    let value: f64 = field
        .parse()
        .map_err(|_| SmuError::Protocol(format!("Unparsable reading: {response:?}")))?;
    if !value.is_finite() || value.abs() >= INVALID_READING {
        return Err(SmuError::Protocol(format!("Invalid reading: {field}")));
    }
    Ok(value)
}

/// Parse one `SYST:ERR?` entry such as `-113,"Undefined header"`.
pub fn parse_error_entry(response: &str) -> Result<Option<(i32, String)>, SmuError> {
    let (code, message) = response.split_once(',').unwrap_or((response, ""));
    let code: i32 = code
        .trim()
        .parse()
        .map_err(|_| SmuError::Protocol(format!("Unparsable error entry: {response:?}")))?;
    if code == 0 {
        return Ok(None);
    }
    Ok(Some((code, message.trim().trim_matches('"').to_string())))
}

/// Parse an address answer. TSP may print it as a float (`1.2000000e+01`).
pub fn parse_address(response: &str) -> Result<u8, SmuError> {
    let value: f64 = response
        .trim()
        .parse()
        .map_err(|_| SmuError::Protocol(format!("Unparsable GPIB address: {response:?}")))?;
    if value.fract() != 0.0 || !(0.0..=30.0).contains(&value) {
        return Err(SmuError::Protocol(format!("GPIB address out of range: {value}")));
    }
    Ok(value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_formatting() {
        assert_eq!(source_voltage(0.25), "SOUR:VOLT 0.25");
        assert_eq!(source_voltage(-1.0), "SOUR:VOLT -1");
        assert_eq!(current_limit(0.1), "SOUR:VOLT:ILIM 0.1");
        assert_eq!(current_range(CurrentRange::Auto), "SENS:CURR:RANG:AUTO ON");
        assert_eq!(current_range(CurrentRange::Fixed(0.01)), "SENS:CURR:RANG 0.01");
        assert_eq!(terminals(Terminals::Rear), "ROUT:TERM REAR");
        assert_eq!(source_readback(true), "SOUR:VOLT:READ ON");
        assert_eq!(set_gpib_address(12), ":SYSTem:GPIB:ADDRess 12");
    }

    #[test]
    fn test_parse_reading() {
        assert_eq!(parse_reading("1.000000E-03\n").unwrap(), 1e-3);
        assert_eq!(parse_reading("-2.5E-06,0.5").unwrap(), -2.5e-6);
        assert!(parse_reading("9.91E+37").is_err());
        assert!(parse_reading("").is_err());
        assert!(parse_reading("OVERFLOW").is_err());
    }

    #[test]
    fn test_parse_error_entry() {
        assert_eq!(parse_error_entry("0,\"No error\"").unwrap(), None);
        assert_eq!(
            parse_error_entry("-113,\"Undefined header\"").unwrap(),
            Some((-113, "Undefined header".to_string()))
        );
        assert!(parse_error_entry("garbage").is_err());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("18").unwrap(), 18);
        assert_eq!(parse_address("1.2000000e+01").unwrap(), 12);
        assert!(parse_address("31").is_err());
        assert!(parse_address("12.5").is_err());
        assert!(parse_address("nil").is_err());
    }
}
