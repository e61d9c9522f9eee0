use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SmuError;

/// Current measurement range of the 2450.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CurrentRange {
    #[default]
    Auto,
    /// Fixed range in amperes
    Fixed(f64),
}

/// Range selectors offered on the instrument front panel, smallest first.
pub const CURRENT_RANGE_OPTIONS: [&str; 9] = [
    "Auto", "10 nA", "100 nA", "1 µA", "10 µA", "100 µA", "1 mA", "10 mA", "100 mA",
];

impl FromStr for CurrentRange {
    type Err = SmuError;

    /// Accepts `Auto`, a value with a unit (`10 nA`, `1 µA`, `1 uA`, `100 mA`, `1 A`)
    /// or a bare number of amperes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.eq_ignore_ascii_case("auto") {
            return Ok(CurrentRange::Auto);
        }

        let invalid = || SmuError::InvalidSweep(format!("Invalid current range: {s}"));

        let (number, factor) = match text.find(|c: char| c.is_alphabetic() || c == 'µ') {
            Some(idx) => {
                let factor = match text[idx..].trim() {
                    "nA" => 1e-9,
                    "µA" | "uA" => 1e-6,
                    "mA" => 1e-3,
                    "A" => 1.0,
                    _ => return Err(invalid()),
                };
                (text[..idx].trim(), factor)
            }
            None => (text, 1.0),
        };

        let value: f64 = number.parse().map_err(|_| invalid())?;
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid());
        }
        Ok(CurrentRange::Fixed(value * factor))
    }
}

impl fmt::Display for CurrentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrentRange::Auto => write!(f, "Auto"),
            CurrentRange::Fixed(amps) => {
                let (scale, unit) = if *amps >= 1.0 {
                    (1.0, "A")
                } else if *amps >= 1e-3 {
                    (1e3, "mA")
                } else if *amps >= 1e-6 {
                    (1e6, "µA")
                } else {
                    (1e9, "nA")
                };
                write!(f, "{} {}", (amps * scale * 1e6).round() / 1e6, unit)
            }
        }
    }
}

impl TryFrom<String> for CurrentRange {
    type Error = SmuError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CurrentRange> for String {
    fn from(range: CurrentRange) -> Self {
        range.to_string()
    }
}

/// Which terminal pair the source and measurement are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terminals {
    Front,
    #[default]
    Rear,
}

/// Parameters of one linear voltage sweep.
///
/// `steps` is the number of points, both ends included, and must be at least 2.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub start_voltage: f64,
    pub stop_voltage: f64,
    pub steps: usize,
    /// Compliance limit in amperes
    pub current_limit: f64,
    pub current_range: CurrentRange,
    /// Settling time between setting a voltage and measuring
    pub delay: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start_voltage: -1.0,
            stop_voltage: 1.0,
            steps: 101,
            current_limit: 0.1,
            current_range: CurrentRange::Auto,
            delay: Duration::from_millis(100),
        }
    }
}

impl SweepConfig {
    pub fn new(start_voltage: f64, stop_voltage: f64, steps: usize) -> Self {
        Self {
            start_voltage,
            stop_voltage,
            steps,
            ..Default::default()
        }
    }

    pub fn with_current_limit(mut self, amps: f64) -> Self {
        self.current_limit = amps;
        self
    }

    pub fn with_current_range(mut self, range: CurrentRange) -> Self {
        self.current_range = range;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn validate(&self) -> Result<(), SmuError> {
        if !self.start_voltage.is_finite() || !self.stop_voltage.is_finite() {
            return Err(SmuError::InvalidSweep(
                "Start and stop voltage must be finite".to_string(),
            ));
        }
        if self.steps < 2 {
            return Err(SmuError::InvalidSweep(
                "Number of steps must be at least 2".to_string(),
            ));
        }
        if !(self.current_limit.is_finite() && self.current_limit > 0.0) {
            return Err(SmuError::InvalidSweep(
                "Current limit must be greater than 0".to_string(),
            ));
        }
        if let CurrentRange::Fixed(amps) = self.current_range {
            if !(amps.is_finite() && amps > 0.0) {
                return Err(SmuError::InvalidSweep(format!(
                    "Invalid current range: {amps} A"
                )));
            }
        }
        if self.start_voltage == self.stop_voltage {
            log::warn!(
                "Start and stop voltage are both {} V, every point sources the same voltage",
                self.start_voltage
            );
        }
        Ok(())
    }

    /// Distance between two neighbouring points.
    pub fn step_size(&self) -> f64 {
        if self.steps < 2 {
            return 0.0;
        }
        (self.stop_voltage - self.start_voltage) / (self.steps - 1) as f64
    }

    /// The ordered voltages of the sweep. The last point is exactly `stop_voltage`.
    pub fn voltages(&self) -> Vec<f64> {
        let step = self.step_size();
        (0..self.steps)
            .map(|i| {
                if i + 1 == self.steps && self.steps > 1 {
                    self.stop_voltage
                } else {
                    self.start_voltage + i as f64 * step
                }
            })
            .collect()
    }

    /// Source range large enough for every point of the sweep.
    pub fn source_range(&self) -> f64 {
        self.start_voltage.abs().max(self.stop_voltage.abs())
    }
}

/// A single sweep point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    pub voltage: f64,
    pub current: f64,
    /// `None` when the current is too small to divide by
    pub resistance: Option<f64>,
}

impl MeasurementSample {
    pub fn new(voltage: f64, current: f64, threshold: f64) -> Self {
        Self {
            voltage,
            current,
            resistance: resistance(voltage, current, threshold),
        }
    }
}

/// Ohm's law, undefined when `|current| <= threshold`.
pub fn resistance(voltage: f64, current: f64, threshold: f64) -> Option<f64> {
    if current.abs() > threshold {
        Some(voltage / current)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStatus {
    Completed,
    Cancelled,
}

/// Samples of one sweep in the order they were taken.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResult {
    samples: Vec<MeasurementSample>,
    status: SweepStatus,
}

impl SweepResult {
    pub fn new(samples: Vec<MeasurementSample>, status: SweepStatus) -> Self {
        Self { samples, status }
    }

    pub fn samples(&self) -> &[MeasurementSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<MeasurementSample> {
        self.samples
    }

    pub fn status(&self) -> SweepStatus {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == SweepStatus::Completed
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn voltages(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.voltage).collect()
    }

    pub fn currents(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.current).collect()
    }

    pub fn resistances(&self) -> Vec<Option<f64>> {
        self.samples.iter().map(|s| s.resistance).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voltage_grid_endpoints_and_spacing() {
        for &(start, stop, steps) in &[(0.0, 1.0, 5), (-1.0, 1.0, 101), (2.0, -3.0, 7), (0.1, 0.3, 2)] {
            let config = SweepConfig::new(start, stop, steps);
            let voltages = config.voltages();

            assert_eq!(voltages.len(), steps);
            assert_eq!(voltages[0], start);
            assert_eq!(voltages[steps - 1], stop);

            let step = config.step_size();
            for pair in voltages.windows(2) {
                assert!((pair[1] - pair[0] - step).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_five_point_grid() {
        let voltages = SweepConfig::new(0.0, 1.0, 5).voltages();
        assert_eq!(voltages, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        assert!(SweepConfig::new(0.0, 1.0, 1).validate().is_err());
        assert!(SweepConfig::new(0.0, 1.0, 0).validate().is_err());
        assert!(SweepConfig::new(f64::NAN, 1.0, 5).validate().is_err());
        assert!(
            SweepConfig::new(0.0, 1.0, 5)
                .with_current_limit(0.0)
                .validate()
                .is_err()
        );
        // Equal endpoints are allowed, only discouraged
        assert!(SweepConfig::new(0.5, 0.5, 3).validate().is_ok());
        assert!(SweepConfig::default().validate().is_ok());
    }

    #[test]
    fn test_resistance_threshold() {
        assert_eq!(resistance(1.0, 1e-3, 1e-12), Some(1000.0));
        assert_eq!(resistance(0.0, 0.0, 1e-12), None);
        assert_eq!(resistance(0.5, 1e-13, 1e-12), None);
        assert_eq!(resistance(-0.5, -5e-4, 1e-12), Some(1000.0));

        let sample = MeasurementSample::new(0.0, 0.0, 1e-12);
        assert!(sample.resistance.is_none());
    }

    #[test]
    fn test_current_range_parsing() {
        assert_eq!("Auto".parse::<CurrentRange>().unwrap(), CurrentRange::Auto);
        assert_eq!("auto".parse::<CurrentRange>().unwrap(), CurrentRange::Auto);

        let expect = |s: &str, amps: f64| match s.parse::<CurrentRange>().unwrap() {
            CurrentRange::Fixed(v) => assert!((v - amps).abs() < amps * 1e-9, "{s}"),
            CurrentRange::Auto => panic!("{s} parsed as Auto"),
        };
        expect("10 nA", 10e-9);
        expect("1 µA", 1e-6);
        expect("100 uA", 100e-6);
        expect("10 mA", 10e-3);
        expect("0.001", 1e-3);

        assert!("12 kA".parse::<CurrentRange>().is_err());
        assert!("-1 mA".parse::<CurrentRange>().is_err());
        assert!("lots".parse::<CurrentRange>().is_err());
    }

    #[test]
    fn test_every_front_panel_range_parses_back() {
        for option in CURRENT_RANGE_OPTIONS {
            let range: CurrentRange = option.parse().unwrap();
            assert_eq!(range.to_string(), option);
        }
    }
}
