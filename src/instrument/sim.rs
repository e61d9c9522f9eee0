//! A simulated Keithley 2450 on a simulated GPIB bus.
//!
//! Understands the command subset in [`super::commands`], keeps an error
//! queue like the real instrument and sources into a configurable load.
//! Used by `iv-sweep --simulate` and throughout the tests.

use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::Transport;
use crate::error::SmuError;

pub const SIMULATED_IDN: &str = "KEITHLEY INSTRUMENTS,MODEL 2450,04000000,1.7.12b";

/// What the simulated SMU is wired to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimulatedLoad {
    /// Ohmic load, `i = v / ohms`
    Resistor(f64),
    /// Nothing connected, current is always zero
    Open,
    /// Ideal diode with saturation current `is` and thermal voltage `vt`
    Diode { is: f64, vt: f64 },
}

impl SimulatedLoad {
    fn current(&self, voltage: f64) -> f64 {
        match *self {
            SimulatedLoad::Resistor(ohms) => voltage / ohms,
            SimulatedLoad::Open => 0.0,
            SimulatedLoad::Diode { is, vt } => is * ((voltage / vt).exp() - 1.0),
        }
    }
}

/// Instrument state behind the bus.
#[derive(Debug, Clone)]
pub struct SimulatedSmu {
    address: u8,
    load: SimulatedLoad,
    output_on: bool,
    source_voltage: f64,
    current_limit: f64,
    errors: VecDeque<(i32, String)>,
    measurements: usize,
    fail_at_measurement: Option<usize>,
    rejected_header: Option<String>,
    mute_identity_after_move: bool,
    identity_muted: bool,
    log: Vec<String>,
}

impl SimulatedSmu {
    pub fn new(address: u8, load: SimulatedLoad) -> Self {
        Self {
            address,
            load,
            output_on: false,
            source_voltage: 0.0,
            current_limit: 1.05e-4,
            errors: VecDeque::new(),
            measurements: 0,
            fail_at_measurement: None,
            rejected_header: None,
            mute_identity_after_move: false,
            identity_muted: false,
            log: Vec::new(),
        }
    }

    /// Stop answering on the `n`th `MEAS:CURR?` (1-based).
    pub fn fail_at_measurement(mut self, n: usize) -> Self {
        self.fail_at_measurement = Some(n);
        self
    }

    /// Queue error -113 for every command starting with `header`.
    pub fn reject_header(mut self, header: &str) -> Self {
        self.rejected_header = Some(header.to_uppercase());
        self
    }

    /// Answer `*IDN?` with an empty line once the address has been changed.
    pub fn mute_identity_after_address_change(mut self) -> Self {
        self.mute_identity_after_move = true;
        self
    }

    fn push_error(&mut self, code: i32, message: &str) {
        self.errors.push_back((code, message.to_string()));
    }

    fn measured_current(&self) -> f64 {
        if !self.output_on {
            return 0.0;
        }
        let limit = self.current_limit.abs();
        self.load.current(self.source_voltage).clamp(-limit, limit)
    }

    /// Execute one command line, returning the response for queries.
    fn execute(&mut self, command: &str) -> Result<Option<String>, SmuError> {
        self.log.push(command.to_string());
        let line = command.trim();
        let upper = line.to_uppercase();
        let (header, argument) = match upper.split_once(' ') {
            Some((h, a)) => (h.to_string(), a.trim().to_string()),
            None => (upper.clone(), String::new()),
        };

        let rejected = self
            .rejected_header
            .as_deref()
            .is_some_and(|h| upper.starts_with(h));
        if rejected {
            self.push_error(-113, "Undefined header");
            return Ok(None);
        }

        let number = |arg: &str| arg.parse::<f64>().ok();

        match header.as_str() {
            "*IDN?" => {
                let idn = if self.identity_muted { "" } else { SIMULATED_IDN };
                return Ok(Some(idn.to_string()));
            }
            "*RST" => {
                self.output_on = false;
                self.source_voltage = 0.0;
                self.current_limit = 1.05e-4;
            }
            "*CLS" => self.errors.clear(),
            "SYST:ERR?" => {
                let entry = match self.errors.pop_front() {
                    Some((code, message)) => format!("{code},\"{message}\""),
                    None => "0,\"No error\"".to_string(),
                };
                return Ok(Some(entry));
            }
            "OUTP" => match argument.as_str() {
                "ON" | "1" => self.output_on = true,
                "OFF" | "0" => self.output_on = false,
                _ => self.push_error(-224, "Illegal parameter value"),
            },
            "SOUR:VOLT" => match number(&argument) {
                Some(v) => self.source_voltage = v,
                None => self.push_error(-104, "Data type error"),
            },
            "SOUR:VOLT:ILIM" => match number(&argument) {
                Some(a) if a > 0.0 => self.current_limit = a,
                _ => self.push_error(-222, "Data out of range"),
            },
            "SOUR:VOLT:RANG" | "SENS:CURR:RANG" | "SENS:CURR:NPLC" => {
                if number(&argument).is_none() {
                    self.push_error(-104, "Data type error");
                }
            }
            "ROUT:TERM" | "SOUR:FUNC" | "SENS:FUNC" | "SENS:CURR:RANG:AUTO"
            | "SOUR:VOLT:READ" => {}
            "MEAS:CURR?" => {
                self.measurements += 1;
                if self.fail_at_measurement == Some(self.measurements) {
                    return Err(SmuError::Timeout);
                }
                return Ok(Some(format!("{:E}", self.measured_current())));
            }
            ":SYSTEM:GPIB:ADDRESS" => match argument.parse::<u8>() {
                Ok(a) if a <= 30 => {
                    self.address = a;
                    self.identity_muted = self.mute_identity_after_move;
                }
                _ => self.push_error(-222, "Data out of range"),
            },
            ":SYSTEM:GPIB:ADDRESS?" | "PRINT(GPIB.ADDRESS)" => {
                return Ok(Some(self.address.to_string()));
            }
            _ => self.push_error(-113, "Undefined header"),
        }
        Ok(None)
    }
}

/// Shared bus holding simulated instruments. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    instruments: Arc<Mutex<Vec<SimulatedSmu>>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus with one SMU at `address` wired to `load`.
    pub fn with_smu(address: u8, load: SimulatedLoad) -> Self {
        let bus = Self::new();
        bus.attach(SimulatedSmu::new(address, load));
        bus
    }

    pub fn attach(&self, smu: SimulatedSmu) {
        self.instruments.lock().push(smu);
    }

    /// Open a session to whichever instrument currently listens on `address`.
    pub fn open(&self, address: u8) -> Result<SimulatedTransport, SmuError> {
        let instruments = self.instruments.lock();
        let slot = instruments
            .iter()
            .position(|smu| smu.address == address)
            .ok_or(SmuError::Timeout)?;
        debug!("Simulated session opened at GPIB{address}");
        Ok(SimulatedTransport {
            bus: self.clone(),
            slot,
            pending: VecDeque::new(),
        })
    }

    /// Every command line received so far by the instrument at `slot`.
    pub fn command_log(&self, slot: usize) -> Vec<String> {
        self.instruments
            .lock()
            .get(slot)
            .map(|smu| smu.log.clone())
            .unwrap_or_default()
    }

    /// Current address of the instrument at `slot`.
    pub fn address_of(&self, slot: usize) -> Option<u8> {
        self.instruments.lock().get(slot).map(|smu| smu.address)
    }

    pub fn output_on(&self, slot: usize) -> bool {
        self.instruments
            .lock()
            .get(slot)
            .map(|smu| smu.output_on)
            .unwrap_or(false)
    }
}

/// Session bound to one instrument. It stays bound after the instrument's
/// address changes, like a GPIB session that was opened before the change.
pub struct SimulatedTransport {
    bus: SimulatedBus,
    slot: usize,
    pending: VecDeque<String>,
}

impl Transport for SimulatedTransport {
    fn write(&mut self, command: &str) -> Result<(), SmuError> {
        let mut instruments = self.bus.instruments.lock();
        let smu = instruments.get_mut(self.slot).ok_or(SmuError::NotConnected)?;
        if let Some(response) = smu.execute(command)? {
            self.pending.push_back(response);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, SmuError> {
        self.pending.pop_front().ok_or(SmuError::Timeout)
    }
}
