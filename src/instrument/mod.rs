use log::{debug, warn};

use crate::error::{ConnectionAttempt, SmuError};

pub mod commands;
pub mod prologix;
pub mod sim;
pub mod visa;

pub use prologix::{PrologixTransport, PROLOGIX_DEFAULT_PORT};
pub use sim::{SimulatedBus, SimulatedLoad, SimulatedSmu};
pub use visa::VisaTransport;

/// A message-based session to one instrument.
///
/// Implementations must finish a request before accepting the next one:
/// `query` returns only after the full response line has been read, so at
/// most one command is ever in flight on the bus.
pub trait Transport: Send {
    /// Send one command line. The terminator is added by the transport.
    fn write(&mut self, command: &str) -> Result<(), SmuError>;

    /// Read one response line, without its terminator.
    fn read_line(&mut self) -> Result<String, SmuError>;

    /// Send a command and read its response.
    fn query(&mut self, command: &str) -> Result<String, SmuError> {
        self.write(command)?;
        self.read_line()
    }

    /// Release the session. Called once, before the transport is dropped.
    fn close(&mut self) -> Result<(), SmuError> {
        Ok(())
    }
}

/// Result of a remote GPIB address change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressChange {
    /// Address reported by the instrument before the change, if it answered
    pub previous: Option<u8>,
    pub new: u8,
    /// Whether a fresh session was opened at the new address
    pub reconnected: bool,
}

/// An open, exclusively owned session with the SMU.
///
/// Created by [`crate::ConnectionResolver::resolve`]. The session is closed
/// by [`InstrumentHandle::close`] or when the handle is dropped.
pub struct InstrumentHandle {
    transport: Option<Box<dyn Transport>>,
    address: u8,
    resource: String,
    identity: Option<String>,
    failed_attempts: Vec<ConnectionAttempt>,
}

impl InstrumentHandle {
    pub fn new(transport: Box<dyn Transport>, address: u8, resource: impl Into<String>) -> Self {
        Self {
            transport: Some(transport),
            address,
            resource: resource.into(),
            identity: None,
            failed_attempts: Vec::new(),
        }
    }

    pub(crate) fn with_failed_attempts(mut self, attempts: Vec<ConnectionAttempt>) -> Self {
        self.failed_attempts = attempts;
        self
    }

    /// Candidates that failed before this session was opened, in order
    pub fn failed_attempts(&self) -> &[ConnectionAttempt] {
        &self.failed_attempts
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Description of the backend and resource string that opened this session
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Last `*IDN?` response, if one was read
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>, SmuError> {
        self.transport.as_mut().ok_or(SmuError::NotConnected)
    }

    pub fn write(&mut self, command: &str) -> Result<(), SmuError> {
        debug!("[GPIB{}] -> {}", self.address, command);
        self.transport()?.write(command)
    }

    pub fn query(&mut self, command: &str) -> Result<String, SmuError> {
        debug!("[GPIB{}] -> {}", self.address, command);
        let response = self.transport()?.query(command)?;
        let response = response.trim().to_string();
        debug!("[GPIB{}] <- {}", self.address, response);
        Ok(response)
    }

    /// Query `*IDN?` and remember the answer. An empty answer is an error.
    pub fn identify(&mut self) -> Result<String, SmuError> {
        let idn = self.query(commands::IDENTIFY)?;
        if idn.is_empty() {
            return Err(SmuError::Protocol("Empty response to *IDN?".to_string()));
        }
        self.identity = Some(idn.clone());
        Ok(idn)
    }

    /// Pop the oldest entry of the instrument error queue.
    ///
    /// Returns `Ok(None)` when the queue is empty (`0,"No error"`).
    pub fn next_error(&mut self) -> Result<Option<(i32, String)>, SmuError> {
        let response = self.query(commands::ERROR_QUERY)?;
        commands::parse_error_entry(&response)
    }

    /// Read the configured GPIB address, trying the TSP form first.
    pub fn gpib_address(&mut self) -> Result<u8, SmuError> {
        match self
            .query(commands::GPIB_ADDRESS_QUERY_TSP)
            .and_then(|r| commands::parse_address(&r))
        {
            Ok(address) => Ok(address),
            Err(e) => {
                debug!("TSP address query failed ({e}), falling back to SCPI");
                let response = self.query(commands::GPIB_ADDRESS_QUERY)?;
                commands::parse_address(&response)
            }
        }
    }

    /// Send the address change command and read the address back.
    ///
    /// This only reprograms the instrument; the session stays bound to the
    /// old address. Reconnecting is up to the caller.
    pub fn set_gpib_address(&mut self, new_address: u8) -> Result<AddressChange, SmuError> {
        if !(1..=30).contains(&new_address) {
            return Err(SmuError::AddressChange(format!(
                "GPIB address must be between 1 and 30, got {new_address}"
            )));
        }

        let previous = match self.gpib_address() {
            Ok(address) => Some(address),
            Err(e) => {
                warn!("Could not read current GPIB address: {e}");
                None
            }
        };

        self.write(&commands::set_gpib_address(new_address))
            .map_err(|e| SmuError::AddressChange(format!("Sending address command failed: {e}")))?;

        let verified = self
            .query(commands::GPIB_ADDRESS_QUERY_TSP)
            .and_then(|r| commands::parse_address(&r))
            .map_err(|e| SmuError::AddressChange(format!("Verification query failed: {e}")))?;

        if verified != new_address {
            return Err(SmuError::AddressChange(format!(
                "Instrument reports address {verified} after setting {new_address}"
            )));
        }

        Ok(AddressChange {
            previous,
            new: new_address,
            reconnected: false,
        })
    }

    pub fn close(mut self) -> Result<(), SmuError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), SmuError> {
        match self.transport.take() {
            Some(mut transport) => {
                debug!("Closing session {}", self.resource);
                transport.close()
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for InstrumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentHandle")
            .field("address", &self.address)
            .field("resource", &self.resource)
            .field("identity", &self.identity)
            .field("failed_attempts", &self.failed_attempts.len())
            .field("open", &self.transport.is_some())
            .finish()
    }
}

impl Drop for InstrumentHandle {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays canned responses and records every line written.
    struct ScriptedTransport {
        written: Arc<Mutex<Vec<String>>>,
        responses: VecDeque<Result<String, SmuError>>,
    }

    impl Transport for ScriptedTransport {
        fn write(&mut self, command: &str) -> Result<(), SmuError> {
            self.written.lock().unwrap().push(command.to_string());
            Ok(())
        }

        fn read_line(&mut self) -> Result<String, SmuError> {
            self.responses.pop_front().unwrap_or(Err(SmuError::Timeout))
        }
    }

    fn scripted(responses: Vec<Result<&str, SmuError>>) -> (InstrumentHandle, Arc<Mutex<Vec<String>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            written: written.clone(),
            responses: responses
                .into_iter()
                .map(|r| r.map(|s| s.to_string()))
                .collect(),
        };
        (InstrumentHandle::new(Box::new(transport), 18, "scripted"), written)
    }

    #[test]
    fn test_identify_rejects_empty_response() {
        let (mut handle, _) = scripted(vec![Ok("  \n")]);
        assert!(matches!(handle.identify(), Err(SmuError::Protocol(_))));
        assert!(handle.identity().is_none());

        let (mut handle, _) = scripted(vec![Ok("KEITHLEY INSTRUMENTS,MODEL 2450,1,1.7\n")]);
        assert_eq!(handle.identify().unwrap(), "KEITHLEY INSTRUMENTS,MODEL 2450,1,1.7");
        assert!(handle.identity().unwrap().contains("MODEL 2450"));
    }

    #[test]
    fn test_gpib_address_falls_back_to_scpi() {
        let (mut handle, written) = scripted(vec![Err(SmuError::Timeout), Ok("18")]);
        assert_eq!(handle.gpib_address().unwrap(), 18);
        assert_eq!(
            *written.lock().unwrap(),
            vec![
                commands::GPIB_ADDRESS_QUERY_TSP.to_string(),
                commands::GPIB_ADDRESS_QUERY.to_string()
            ]
        );
    }

    #[test]
    fn test_set_gpib_address_verifies() {
        let (mut handle, written) = scripted(vec![Ok("18"), Ok("12")]);
        let change = handle.set_gpib_address(12).unwrap();
        assert_eq!(change.previous, Some(18));
        assert_eq!(change.new, 12);
        assert!(written.lock().unwrap().contains(&":SYSTem:GPIB:ADDRess 12".to_string()));

        let (mut handle, _) = scripted(vec![Ok("18"), Ok("18")]);
        assert!(matches!(
            handle.set_gpib_address(12),
            Err(SmuError::AddressChange(_))
        ));
    }

    #[test]
    fn test_set_gpib_address_range() {
        let (mut handle, written) = scripted(vec![]);
        assert!(matches!(handle.set_gpib_address(0), Err(SmuError::AddressChange(_))));
        assert!(matches!(handle.set_gpib_address(31), Err(SmuError::AddressChange(_))));
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_closed_handle_reports_not_connected() {
        let (mut handle, _) = scripted(vec![]);
        handle.shutdown().unwrap();
        assert!(matches!(handle.write("*CLS"), Err(SmuError::NotConnected)));
    }
}
