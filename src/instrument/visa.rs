//! Sessions opened through the system VISA library (NI-VISA, Keysight IO
//! Libraries). Only functional with the `visa` feature; without it every
//! open attempt fails so the resolver can move on to the next candidate.

use std::time::Duration;

use super::Transport;
use crate::error::SmuError;

#[cfg(feature = "visa")]
mod imp {
    use log::{debug, warn};
    use std::ffi::CString;
    use std::io::{BufRead, BufReader, Write};
    use std::time::Duration;
    use visa_rs::flags::AccessMode;
    use visa_rs::{DefaultRM, Instrument};

    use crate::error::SmuError;

    fn visa_err(e: visa_rs::Error) -> SmuError {
        SmuError::Backend(format!("VISA: {e}"))
    }

    pub struct Session {
        // Declared before the resource manager so it is dropped first
        instrument: Instrument,
        _rm: DefaultRM,
    }

    impl Session {
        pub fn open(resource: &str, timeout: Duration) -> Result<Self, SmuError> {
            let rm = DefaultRM::new().map_err(visa_err)?;
            let rsc = CString::new(resource)
                .map_err(|_| SmuError::Backend(format!("Invalid resource string {resource:?}")))?
                .into();
            debug!("Opening VISA resource {resource}");
            let instrument = rm.open(&rsc, AccessMode::NO_LOCK, timeout).map_err(visa_err)?;
            Ok(Self {
                instrument,
                _rm: rm,
            })
        }

        /// Open the first resource matching `filter` that accepts a session.
        pub fn discover(filter: &str, timeout: Duration) -> Result<Self, SmuError> {
            let rm = DefaultRM::new().map_err(visa_err)?;
            let expr = CString::new(filter)
                .map_err(|_| SmuError::Backend(format!("Invalid search expression {filter:?}")))?
                .into();

            let mut found = Vec::new();
            {
                let mut list = rm.find_res_list(&expr).map_err(visa_err)?;
                while let Some(rsc) = list.find_next().map_err(visa_err)? {
                    found.push(rsc);
                }
            }
            debug!("VISA search {filter} found {} resource(s)", found.len());

            for rsc in &found {
                match rm.open(rsc, AccessMode::NO_LOCK, timeout) {
                    Ok(instrument) => {
                        debug!("Opened discovered resource {rsc:?}");
                        return Ok(Self {
                            instrument,
                            _rm: rm,
                        });
                    }
                    Err(e) => warn!("  - Discovered resource {rsc:?} failed: {e}"),
                }
            }
            Err(SmuError::Backend(format!("No usable VISA resource matches {filter}")))
        }

        pub fn write(&mut self, command: &str) -> Result<(), SmuError> {
            (&self.instrument).write_all(format!("{command}\n").as_bytes())?;
            Ok(())
        }

        pub fn read_line(&mut self) -> Result<String, SmuError> {
            let mut response = String::new();
            let mut reader = BufReader::new(&self.instrument);
            reader.read_line(&mut response)?;
            Ok(response.trim_end_matches(['\r', '\n']).to_string())
        }
    }

    /// Whether a default resource manager can be created on this machine.
    pub fn probe() -> Result<(), SmuError> {
        DefaultRM::new().map(|_| ()).map_err(visa_err)
    }
}

/// One VISA session, e.g. `GPIB0::18::INSTR`.
pub struct VisaTransport {
    #[cfg(feature = "visa")]
    session: imp::Session,
}

impl VisaTransport {
    #[cfg(feature = "visa")]
    pub fn open(resource: &str, timeout: Duration) -> Result<Self, SmuError> {
        Ok(Self {
            session: imp::Session::open(resource, timeout)?,
        })
    }

    #[cfg(not(feature = "visa"))]
    pub fn open(resource: &str, _timeout: Duration) -> Result<Self, SmuError> {
        Err(SmuError::Backend(format!(
            "VISA support not compiled in (enable the `visa` feature) for {resource}"
        )))
    }

    /// Search the VISA library for resources matching `filter`, e.g.
    /// `GPIB?*::18::INSTR`, and open the first one that answers.
    #[cfg(feature = "visa")]
    pub fn discover(filter: &str, timeout: Duration) -> Result<Self, SmuError> {
        Ok(Self {
            session: imp::Session::discover(filter, timeout)?,
        })
    }

    #[cfg(not(feature = "visa"))]
    pub fn discover(filter: &str, _timeout: Duration) -> Result<Self, SmuError> {
        Err(SmuError::Backend(format!(
            "VISA support not compiled in (enable the `visa` feature) for {filter}"
        )))
    }

    /// Check that the VISA library is installed and usable.
    pub fn probe() -> Result<(), SmuError> {
        #[cfg(feature = "visa")]
        {
            imp::probe()
        }
        #[cfg(not(feature = "visa"))]
        Err(SmuError::Backend(
            "VISA support not compiled in (enable the `visa` feature)".to_string(),
        ))
    }
}

impl Transport for VisaTransport {
    #[cfg(feature = "visa")]
    fn write(&mut self, command: &str) -> Result<(), SmuError> {
        self.session.write(command)
    }

    #[cfg(not(feature = "visa"))]
    fn write(&mut self, _command: &str) -> Result<(), SmuError> {
        Err(SmuError::NotConnected)
    }

    #[cfg(feature = "visa")]
    fn read_line(&mut self) -> Result<String, SmuError> {
        self.session.read_line()
    }

    #[cfg(not(feature = "visa"))]
    fn read_line(&mut self) -> Result<String, SmuError> {
        Err(SmuError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "visa"))]
    #[test]
    fn test_open_without_feature_names_resource() {
        let err = VisaTransport::open("GPIB0::18::INSTR", Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("GPIB0::18::INSTR"));
        assert!(VisaTransport::probe().is_err());
    }
}
