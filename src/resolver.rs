use log::{debug, info, warn};
use std::time::Duration;

use crate::config::ConnectionConfig;
use crate::error::{ConnectionAttempt, ConnectionError, SmuError};
use crate::instrument::{InstrumentHandle, PrologixTransport, SimulatedBus, Transport, VisaTransport};

/// One way of reaching an instrument at a GPIB address.
///
/// The resolver only needs a label for diagnostics and an open function;
/// tests substitute their own implementations.
pub trait Connector: Send + Sync {
    /// Human readable candidate description, e.g. `visa GPIB0::18::INSTR`
    fn describe(&self, address: u8) -> String;

    fn connect(&self, address: u8, timeout: Duration) -> Result<Box<dyn Transport>, SmuError>;
}

/// The built-in connection strategies.
#[derive(Debug, Clone)]
pub enum ConnectionStrategy {
    /// VISA resource string template, `{address}` is replaced by the bus address
    Visa { template: String },
    /// Prologix GPIB-ETHERNET controller
    PrologixTcp { host: String, port: u16 },
    /// Prologix GPIB-USB controller on a serial port
    PrologixSerial { path: String, baud_rate: u32 },
    /// Ask the VISA library for any GPIB interface listing the address
    VisaDiscover,
    /// In-process simulated bus
    Simulated(SimulatedBus),
}

impl ConnectionStrategy {
    pub fn visa_resource(template: &str, address: u8) -> String {
        template.replace("{address}", &address.to_string())
    }

    /// VISA search expression matching the address on every GPIB board
    pub fn visa_discovery_filter(address: u8) -> String {
        format!("GPIB?*::{address}::INSTR")
    }
}

impl Connector for ConnectionStrategy {
    fn describe(&self, address: u8) -> String {
        match self {
            ConnectionStrategy::Visa { template } => {
                format!("visa {}", Self::visa_resource(template, address))
            }
            ConnectionStrategy::PrologixTcp { host, port } => {
                format!("prologix-tcp {host}:{port} GPIB{address}")
            }
            ConnectionStrategy::PrologixSerial { path, .. } => {
                format!("prologix-serial {path} GPIB{address}")
            }
            ConnectionStrategy::VisaDiscover => {
                format!("visa-discover {}", Self::visa_discovery_filter(address))
            }
            ConnectionStrategy::Simulated(_) => format!("simulated GPIB{address}"),
        }
    }

    fn connect(&self, address: u8, timeout: Duration) -> Result<Box<dyn Transport>, SmuError> {
        match self {
            ConnectionStrategy::Visa { template } => {
                let resource = Self::visa_resource(template, address);
                Ok(Box::new(VisaTransport::open(&resource, timeout)?))
            }
            ConnectionStrategy::PrologixTcp { host, port } => Ok(Box::new(
                PrologixTransport::connect_tcp(host, *port, address, timeout)?,
            )),
            #[cfg(feature = "serial")]
            ConnectionStrategy::PrologixSerial { path, baud_rate } => Ok(Box::new(
                PrologixTransport::connect_serial(path, *baud_rate, address, timeout)?,
            )),
            #[cfg(not(feature = "serial"))]
            ConnectionStrategy::PrologixSerial { path, .. } => Err(SmuError::Backend(format!(
                "Serial support not compiled in (enable the `serial` feature) for {path}"
            ))),
            ConnectionStrategy::VisaDiscover => {
                let filter = Self::visa_discovery_filter(address);
                Ok(Box::new(VisaTransport::discover(&filter, timeout)?))
            }
            ConnectionStrategy::Simulated(bus) => Ok(Box::new(bus.open(address)?)),
        }
    }
}

/// Retry policy of the resolver.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub timeout: Duration,
    pub attempts: u32,
    pub retry_delay: Duration,
    pub verify_identity: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            attempts: 3,
            retry_delay: Duration::from_secs(2),
            verify_identity: true,
        }
    }
}

impl From<&ConnectionConfig> for ResolverSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            timeout: config.timeout(),
            attempts: config.attempts.max(1),
            retry_delay: config.retry_delay(),
            verify_identity: config.verify_identity,
        }
    }
}

/// Finds a working session by trying every candidate in order.
///
/// # Examples
///
/// ```
/// use smu_sweep::{ConnectionResolver, ConnectionStrategy, SimulatedBus, SimulatedLoad};
///
/// let bus = SimulatedBus::with_smu(18, SimulatedLoad::Resistor(1000.0));
/// let resolver = ConnectionResolver::builder()
///     .candidate(ConnectionStrategy::Simulated(bus))
///     .build();
///
/// let handle = resolver.resolve(18)?;
/// assert_eq!(handle.address(), 18);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ConnectionResolver {
    candidates: Vec<Box<dyn Connector>>,
    settings: ResolverSettings,
}

#[derive(Default)]
pub struct ConnectionResolverBuilder {
    candidates: Vec<Box<dyn Connector>>,
    settings: ResolverSettings,
}

impl ConnectionResolverBuilder {
    pub fn candidate(mut self, connector: impl Connector + 'static) -> Self {
        self.candidates.push(Box::new(connector));
        self
    }

    pub fn settings(mut self, settings: ResolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.settings.attempts = attempts.max(1);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.settings.retry_delay = delay;
        self
    }

    pub fn verify_identity(mut self, verify: bool) -> Self {
        self.settings.verify_identity = verify;
        self
    }

    pub fn build(self) -> ConnectionResolver {
        ConnectionResolver {
            candidates: self.candidates,
            settings: self.settings,
        }
    }
}

impl ConnectionResolver {
    pub fn builder() -> ConnectionResolverBuilder {
        ConnectionResolverBuilder::default()
    }

    /// Candidate list from configuration: VISA templates first, then the
    /// Prologix controllers that are configured. With `simulate` set only
    /// the given simulated bus is used.
    pub fn from_config(config: &ConnectionConfig, simulated: Option<SimulatedBus>) -> Self {
        let mut builder = Self::builder().settings(ResolverSettings::from(config));

        if config.simulate {
            let bus = simulated.unwrap_or_default();
            return builder.candidate(ConnectionStrategy::Simulated(bus)).build();
        }

        for template in &config.visa_resource_templates {
            builder = builder.candidate(ConnectionStrategy::Visa {
                template: template.clone(),
            });
        }
        if config.visa_discovery {
            builder = builder.candidate(ConnectionStrategy::VisaDiscover);
        }
        if let Some(host) = &config.prologix_host {
            builder = builder.candidate(ConnectionStrategy::PrologixTcp {
                host: host.clone(),
                port: config.prologix_port,
            });
        }
        if let Some(path) = &config.prologix_serial_port {
            builder = builder.candidate(ConnectionStrategy::PrologixSerial {
                path: path.clone(),
                baud_rate: config.prologix_baud_rate,
            });
        }
        builder.build()
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Candidate descriptions for `address`, in the order they are tried.
    pub fn candidates(&self, address: u8) -> Vec<String> {
        self.candidates.iter().map(|c| c.describe(address)).collect()
    }

    /// Open a session to the instrument at `address`.
    ///
    /// # Errors
    /// `InvalidAddress` for addresses above 30, otherwise
    /// [`SmuError::Connection`] carrying one entry per failed attempt.
    pub fn resolve(&self, address: u8) -> Result<InstrumentHandle, SmuError> {
        if address > 30 {
            return Err(SmuError::InvalidAddress(format!(
                "{address} (GPIB primary addresses are 0-30)"
            )));
        }

        let mut attempts = Vec::new();
        let rounds = self.settings.attempts.max(1);

        for round in 1..=rounds {
            info!(
                "Connecting to GPIB address {address} (attempt {round}/{rounds}, {} candidates)",
                self.candidates.len()
            );

            for connector in &self.candidates {
                let candidate = connector.describe(address);
                debug!("Trying {candidate}");
                match self.try_candidate(connector.as_ref(), address, &candidate) {
                    Ok(handle) => {
                        info!(
                            "Connected with {candidate} after {} failed attempt(s)",
                            attempts.len()
                        );
                        return Ok(handle.with_failed_attempts(attempts));
                    }
                    Err(e) => {
                        warn!("  - {candidate} failed: {e}");
                        attempts.push(ConnectionAttempt {
                            candidate,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            if round < rounds && !self.settings.retry_delay.is_zero() {
                info!(
                    "Connection attempt failed, retrying in {:?}",
                    self.settings.retry_delay
                );
                std::thread::sleep(self.settings.retry_delay);
            }
        }

        Err(ConnectionError { address, attempts }.into())
    }

    fn try_candidate(
        &self,
        connector: &dyn Connector,
        address: u8,
        candidate: &str,
    ) -> Result<InstrumentHandle, SmuError> {
        let transport = connector.connect(address, self.settings.timeout)?;
        let mut handle = InstrumentHandle::new(transport, address, candidate);
        if self.settings.verify_identity {
            handle.identify()?;
        }
        Ok(handle)
    }
}

/// Availability of one backend on this machine.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendStatus {
    pub name: &'static str,
    pub available: bool,
    pub detail: String,
}

/// Report which backends are compiled in and usable.
pub fn available_backends() -> Vec<BackendStatus> {
    let mut report = Vec::new();

    report.push(match VisaTransport::probe() {
        Ok(()) => BackendStatus {
            name: "visa",
            available: true,
            detail: "VISA resource manager available".to_string(),
        },
        Err(e) => BackendStatus {
            name: "visa",
            available: false,
            detail: e.to_string(),
        },
    });

    report.push(BackendStatus {
        name: "prologix-tcp",
        available: true,
        detail: "GPIB-ETHERNET controllers over TCP".to_string(),
    });

    report.push(serial_status());

    report.push(BackendStatus {
        name: "simulated",
        available: true,
        detail: "built-in simulated 2450".to_string(),
    });

    report
}

#[cfg(feature = "serial")]
fn serial_status() -> BackendStatus {
    match serialport::available_ports() {
        Ok(ports) => BackendStatus {
            name: "prologix-serial",
            available: true,
            detail: format!(
                "{} serial port(s): {}",
                ports.len(),
                ports
                    .iter()
                    .map(|p| p.port_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        },
        Err(e) => BackendStatus {
            name: "prologix-serial",
            available: false,
            detail: e.to_string(),
        },
    }
}

#[cfg(not(feature = "serial"))]
fn serial_status() -> BackendStatus {
    BackendStatus {
        name: "prologix-serial",
        available: false,
        detail: "Serial support not compiled in (enable the `serial` feature)".to_string(),
    }
}
