use log::debug;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::Transport;
use crate::error::SmuError;

/// TCP port of the Prologix GPIB-ETHERNET controller
pub const PROLOGIX_DEFAULT_PORT: u16 = 1234;

const ESC: u8 = 0x1B;

/// GPIB access through a Prologix controller.
///
/// The controller speaks line-based `++` commands on the same stream that
/// carries instrument traffic. It is put in controller mode with
/// read-after-write disabled, so every response is fetched explicitly with
/// `++read eoi`.
pub struct PrologixTransport<S: Read + Write + Send> {
    stream: BufReader<S>,
}

impl PrologixTransport<TcpStream> {
    /// Connect to a GPIB-ETHERNET controller and address the instrument.
    pub fn connect_tcp(
        host: &str,
        port: u16,
        address: u8,
        timeout: Duration,
    ) -> Result<Self, SmuError> {
        let socket_addr: SocketAddr = (host, port)
            .to_socket_addrs()
            .map_err(|e| SmuError::Io {
                source: e,
                context: format!("Failed to resolve {host}"),
            })?
            .next()
            .ok_or_else(|| SmuError::Backend(format!("No address found for {host}")))?;

        debug!("Connecting to Prologix controller at {socket_addr}");

        let stream = TcpStream::connect_timeout(&socket_addr, timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                SmuError::Timeout
            } else {
                SmuError::Io {
                    source: e,
                    context: format!("Failed to connect to {socket_addr}"),
                }
            }
        })?;

        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        Self::open(stream, address, timeout)
    }
}

#[cfg(feature = "serial")]
impl PrologixTransport<Box<dyn serialport::SerialPort>> {
    /// Open a GPIB-USB controller (virtual COM port) and address the instrument.
    pub fn connect_serial(
        path: &str,
        baud_rate: u32,
        address: u8,
        timeout: Duration,
    ) -> Result<Self, SmuError> {
        debug!("Opening Prologix controller on {path} at {baud_rate} baud");
        let port = serialport::new(path, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| SmuError::Backend(format!("{path}: {e}")))?;
        Self::open(port, address, timeout)
    }
}

impl<S: Read + Write + Send> PrologixTransport<S> {
    /// Configure the controller on an already open stream.
    pub fn open(stream: S, address: u8, timeout: Duration) -> Result<Self, SmuError> {
        let mut transport = Self {
            stream: BufReader::new(stream),
        };
        let read_timeout_ms = timeout.as_millis().clamp(1, 3000);
        for setup in [
            "++mode 1".to_string(),
            format!("++addr {address}"),
            "++auto 0".to_string(),
            "++eoi 1".to_string(),
            "++eos 2".to_string(),
            format!("++read_tmo_ms {read_timeout_ms}"),
        ] {
            transport.send_line(setup.as_bytes())?;
        }
        Ok(transport)
    }

    fn send_line(&mut self, line: &[u8]) -> Result<(), SmuError> {
        let writer = self.stream.get_mut();
        writer.write_all(line)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Escape bytes the controller would otherwise interpret itself.
fn escape(command: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(command.len() + 4);
    for &b in command.as_bytes() {
        if matches!(b, b'\r' | b'\n' | ESC | b'+') {
            out.push(ESC);
        }
        out.push(b);
    }
    out
}

impl<S: Read + Write + Send> Transport for PrologixTransport<S> {
    fn write(&mut self, command: &str) -> Result<(), SmuError> {
        let escaped = escape(command);
        self.send_line(&escaped)
    }

    fn read_line(&mut self) -> Result<String, SmuError> {
        self.send_line(b"++read eoi")?;
        let mut line = String::new();
        let read = self.stream.read_line(&mut line)?;
        if read == 0 {
            return Err(SmuError::Protocol(
                "Prologix controller closed the connection".to_string(),
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn close(&mut self) -> Result<(), SmuError> {
        // Hand the instrument back to front-panel control
        self.send_line(b"++loc")
    }
}
