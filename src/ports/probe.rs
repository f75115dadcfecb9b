//! Port availability probes
//!
//! A busy port is a normal result, never an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::str::FromStr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

/// How availability is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    /// Try to bind the port on all interfaces
    #[default]
    Bind,
    /// Try to connect to a listener on localhost (TCP only)
    Connect,
}

/// Outcome of probing one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCheckResult {
    pub port: u16,
    pub protocol: Protocol,
    pub available: bool,
    pub elapsed_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Port probing interface (for testing and platform abstraction).
pub trait PortProbe: Send + Sync {
    fn check_port(&self, port: u16, protocol: Protocol) -> PortCheckResult;
}

/// Probe using real sockets.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    mode: CheckMode,
    timeout: Duration,
}

impl SystemProbe {
    pub fn new(mode: CheckMode, timeout: Duration) -> Self {
        Self { mode, timeout }
    }

    fn bind(port: u16, protocol: Protocol) -> io::Result<()> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        match protocol {
            Protocol::Tcp => TcpListener::bind(addr).map(drop),
            Protocol::Udp => UdpSocket::bind(addr).map(drop),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new(CheckMode::Bind, Duration::from_millis(500))
    }
}

impl PortProbe for SystemProbe {
    fn check_port(&self, port: u16, protocol: Protocol) -> PortCheckResult {
        let start = Instant::now();

        let (available, error) = match (self.mode, protocol) {
            (CheckMode::Connect, Protocol::Tcp) => {
                let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
                connect_outcome(TcpStream::connect_timeout(&addr, self.timeout))
            }
            // Connect has no meaning for UDP; fall back to bind
            _ => match Self::bind(port, protocol) {
                Ok(()) => (true, None),
                Err(e) => (false, Some(e.to_string())),
            },
        };

        PortCheckResult {
            port,
            protocol,
            available,
            elapsed_ms: start.elapsed().as_millis() as u64,
            error,
        }
    }
}

/// Only a refused connection proves the port is free. A timeout or any other
/// error leaves it unknown, which is reported as unavailable.
fn connect_outcome<T>(result: io::Result<T>) -> (bool, Option<String>) {
    match result {
        // Something answered, so the port is taken
        Ok(_) => (false, None),
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => (true, None),
        Err(e) => (false, Some(format!("availability unknown: {}", e))),
    }
}

/// In-memory probe with a fixed set of occupied ports.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    occupied: BTreeSet<u16>,
}

impl MockProbe {
    pub fn new(occupied: impl IntoIterator<Item = u16>) -> Self {
        Self {
            occupied: occupied.into_iter().collect(),
        }
    }

    pub fn occupy(&mut self, port: u16) {
        self.occupied.insert(port);
    }
}

impl PortProbe for MockProbe {
    fn check_port(&self, port: u16, protocol: Protocol) -> PortCheckResult {
        let available = !self.occupied.contains(&port);
        PortCheckResult {
            port,
            protocol,
            available,
            elapsed_ms: 0,
            error: if available {
                None
            } else {
                Some("Address already in use".to_string())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_probe_detects_listener() {
        let listener = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = SystemProbe::default().check_port(port, Protocol::Tcp);
        assert_eq!(result.port, port);
        assert!(!result.available);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_connect_probe_detects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = SystemProbe::new(CheckMode::Connect, Duration::from_millis(500));
        assert!(!probe.check_port(port, Protocol::Tcp).available);
    }

    #[test]
    fn test_bind_probe_free_port() {
        let port = {
            let listener = TcpListener::bind("0.0.0.0:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = SystemProbe::default().check_port(port, Protocol::Tcp);
        assert!(result.available, "{:?}", result.error);
    }

    #[test]
    fn test_mock_probe() {
        let mut probe = MockProbe::new([5000]);
        probe.occupy(5001);
        assert!(!probe.check_port(5000, Protocol::Tcp).available);
        assert!(!probe.check_port(5001, Protocol::Udp).available);
        assert!(probe.check_port(5002, Protocol::Tcp).available);
    }

    #[test]
    fn test_parse_protocol() {
        assert_eq!("UDP".parse::<Protocol>(), Ok(Protocol::Udp));
        assert!("sctp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_connect_outcome_unknown_is_unavailable() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(connect_outcome::<()>(Err(refused)), (true, None));
        assert_eq!(connect_outcome(Ok(())), (false, None));

        let (available, error) = connect_outcome::<()>(Err(io::ErrorKind::TimedOut.into()));
        assert!(!available);
        assert!(error.unwrap().starts_with("availability unknown"));
    }
}
