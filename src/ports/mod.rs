//! Port Conflict & Allocation Engine
//!
//! Probes host port availability, names the process behind a busy port when
//! the platform allows it, and allocates per-project-type port sets. Probing
//! goes through the [`PortProbe`] trait so allocation can be tested against
//! an in-memory occupied set.

mod allocator;
mod conflict;
mod probe;
mod validate;

pub use allocator::{
    default_port, default_roles, PortRole, ProjectPortAllocationResult, DEFAULT_PORTS,
};
pub use conflict::{
    conflict_severity, detect_port_conflict, get_resolution_suggestions, parse_lsof_fields,
    ConflictSeverity, LsofLookup, NoProcessLookup, PortConflictInfo, ProcessInfo, ProcessLookup,
    ResolutionKind, ResolutionSuggestion, PRIVILEGED_PORT_MAX,
};
pub use probe::{CheckMode, MockProbe, PortCheckResult, PortProbe, Protocol, SystemProbe};
pub use validate::{validate_port, PortValidationResult};

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::config::DeckConfig;
use crate::signal::CancellationToken;

/// Probes issued per batch in [`PortEngine::check_ports`].
const PROBE_BATCH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("No available port in range {min}-{max}")]
    NoAvailablePort { min: u16, max: u16 },

    #[error("Invalid port range {min}-{max}")]
    InvalidRange { min: u16, max: u16 },

    #[error("Port scan cancelled")]
    Cancelled,
}

/// Entry point for port checks and allocation.
#[derive(Clone)]
pub struct PortEngine {
    probe: Arc<dyn PortProbe>,
    lookup: Arc<dyn ProcessLookup>,
    search_window: u16,
    cancel: CancellationToken,
}

impl PortEngine {
    pub fn new(
        probe: Arc<dyn PortProbe>,
        lookup: Arc<dyn ProcessLookup>,
        search_window: u16,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            probe,
            lookup,
            search_window,
            cancel,
        }
    }

    /// Real sockets and `lsof`, tuned by the effective `[ports]` config.
    pub fn from_config(config: &DeckConfig, mode: CheckMode, cancel: CancellationToken) -> Self {
        let timeout = Duration::from_millis(config.probe_timeout_ms());
        Self::new(
            Arc::new(SystemProbe::new(mode, timeout)),
            Arc::new(LsofLookup::new(timeout.max(Duration::from_secs(1)))),
            config.search_window(),
            cancel,
        )
    }

    pub fn search_window(&self) -> u16 {
        self.search_window
    }

    pub fn check_port(&self, port: u16, protocol: Protocol) -> PortCheckResult {
        self.probe.check_port(port, protocol)
    }

    /// Probe many ports concurrently; results keep the input order.
    pub fn check_ports(
        &self,
        ports: &[u16],
        protocol: Protocol,
    ) -> Result<Vec<PortCheckResult>, PortError> {
        let mut results = Vec::with_capacity(ports.len());

        for batch in ports.chunks(PROBE_BATCH) {
            if self.cancel.is_cancelled() {
                return Err(PortError::Cancelled);
            }

            let probe = self.probe.as_ref();
            thread::scope(|s| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|&port| (port, s.spawn(move || probe.check_port(port, protocol))))
                    .collect();

                for (port, handle) in handles {
                    results.push(handle.join().unwrap_or_else(|_| PortCheckResult {
                        port,
                        protocol,
                        available: false,
                        elapsed_ms: 0,
                        error: Some("probe thread panicked".to_string()),
                    }));
                }
            });
        }

        Ok(results)
    }

    pub fn detect_port_conflict(&self, port: u16, protocol: Protocol) -> PortConflictInfo {
        detect_port_conflict(self.probe.as_ref(), self.lookup.as_ref(), port, protocol)
    }
}

impl std::fmt::Debug for PortEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortEngine")
            .field("search_window", &self.search_window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(occupied: &[u16]) -> PortEngine {
        PortEngine::new(
            Arc::new(MockProbe::new(occupied.iter().copied())),
            Arc::new(NoProcessLookup),
            100,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_check_ports_keeps_order() {
        let ports: Vec<u16> = (6000..6080).rev().collect();
        let results = engine(&[6010, 6050]).check_ports(&ports, Protocol::Tcp).unwrap();

        assert_eq!(results.len(), ports.len());
        for (port, result) in ports.iter().zip(&results) {
            assert_eq!(result.port, *port);
            assert_eq!(result.available, *port != 6010 && *port != 6050);
        }
    }

    #[test]
    fn test_check_ports_cancelled() {
        let engine = engine(&[]);
        engine.cancel.cancel();
        assert_eq!(
            engine.check_ports(&[1, 2, 3], Protocol::Tcp),
            Err(PortError::Cancelled)
        );
    }

    #[test]
    fn test_check_ports_empty() {
        assert!(engine(&[]).check_ports(&[], Protocol::Udp).unwrap().is_empty());
    }

    #[test]
    fn test_detect_conflict_through_engine() {
        let info = engine(&[7000]).detect_port_conflict(7000, Protocol::Tcp);
        assert!(info.has_conflict);
        assert_eq!(info.severity, ConflictSeverity::Medium);
    }
}
