//! Port conflict detection and resolution suggestions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use super::probe::{PortProbe, Protocol};

/// Highest port that needs elevated privileges to bind.
pub const PRIVILEGED_PORT_MAX: u16 = 1023;

/// How disruptive a conflict is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConflictSeverity {
    None,
    Medium,
    High,
    Critical,
}

/// Process occupying a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub process_id: u32,
    pub process_name: String,
    pub is_system_process: bool,
    pub can_be_stopped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConflictInfo {
    pub port: u16,
    pub protocol: Protocol,
    pub has_conflict: bool,
    pub severity: ConflictSeverity,

    /// Best effort; absent when the lookup is unavailable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessInfo>,

    pub detected_at: DateTime<Utc>,
}

/// Resolves which process holds a port.
pub trait ProcessLookup: Send + Sync {
    fn find_process(&self, port: u16, protocol: Protocol) -> Option<ProcessInfo>;
}

/// Lookup that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProcessLookup;

impl ProcessLookup for NoProcessLookup {
    fn find_process(&self, _port: u16, _protocol: Protocol) -> Option<ProcessInfo> {
        None
    }
}

/// Lookup through `lsof`, killed if it runs past the timeout.
#[derive(Debug, Clone)]
pub struct LsofLookup {
    timeout: Duration,
}

impl LsofLookup {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn run(&self, port: u16, protocol: Protocol) -> Option<String> {
        let selector = match protocol {
            Protocol::Tcp => format!("-iTCP:{}", port),
            Protocol::Udp => format!("-iUDP:{}", port),
        };
        let mut cmd = Command::new("lsof");
        cmd.args(["-nP", &selector, "-Fpcu"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if protocol == Protocol::Tcp {
            cmd.arg("-sTCP:LISTEN");
        }

        let mut child = cmd.spawn().ok()?;
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if start.elapsed() < self.timeout => {
                    thread::sleep(Duration::from_millis(10));
                }
                _ => {
                    debug!("lsof lookup for port {} timed out", port);
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
            }
        }

        let mut stdout = String::new();
        child.stdout.take()?.read_to_string(&mut stdout).ok()?;
        Some(stdout)
    }
}

impl Default for LsofLookup {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl ProcessLookup for LsofLookup {
    fn find_process(&self, port: u16, protocol: Protocol) -> Option<ProcessInfo> {
        let output = self.run(port, protocol)?;
        parse_lsof_fields(&output)
    }
}

/// Parse the first process out of `lsof -F pcu` output.
pub fn parse_lsof_fields(output: &str) -> Option<ProcessInfo> {
    let mut pid = None;
    let mut name = None;
    let mut uid = None;

    for line in output.lines() {
        let (tag, value) = match line.char_indices().nth(1) {
            Some((idx, _)) => line.split_at(idx),
            None => continue,
        };
        match tag {
            "p" if pid.is_none() => pid = value.parse::<u32>().ok(),
            // A second process record begins
            "p" => break,
            "c" if name.is_none() => name = Some(value.to_string()),
            "u" if uid.is_none() => uid = value.parse::<u32>().ok(),
            _ => {}
        }
    }

    let process_id = pid?;
    let is_system_process = process_id <= 1 || uid == Some(0);
    Some(ProcessInfo {
        process_id,
        process_name: name.unwrap_or_else(|| "unknown".to_string()),
        is_system_process,
        can_be_stopped: !is_system_process,
    })
}

pub fn conflict_severity(port: u16, process: Option<&ProcessInfo>) -> ConflictSeverity {
    if process.is_some_and(|p| p.is_system_process) {
        ConflictSeverity::Critical
    } else if port <= PRIVILEGED_PORT_MAX {
        ConflictSeverity::High
    } else {
        ConflictSeverity::Medium
    }
}

/// Probe a port and, when busy, try to name the process holding it.
pub fn detect_port_conflict(
    probe: &dyn PortProbe,
    lookup: &dyn ProcessLookup,
    port: u16,
    protocol: Protocol,
) -> PortConflictInfo {
    let check = probe.check_port(port, protocol);
    let detected_at = Utc::now();

    if check.available {
        return PortConflictInfo {
            port,
            protocol,
            has_conflict: false,
            severity: ConflictSeverity::None,
            process: None,
            detected_at,
        };
    }

    let process = lookup.find_process(port, protocol);
    if process.is_none() {
        debug!("Port {}/{} busy, occupying process unknown", port, protocol);
    }

    PortConflictInfo {
        port,
        protocol,
        has_conflict: true,
        severity: conflict_severity(port, process.as_ref()),
        process,
        detected_at,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionKind {
    UseAlternativePort,
    ModifyConfiguration,
    StopConflictingProcess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSuggestion {
    pub kind: ResolutionKind,
    pub action: String,
}

/// Ordered ways out of a conflict. Empty when there is none.
pub fn get_resolution_suggestions(
    conflict: &PortConflictInfo,
    alternative: Option<u16>,
) -> Vec<ResolutionSuggestion> {
    if !conflict.has_conflict {
        return Vec::new();
    }

    let mut suggestions = vec![
        ResolutionSuggestion {
            kind: ResolutionKind::UseAlternativePort,
            action: match alternative {
                Some(alt) => format!("Use port {} instead of {}", alt, conflict.port),
                None => format!("Pick a free port instead of {}", conflict.port),
            },
        },
        ResolutionSuggestion {
            kind: ResolutionKind::ModifyConfiguration,
            action: format!(
                "Change the port mapping for {} in the Custom configuration and rematerialize the image",
                conflict.port
            ),
        },
    ];

    if let Some(process) = conflict.process.as_ref().filter(|p| p.can_be_stopped) {
        suggestions.push(ResolutionSuggestion {
            kind: ResolutionKind::StopConflictingProcess,
            action: format!(
                "Stop '{}' (pid {}) which is holding port {}",
                process.process_name, process.process_id, conflict.port
            ),
        });
    }

    suggestions
}
