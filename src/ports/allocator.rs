//! Per-project-type port allocation

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{PortEngine, PortError, Protocol};
use crate::project::ProjectType;

/// Logical purpose of a port within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortRole {
    Api,
    Debug,
    DevServer,
    HotReload,
    Vnc,
    Database,
}

impl PortRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortRole::Api => "api",
            PortRole::Debug => "debug",
            PortRole::DevServer => "dev_server",
            PortRole::HotReload => "hot_reload",
            PortRole::Vnc => "vnc",
            PortRole::Database => "database",
        }
    }

    /// Runtime `.env` key that carries this role's port.
    pub fn env_var(&self) -> &'static str {
        match self {
            PortRole::Api | PortRole::DevServer => "DEV_PORT",
            PortRole::Debug => "DEBUG_PORT",
            PortRole::HotReload => "HOT_RELOAD_PORT",
            PortRole::Vnc => "VNC_PORT",
            PortRole::Database => "DATABASE_PORT",
        }
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "api" => Ok(PortRole::Api),
            "debug" => Ok(PortRole::Debug),
            "dev_server" | "devserver" => Ok(PortRole::DevServer),
            "hot_reload" | "hotreload" => Ok(PortRole::HotReload),
            "vnc" => Ok(PortRole::Vnc),
            "database" | "db" => Ok(PortRole::Database),
            _ => Err(format!("Unknown port role: {}", s)),
        }
    }
}

/// Default port per (project type, role). Order is the default role order.
pub const DEFAULT_PORTS: &[(ProjectType, PortRole, u16)] = &[
    (ProjectType::DotNet, PortRole::Api, 5000),
    (ProjectType::DotNet, PortRole::Debug, 5001),
    (ProjectType::DotNet, PortRole::Database, 1433),
    (ProjectType::Avalonia, PortRole::DevServer, 5000),
    (ProjectType::Avalonia, PortRole::Debug, 5001),
    (ProjectType::Avalonia, PortRole::Vnc, 5900),
    (ProjectType::Node, PortRole::DevServer, 3000),
    (ProjectType::Node, PortRole::Debug, 9229),
    (ProjectType::Node, PortRole::HotReload, 24678),
    (ProjectType::Python, PortRole::Api, 8000),
    (ProjectType::Python, PortRole::Debug, 5678),
    (ProjectType::Python, PortRole::Database, 5432),
    (ProjectType::Rust, PortRole::Api, 8080),
    (ProjectType::Rust, PortRole::Debug, 2345),
    (ProjectType::Go, PortRole::Api, 8080),
    (ProjectType::Go, PortRole::Debug, 2345),
    (ProjectType::Java, PortRole::Api, 8080),
    (ProjectType::Java, PortRole::Debug, 5005),
    (ProjectType::Java, PortRole::Database, 5432),
];

pub fn default_port(project_type: ProjectType, role: PortRole) -> Option<u16> {
    DEFAULT_PORTS
        .iter()
        .find(|(t, r, _)| *t == project_type && *r == role)
        .map(|(_, _, port)| *port)
}

/// Roles that have a default for this project type.
pub fn default_roles(project_type: ProjectType) -> Vec<PortRole> {
    DEFAULT_PORTS
        .iter()
        .filter(|(t, _, _)| *t == project_type)
        .map(|(_, role, _)| *role)
        .collect()
}

/// Partial-success result of allocating a project's ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPortAllocationResult {
    pub project_type: ProjectType,
    pub allocated_ports: BTreeMap<PortRole, u16>,
    pub failed_allocations: Vec<PortRole>,
    pub summary: String,
}

impl ProjectPortAllocationResult {
    pub fn is_complete(&self) -> bool {
        self.failed_allocations.is_empty()
    }
}

impl PortEngine {
    /// Try `preferred`, then scan `[min, max]` upward for the first free port.
    pub fn find_available_port(
        &self,
        preferred: u16,
        min: u16,
        max: u16,
        protocol: Protocol,
    ) -> Result<u16, PortError> {
        self.find_available_port_excluding(preferred, min, max, protocol, &BTreeSet::new())
    }

    fn find_available_port_excluding(
        &self,
        preferred: u16,
        min: u16,
        max: u16,
        protocol: Protocol,
        exclude: &BTreeSet<u16>,
    ) -> Result<u16, PortError> {
        if min == 0 || min > max {
            return Err(PortError::InvalidRange { min, max });
        }
        if self.cancel.is_cancelled() {
            return Err(PortError::Cancelled);
        }

        let preferred_ok = preferred != 0 && !exclude.contains(&preferred);
        if preferred_ok && self.probe.check_port(preferred, protocol).available {
            return Ok(preferred);
        }

        for port in min..=max {
            if self.cancel.is_cancelled() {
                return Err(PortError::Cancelled);
            }
            if (preferred_ok && port == preferred) || exclude.contains(&port) {
                continue;
            }
            if self.probe.check_port(port, protocol).available {
                debug!("Preferred port {} busy, found {}", preferred, port);
                return Ok(port);
            }
        }

        Err(PortError::NoAvailablePort { min, max })
    }

    /// Allocate one port per role around the type's defaults.
    ///
    /// Roles without a default, or with no free port in the search window,
    /// land in `failed_allocations`. Only cancellation fails the whole call.
    pub fn allocate_project_ports(
        &self,
        project_type: ProjectType,
        roles: &[PortRole],
    ) -> Result<ProjectPortAllocationResult, PortError> {
        let mut allocated_ports = BTreeMap::new();
        let mut failed_allocations = Vec::new();
        let mut taken = BTreeSet::new();
        let mut seen = BTreeSet::new();

        for &role in roles {
            if !seen.insert(role) {
                continue;
            }
            let Some(preferred) = default_port(project_type, role) else {
                warn!("No default port for {} role '{}'", project_type, role);
                failed_allocations.push(role);
                continue;
            };

            let min = preferred.saturating_sub(self.search_window).max(1);
            let max = preferred.saturating_add(self.search_window);
            match self.find_available_port_excluding(preferred, min, max, Protocol::Tcp, &taken) {
                Ok(port) => {
                    info!("Allocated port {} for {} role '{}'", port, project_type, role);
                    taken.insert(port);
                    allocated_ports.insert(role, port);
                }
                Err(PortError::Cancelled) => return Err(PortError::Cancelled),
                Err(e) => {
                    warn!("Could not allocate {} role '{}': {}", project_type, role, e);
                    failed_allocations.push(role);
                }
            }
        }

        let summary = summarize(project_type, &allocated_ports, &failed_allocations);
        Ok(ProjectPortAllocationResult {
            project_type,
            allocated_ports,
            failed_allocations,
            summary,
        })
    }
}

fn summarize(
    project_type: ProjectType,
    allocated: &BTreeMap<PortRole, u16>,
    failed: &[PortRole],
) -> String {
    let mut summary = format!(
        "Allocated {} of {} ports for {}",
        allocated.len(),
        allocated.len() + failed.len(),
        project_type
    );
    if !allocated.is_empty() {
        let parts: Vec<String> = allocated
            .iter()
            .map(|(role, port)| format!("{}={}", role, port))
            .collect();
        summary.push_str(&format!(": {}", parts.join(", ")));
    }
    if !failed.is_empty() {
        let parts: Vec<&str> = failed.iter().map(PortRole::as_str).collect();
        summary.push_str(&format!("; failed: {}", parts.join(", ")));
    }
    summary
}
