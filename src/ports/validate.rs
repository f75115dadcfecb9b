//! Static port number validation

use serde::{Deserialize, Serialize};

use super::conflict::PRIVILEGED_PORT_MAX;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortValidationResult {
    pub port: u32,
    pub is_valid: bool,
    pub requires_privilege: bool,

    #[serde(default)]
    pub errors: Vec<String>,

    #[serde(default)]
    pub warnings: Vec<String>,

    /// Unprivileged ports to use instead
    #[serde(default)]
    pub suggested_alternatives: Vec<u16>,
}

/// Range-check a port and flag privileged ones.
///
/// Accepts a `u32` so out-of-range input can be reported rather than rejected
/// at parse time.
pub fn validate_port(port: u32, check_privileged: bool) -> PortValidationResult {
    let mut result = PortValidationResult {
        port,
        is_valid: true,
        requires_privilege: false,
        errors: Vec::new(),
        warnings: Vec::new(),
        suggested_alternatives: Vec::new(),
    };

    let port = match u16::try_from(port) {
        Ok(p) if p != 0 => p,
        _ => {
            result.is_valid = false;
            result
                .errors
                .push(format!("Port {} is out of valid range (1-65535)", port));
            return result;
        }
    };

    if check_privileged && port <= PRIVILEGED_PORT_MAX {
        result.requires_privilege = true;
        result.warnings.push(format!(
            "Port {} is privileged and needs elevated permissions to bind",
            port
        ));
        // 80 -> 8080, 443 -> 8443
        result.suggested_alternatives = vec![8000 + port, 10000 + port];
    }

    result
}
