//! Mergeable configuration shapes
//!
//! Every field is optional so a file or CLI layer can be a sparse patch.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults;
use super::merge::impl_merge;

/// Root configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeckConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_templates: Option<RemoteTemplatesConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyConfig>,
}

/// Where templates are synced from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteTemplatesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_hours: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_update: Option<bool>,

    /// Secondary source with the same shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Box<RemoteTemplatesConfig>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Optional log file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Level for the file sink; defaults to `level`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_level: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortsConfig {
    /// Half-width of the search range around a default port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_window: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Added to the built-in runtime variable whitelist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_runtime_variables: Option<Vec<String>>,
}

impl_merge!(DeckConfig {} nested { remote_templates, logging, ports, policy });
impl_merge!(RemoteTemplatesConfig { repository, branch, cache_ttl_hours, auto_update } nested { fallback });
impl_merge!(LoggingConfig { level, file, file_level });
impl_merge!(PortsConfig { search_window, probe_timeout_ms });
impl_merge!(PolicyConfig { extra_runtime_variables });

impl DeckConfig {
    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(defaults::LOG_LEVEL)
    }

    pub fn log_file(&self) -> Option<&PathBuf> {
        self.logging.as_ref().and_then(|l| l.file.as_ref())
    }

    pub fn log_file_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.file_level.as_deref())
            .unwrap_or_else(|| self.log_level())
    }

    pub fn search_window(&self) -> u16 {
        self.ports
            .as_ref()
            .and_then(|p| p.search_window)
            .unwrap_or(defaults::SEARCH_WINDOW)
    }

    pub fn probe_timeout_ms(&self) -> u64 {
        self.ports
            .as_ref()
            .and_then(|p| p.probe_timeout_ms)
            .unwrap_or(defaults::PROBE_TIMEOUT_MS)
    }

    pub fn extra_runtime_variables(&self) -> &[String] {
        self.policy
            .as_ref()
            .and_then(|p| p.extra_runtime_variables.as_deref())
            .unwrap_or(&[])
    }
}
