//! Permission decision types.

use crate::guidance::ViolationKind;
use crate::layer::ConfigurationLayer;
use crate::rules::{DirectoryOperation, FileOperation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Allowed,
    Warning,
    Denied,
}

impl Permission {
    /// `Allowed` and `Warning` both let the operation proceed.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Permission::Denied)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Allowed => write!(f, "allowed"),
            Permission::Warning => write!(f, "warning"),
            Permission::Denied => write!(f, "denied"),
        }
    }
}

/// Decision for a single file operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePermissionResult {
    pub path: String,
    pub operation: FileOperation,

    /// Layer the path was classified into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<ConfigurationLayer>,

    pub permission: Permission,
    pub reason: String,

    #[serde(default)]
    pub alternatives: Vec<String>,

    #[serde(default)]
    pub suggestions: Vec<String>,

    /// Set on every denial so callers can fetch guidance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<ViolationKind>,
}

impl FilePermissionResult {
    pub fn is_allowed(&self) -> bool {
        self.permission.is_allowed()
    }
}

/// Severity of a directory operation's blast radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// What a directory operation would break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impact {
    pub level: ImpactLevel,
    pub affected_components: Vec<String>,
}

/// Decision for a single directory operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryPermissionResult {
    pub path: String,
    pub operation: DirectoryOperation,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<ConfigurationLayer>,

    pub permission: Permission,
    pub reason: String,

    #[serde(default)]
    pub alternatives: Vec<String>,

    #[serde(default)]
    pub suggestions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<Impact>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<ViolationKind>,
}

impl DirectoryPermissionResult {
    pub fn is_allowed(&self) -> bool {
        self.permission.is_allowed()
    }
}

/// Whether an env key may change after the image is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Runtime,
    BuildTime,
}

/// Per-variable outcome of an env change validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvValidationDetail {
    pub variable_type: VariableType,
    pub permission: Permission,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Outcome of validating a set of env changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvPermissionResult {
    pub path: String,

    /// Changes that may be written
    #[serde(default)]
    pub allowed_changes: BTreeMap<String, String>,

    /// Changes that must go through the Custom layer instead
    #[serde(default)]
    pub denied_changes: BTreeMap<String, String>,

    #[serde(default)]
    pub details: BTreeMap<String, EnvValidationDetail>,
}

impl EnvPermissionResult {
    /// True when nothing was denied.
    pub fn is_valid(&self) -> bool {
        self.denied_changes.is_empty()
    }
}
