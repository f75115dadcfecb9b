//! Runtime variable whitelist and `.env` file handling.

use crate::result::VariableType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Variables that may change in an image `.env` without rebuilding.
pub const DEFAULT_RUNTIME_VARIABLES: &[&str] = &[
    "DEV_PORT",
    "DEBUG_PORT",
    "PROJECT_NAME",
    "WORKSPACE_PATH",
    "CONTAINER_NAME",
    "NETWORK_NAME",
    "VOLUME_PREFIX",
];

/// Port variables written into an image `.env` at materialization, beyond
/// `DEV_PORT` and `DEBUG_PORT`. They are runtime by default so an allocated
/// port can be moved later.
pub const PORT_VARIABLES: &[&str] = &["HOT_RELOAD_PORT", "VNC_PORT", "DATABASE_PORT"];

/// Queryable, extensible set of runtime variable names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeWhitelist {
    variables: BTreeSet<String>,
}

impl Default for RuntimeWhitelist {
    fn default() -> Self {
        Self {
            variables: DEFAULT_RUNTIME_VARIABLES
                .iter()
                .chain(PORT_VARIABLES)
                .map(|v| v.to_string())
                .collect(),
        }
    }
}

impl RuntimeWhitelist {
    /// Default set plus extra names.
    pub fn with_variables<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut whitelist = Self::default();
        whitelist.extend(extra);
        whitelist
    }

    pub fn extend<I, S>(&mut self, extra: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in extra {
            let name = name.into();
            let name = name.trim();
            if !name.is_empty() {
                self.variables.insert(name.to_string());
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.variables.contains(key)
    }

    /// Names in sorted order.
    pub fn variables(&self) -> Vec<String> {
        self.variables.iter().cloned().collect()
    }

    pub fn classify(&self, key: &str) -> VariableType {
        if self.contains(key) {
            VariableType::Runtime
        } else {
            VariableType::BuildTime
        }
    }
}

/// Parse `KEY=VALUE` lines. Comments, blank lines and lines without `=` are
/// skipped; surrounding quotes on values are removed.
pub fn parse_env(contents: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();

    for line in contents.lines() {
        if let Some((key, value)) = split_assignment(line) {
            vars.insert(key.to_string(), unquote(value).to_string());
        }
    }

    vars
}

/// Apply `changes` to existing `.env` text.
///
/// Existing keys are rewritten in place, comments and ordering are kept, and
/// new keys are appended in sorted order.
pub fn render_env(contents: &str, changes: &BTreeMap<String, String>) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut written: BTreeSet<&str> = BTreeSet::new();

    for line in contents.lines() {
        match split_assignment(line) {
            Some((key, _)) => match changes.get_key_value(key) {
                Some((k, v)) => {
                    out.push(format!("{}={}", k, escape_value(v)));
                    written.insert(k.as_str());
                }
                None => out.push(line.to_string()),
            },
            None => out.push(line.to_string()),
        }
    }

    for (key, value) in changes {
        if !written.contains(key.as_str()) {
            out.push(format!("{}={}", key, escape_value(value)));
        }
    }

    let mut rendered = out.join("\n");
    rendered.push('\n');
    rendered
}

/// Why a change cannot be written as a single `KEY=VALUE` line, if it can't.
pub(crate) fn malformed_entry(key: &str, value: &str) -> Option<&'static str> {
    let key_ok = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !key_ok {
        return Some("variable names may only contain letters, digits and '_'");
    }
    if value.contains(['\n', '\r', '\0']) {
        return Some("values must be a single line without NUL bytes");
    }
    None
}

fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

/// Keep a value on one line even if validation was bypassed.
fn escape_value(value: &str) -> String {
    value
        .replace('\r', "\\r")
        .replace('\n', "\\n")
        .replace('\0', "")
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
