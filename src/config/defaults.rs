//! Built-in defaults (layer 1)

use super::types::{
    DeckConfig, LoggingConfig, PolicyConfig, PortsConfig, RemoteTemplatesConfig,
};

pub const TEMPLATES_BRANCH: &str = "main";
pub const CACHE_TTL_HOURS: u64 = 24;
pub const LOG_LEVEL: &str = "info";
pub const SEARCH_WINDOW: u16 = 100;
pub const PROBE_TIMEOUT_MS: u64 = 500;

/// The lowest-precedence layer.
pub fn builtin() -> DeckConfig {
    DeckConfig {
        remote_templates: Some(RemoteTemplatesConfig {
            repository: None,
            branch: Some(TEMPLATES_BRANCH.to_string()),
            cache_ttl_hours: Some(CACHE_TTL_HOURS),
            auto_update: Some(false),
            fallback: None,
        }),
        logging: Some(LoggingConfig {
            level: Some(LOG_LEVEL.to_string()),
            file: None,
            file_level: None,
        }),
        ports: Some(PortsConfig {
            search_window: Some(SEARCH_WINDOW),
            probe_timeout_ms: Some(PROBE_TIMEOUT_MS),
        }),
        policy: Some(PolicyConfig {
            extra_runtime_variables: Some(Vec::new()),
        }),
    }
}
