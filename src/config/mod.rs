//! Configuration merge system
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. User config (~/.config/deck/config.toml)
//! 3. Project config (.deck/config.toml)
//! 4. CLI flags

pub mod defaults;
mod effective;
mod merge;
mod types;

pub use effective::{
    user_config_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig,
    PROJECT_CONFIG_FILE,
};
pub use merge::{merge, merge_field, merge_layers, merge_nested, Merge};
pub use types::{DeckConfig, LoggingConfig, PolicyConfig, PortsConfig, RemoteTemplatesConfig};
