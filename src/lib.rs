//! deck - three-tier development environment configuration engine
//!
//! Configurations move from read-only Templates, to user-editable Custom
//! copies, to runnable Images. This crate owns the directory layout, the
//! port allocator, the layered config merge and the materialization
//! pipeline; the permission policy lives in `deck-policy`.

pub mod config;
pub mod layout;
pub mod logging;
pub mod pipeline;
pub mod ports;
pub mod project;
pub mod signal;

pub use config::{DeckConfig, EffectiveConfig, Merge};
pub use deck_policy::{
    ConfigurationLayer, DirectoryOperation, FileOperation, Permission, PermissionEngine,
    ViolationKind,
};
pub use layout::{DeckLayout, DirectoryValidationResult, LayoutError, StdFileSystem};
pub use pipeline::{ImagePipeline, PipelineError};
pub use ports::{PortEngine, PortRole, Protocol};
pub use project::ProjectType;
pub use signal::CancellationToken;
