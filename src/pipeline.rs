//! Image materialization pipeline
//!
//! Moves a Custom configuration into the Images layer:
//! - Check the target name and the `Create` decision
//! - Copy the Custom directory
//! - Allocate ports for the detected project type
//! - Write the runtime `.env` and the metadata sidecar
//! - Freeze protected build artifacts
//!
//! Also applies runtime `.env` updates and records build status on
//! existing images.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use deck_policy::{
    generate_image_name, render_env, ConfigurationLayer, DirectoryOperation, EnvPermissionResult,
    FileOperation, Permission, PermissionEngine, PolicyError, RuntimeWhitelist, ViolationKind,
    ENV_FILE,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, DeckConfig};
use crate::layout::{
    validate_option_name, BuildStatus, DeckLayout, FsError, ImageMetadata, LayoutError,
    StdFileSystem,
};
use crate::ports::{default_roles, CheckMode, PortEngine, PortError, ProjectPortAllocationResult};
use crate::project::ProjectType;
use crate::signal::{CancellationToken, EXIT_CODE_CANCELLED};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("{operation} on {path} denied: {reason}")]
    Denied {
        path: String,
        operation: String,
        reason: String,
        violation: Option<ViolationKind>,
    },

    #[error("port error: {0}")]
    Ports(#[from] PortError),

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => 1,
            PipelineError::Policy(_) => 1,
            PipelineError::Layout(LayoutError::Fs(FsError::Cancelled { .. })) => {
                EXIT_CODE_CANCELLED
            }
            PipelineError::Layout(LayoutError::Denied { .. }) => 3,
            PipelineError::Layout(_) => 2,
            PipelineError::Denied { .. } => 3,
            PipelineError::Ports(PortError::Cancelled) => EXIT_CODE_CANCELLED,
            PipelineError::Ports(_) => 4,
            PipelineError::Cancelled => EXIT_CODE_CANCELLED,
        }
    }

    /// Next step for the user, when there is one.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            PipelineError::Layout(e) => Some(e.suggestion()),
            PipelineError::Denied {
                violation: Some(v), ..
            } => Some(format!("Run `deck explain {}` for alternatives", v)),
            PipelineError::Denied { .. } => Some("Make the change in the Custom layer".to_string()),
            PipelineError::Config(_) => {
                Some("Fix the configuration file and run `deck config show`".to_string())
            }
            _ => None,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// What `materialize_image` produced.
#[derive(Debug, Clone, Serialize)]
pub struct MaterializedImage {
    pub image_name: String,
    pub path: PathBuf,
    pub project_type: ProjectType,
    pub ports: ProjectPortAllocationResult,
    pub env: BTreeMap<String, String>,
    pub metadata: ImageMetadata,

    /// Files made read-only
    pub protected_files: Vec<String>,
}

/// Failure after the image directory was created.
enum Failed {
    Cancelled(PathBuf),
    Other(PathBuf, PipelineError),
}

/// Layout, policy and port engine wired for one project.
pub struct ImagePipeline {
    layout: DeckLayout,
    ports: PortEngine,
    cancel: CancellationToken,
}

impl ImagePipeline {
    pub fn new(layout: DeckLayout, ports: PortEngine, cancel: CancellationToken) -> Self {
        Self {
            layout,
            ports,
            cancel,
        }
    }

    /// Real filesystem and sockets, configured from the effective config.
    pub fn from_config(
        project_root: &Path,
        config: &DeckConfig,
        cancel: CancellationToken,
    ) -> PipelineResult<Self> {
        let whitelist = RuntimeWhitelist::with_variables(config.extra_runtime_variables());
        let policy = PermissionEngine::new(whitelist)?;
        let layout = DeckLayout::new(project_root, Arc::new(StdFileSystem), policy);
        let ports = PortEngine::from_config(config, CheckMode::Bind, cancel.clone());
        Ok(Self::new(layout, ports, cancel))
    }

    pub fn layout(&self) -> &DeckLayout {
        &self.layout
    }

    pub fn ports(&self) -> &PortEngine {
        &self.ports
    }

    fn check_cancelled(&self) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Create `<prefix>-YYYYMMDD-HHMM` in the Images layer from a Custom configuration.
    pub fn materialize_image(
        &self,
        custom: &str,
        prefix: Option<&str>,
    ) -> PipelineResult<MaterializedImage> {
        let fs = self.layout.fs();
        let policy = self.layout.policy();

        validate_option_name(custom)?;
        let source = self.layout.option_dir(ConfigurationLayer::Custom, custom);
        if !fs.is_dir(&source) {
            return Err(LayoutError::CustomNotFound(custom.to_string()).into());
        }

        let now = Utc::now();
        let image_name = generate_image_name(prefix.unwrap_or(custom), now);
        let naming = policy.validate_image_directory_name(&image_name);
        if !naming.is_valid {
            return Err(LayoutError::InvalidName {
                name: image_name,
                message: naming.errors.join("; "),
                suggested: naming.suggested_name,
            }
            .into());
        }

        let target = self.layout.option_dir(ConfigurationLayer::Images, &image_name);
        let decision = policy.check_directory(&target, DirectoryOperation::Create);
        if decision.permission == Permission::Denied {
            return Err(PipelineError::Denied {
                path: decision.path,
                operation: DirectoryOperation::Create.to_string(),
                reason: decision.reason,
                violation: decision.violation,
            });
        }
        if fs.exists(&target) {
            return Err(LayoutError::ImageExists(image_name).into());
        }

        self.check_cancelled()?;
        fs.ensure_directory_exists(&self.layout.layer_dir(ConfigurationLayer::Images))
            .map_err(LayoutError::from)?;

        match self.populate_image(custom, image_name, &source, &target, now) {
            Ok(image) => Ok(image),
            Err(err) => {
                self.discard_partial_image(&err);
                match err {
                    Failed::Cancelled(_) => Err(PipelineError::Cancelled),
                    Failed::Other(_, e) => Err(e),
                }
            }
        }
    }

    /// Everything after the target directory name is settled. Any error
    /// carries the target so the caller can remove it.
    fn populate_image(
        &self,
        custom: &str,
        image_name: String,
        source: &Path,
        target: &Path,
        now: chrono::DateTime<Utc>,
    ) -> Result<MaterializedImage, Failed> {
        let fs = self.layout.fs();
        let fail = |e: PipelineError| Failed::Other(target.to_path_buf(), e);

        let copied = match fs.copy_directory(source, target, &self.cancel) {
            Ok(n) => n,
            Err(FsError::Cancelled { .. }) => return Err(Failed::Cancelled(target.to_path_buf())),
            Err(e) => return Err(fail(LayoutError::from(e).into())),
        };
        debug!(custom, image = %image_name, files = copied, "copied custom configuration");

        if self.cancel.is_cancelled() {
            return Err(Failed::Cancelled(target.to_path_buf()));
        }
        let project_type = ProjectType::detect(target, fs);
        let ports = match self
            .ports
            .allocate_project_ports(project_type, &default_roles(project_type))
        {
            Ok(ports) => ports,
            Err(PortError::Cancelled) => return Err(Failed::Cancelled(target.to_path_buf())),
            Err(e) => return Err(fail(e.into())),
        };
        if !ports.is_complete() {
            warn!(image = %image_name, "{}", ports.summary);
        }

        let mut env = BTreeMap::new();
        env.insert("PROJECT_NAME".to_string(), custom.to_string());
        env.insert("CONTAINER_NAME".to_string(), image_name.clone());
        for (role, port) in &ports.allocated_ports {
            env.insert(role.env_var().to_string(), port.to_string());
        }
        self.write_env(&target.join(ENV_FILE), &env).map_err(fail)?;

        let metadata = ImageMetadata::new(&image_name, custom, now);
        self.layout
            .save_image_metadata(&metadata)
            .map_err(|e| fail(e.into()))?;

        if self.cancel.is_cancelled() {
            return Err(Failed::Cancelled(target.to_path_buf()));
        }
        let protected_files = self.freeze_protected(target).map_err(fail)?;

        info!(
            image = %image_name,
            project_type = %project_type,
            ports = ports.allocated_ports.len(),
            "materialized image"
        );

        Ok(MaterializedImage {
            image_name,
            path: target.to_path_buf(),
            project_type,
            ports,
            env,
            metadata,
            protected_files,
        })
    }

    /// Validate `.env` changes for an image and write only the allowed ones.
    pub fn apply_env_changes(
        &self,
        image: &str,
        changes: &BTreeMap<String, String>,
    ) -> PipelineResult<EnvPermissionResult> {
        let dir = self.image_dir(image)?;
        let env_path = dir.join(ENV_FILE);

        let write = self.layout.policy().check_file(&env_path, FileOperation::Write);
        if write.permission == Permission::Denied {
            return Err(PipelineError::Denied {
                path: write.path,
                operation: FileOperation::Write.to_string(),
                reason: write.reason,
                violation: write.violation,
            });
        }

        let result = self
            .layout
            .policy()
            .validate_env_file_changes(&env_path, changes);
        if !result.allowed_changes.is_empty() {
            self.write_env(&env_path, &result.allowed_changes)?;
        }

        info!(
            image,
            applied = result.allowed_changes.len(),
            denied = result.denied_changes.len(),
            "applied env changes"
        );
        Ok(result)
    }

    /// Update the sidecar build status.
    pub fn record_build_status(
        &self,
        image: &str,
        status: BuildStatus,
    ) -> PipelineResult<ImageMetadata> {
        let mut metadata = self.load_metadata(image)?;
        metadata.build_status = status;
        self.layout.save_image_metadata(&metadata)?;
        Ok(metadata)
    }

    /// Stamp `last_started` on the sidecar.
    pub fn record_started(&self, image: &str) -> PipelineResult<ImageMetadata> {
        let mut metadata = self.load_metadata(image)?;
        metadata.last_started = Some(Utc::now());
        self.layout.save_image_metadata(&metadata)?;
        Ok(metadata)
    }

    /// Remove a half-built image directory.
    fn discard_partial_image(&self, failed: &Failed) {
        let target = match failed {
            Failed::Cancelled(t) | Failed::Other(t, _) => t,
        };
        match self.layout.fs().remove_directory(target) {
            Ok(()) => warn!(path = %target.display(), "removed partially created image"),
            Err(e) => warn!(
                path = %target.display(),
                error = %e,
                "could not remove partially created image"
            ),
        }
    }

    fn image_dir(&self, image: &str) -> PipelineResult<PathBuf> {
        validate_option_name(image)?;
        let dir = self.layout.option_dir(ConfigurationLayer::Images, image);
        if !self.layout.fs().is_dir(&dir) {
            return Err(LayoutError::ImageNotFound(image.to_string()).into());
        }
        Ok(dir)
    }

    /// Existing sidecar, or fresh `Prepared` metadata for an image without one.
    fn load_metadata(&self, image: &str) -> PipelineResult<ImageMetadata> {
        self.image_dir(image)?;
        match self.layout.get_image_metadata(image)? {
            Some(metadata) => Ok(metadata),
            None => {
                warn!(image, "image has no metadata sidecar, recreating it");
                Ok(ImageMetadata::new(image, "unknown", Utc::now()))
            }
        }
    }

    fn write_env(&self, path: &Path, changes: &BTreeMap<String, String>) -> PipelineResult<()> {
        let fs = self.layout.fs();
        let existing = if fs.exists(path) {
            fs.read_text_file(path).map_err(LayoutError::from)?
        } else {
            String::new()
        };
        fs.write_text_file(path, &render_env(&existing, changes))
            .map_err(LayoutError::from)?;
        Ok(())
    }

    /// Make protected build artifacts at the image root read-only.
    fn freeze_protected(&self, dir: &Path) -> PipelineResult<Vec<String>> {
        let fs = self.layout.fs();
        let mut frozen = Vec::new();
        for file in fs.list_files(dir).map_err(LayoutError::from)? {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.layout.policy().is_protected_file(&name) {
                fs.set_readonly(&file, true).map_err(LayoutError::from)?;
                frozen.push(name);
            }
        }
        Ok(frozen)
    }
}
