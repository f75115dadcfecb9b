//! Directory layer model
//!
//! Owns `<project>/.deck/{templates,custom,images}`: creation, validation,
//! template copies and per-image metadata.

mod fs;
mod metadata;
mod option;
mod validation;

pub use fs::{FileSystem, FsError, StdFileSystem};
pub use metadata::{BuildStatus, ImageMetadata, MetadataError};
pub use option::{ConfigurationOption, LayerOptions};
pub use validation::DirectoryValidationResult;

use deck_policy::{
    ConfigurationLayer, DirectoryOperation, FileEntry, PermissionEngine, ViolationKind, DECK_DIR,
    IMAGE_METADATA_FILE,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::signal::CancellationToken;

/// Suffix for generated custom configuration names.
const CUSTOM_SUFFIX: &str = "-custom";

/// Errors for layout operations
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("No .deck directory in {}", .0.display())]
    NotInitialized(PathBuf),

    #[error("Template '{name}' not found")]
    TemplateNotFound { name: String, available: Vec<String> },

    #[error("Custom configuration '{0}' already exists")]
    CustomExists(String),

    #[error("Custom configuration '{0}' not found")]
    CustomNotFound(String),

    #[error("Image '{0}' not found")]
    ImageNotFound(String),

    #[error("Image '{0}' already exists")]
    ImageExists(String),

    #[error("Invalid name '{name}': {message}")]
    InvalidName {
        name: String,
        message: String,
        suggested: Option<String>,
    },

    #[error("Invalid metadata for image '{image}': {source}")]
    Metadata {
        image: String,
        #[source]
        source: MetadataError,
    },

    #[error("{operation} on {path} denied: {reason}")]
    Denied {
        path: String,
        operation: String,
        reason: String,
        violation: Option<ViolationKind>,
    },

    #[error(transparent)]
    Fs(#[from] FsError),
}

impl LayoutError {
    /// Next step for the user.
    pub fn suggestion(&self) -> String {
        match self {
            LayoutError::NotInitialized(_) => "Run `deck init` to create the layout".to_string(),
            LayoutError::TemplateNotFound { available, .. } if available.is_empty() => {
                "No templates are installed; sync templates into .deck/templates/".to_string()
            }
            LayoutError::TemplateNotFound { available, .. } => {
                format!("Available templates: {}", available.join(", "))
            }
            LayoutError::CustomExists(_) => {
                "Choose another --name, or omit it to generate a free one".to_string()
            }
            LayoutError::CustomNotFound(_) => {
                "Run `deck list` to see custom configurations, or `deck copy <template>`"
                    .to_string()
            }
            LayoutError::ImageNotFound(_) => "Run `deck list` to see existing images".to_string(),
            LayoutError::ImageExists(_) => {
                "Wait a minute for a new timestamp or choose another --prefix".to_string()
            }
            LayoutError::InvalidName {
                suggested: Some(s), ..
            } => format!("Use '{}' instead", s),
            LayoutError::InvalidName { .. } => {
                "Use letters, digits, '.', '_' and '-' only".to_string()
            }
            LayoutError::Metadata { image, .. } => format!(
                "Repair or remove .deck/images/{}/{} and run `deck validate`",
                image, IMAGE_METADATA_FILE
            ),
            LayoutError::Denied {
                violation: Some(v), ..
            } => format!("Run `deck explain {}` for alternatives", v),
            LayoutError::Denied { .. } => "Make the change in the Custom layer".to_string(),
            LayoutError::Fs(FsError::Cancelled { partial }) => {
                format!("Remove the partial copy at {} before retrying", partial.display())
            }
            LayoutError::Fs(_) => {
                "Check permissions and free space in the project directory".to_string()
            }
        }
    }
}

/// The three-tier directory structure of one project.
pub struct DeckLayout {
    project_root: PathBuf,
    fs: Arc<dyn FileSystem>,
    policy: PermissionEngine,
}

impl DeckLayout {
    pub fn new(
        project_root: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        policy: PermissionEngine,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            fs,
            policy,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn deck_root(&self) -> PathBuf {
        self.project_root.join(DECK_DIR)
    }

    pub fn layer_dir(&self, layer: ConfigurationLayer) -> PathBuf {
        self.deck_root().join(layer.dir_name())
    }

    pub fn option_dir(&self, layer: ConfigurationLayer, name: &str) -> PathBuf {
        self.layer_dir(layer).join(name)
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn policy(&self) -> &PermissionEngine {
        &self.policy
    }

    /// Create any missing layer directories. Idempotent.
    pub fn initialize_layout(&self) -> Result<(), LayoutError> {
        for layer in ConfigurationLayer::ALL {
            let dir = self.layer_dir(layer);
            if !self.fs.is_dir(&dir) {
                self.fs.ensure_directory_exists(&dir)?;
                info!(path = %dir.display(), "created layer directory");
            }
        }
        Ok(())
    }

    /// Check structure; I/O failures while scanning propagate.
    pub fn validate_layout(&self) -> Result<DirectoryValidationResult, LayoutError> {
        let mut result = DirectoryValidationResult::new();
        let deck_root = self.deck_root();

        if !self.fs.is_dir(&deck_root) {
            result.add_error(format!("Missing {} directory at {}", DECK_DIR, deck_root.display()));
            result.suggest("Run `deck init` to create the .deck layout");
            return Ok(result);
        }

        for layer in ConfigurationLayer::ALL {
            if !self.fs.is_dir(&self.layer_dir(layer)) {
                result.add_error(format!(
                    "Missing required directory: {}/{}",
                    DECK_DIR,
                    layer.dir_name()
                ));
                result.suggest("Run `deck init` to recreate missing directories");
            }
        }

        let templates = self.layer_dir(ConfigurationLayer::Templates);
        if self.fs.is_dir(&templates) && self.fs.list_directories(&templates)?.is_empty() {
            result.add_warning("Templates directory is empty");
            result.suggest("Sync templates from the configured repository into .deck/templates/");
        }

        let images = self.layer_dir(ConfigurationLayer::Images);
        if self.fs.is_dir(&images) {
            for dir in self.fs.list_directories(&images)? {
                let name = file_name(&dir);
                let mut entries = Vec::new();
                for file in self.fs.list_files(&dir)? {
                    entries.push(FileEntry {
                        name: file_name(&file),
                        writable: !self.fs.is_readonly(&file)?,
                    });
                }
                let has_metadata = self.fs.exists(&dir.join(IMAGE_METADATA_FILE));

                let summary = self
                    .policy
                    .summarize_image_directory(&name, &entries, has_metadata);
                for message in summary.messages() {
                    result.add_warning(message);
                }
            }
        }

        debug!(
            valid = result.is_valid,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "validated layout"
        );
        Ok(result)
    }

    /// Copy a template into the Custom layer, returning the name used.
    pub fn copy_template_to_custom(
        &self,
        template: &str,
        custom_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, LayoutError> {
        validate_option_name(template)?;
        let source = self.option_dir(ConfigurationLayer::Templates, template);
        if !self.fs.is_dir(&source) {
            let available = self.list_names(ConfigurationLayer::Templates)?;
            return Err(LayoutError::TemplateNotFound {
                name: template.to_string(),
                available,
            });
        }

        self.fs
            .ensure_directory_exists(&self.layer_dir(ConfigurationLayer::Custom))?;

        let name = match custom_name {
            Some(name) => {
                validate_option_name(name)?;
                if self.fs.exists(&self.option_dir(ConfigurationLayer::Custom, name)) {
                    return Err(LayoutError::CustomExists(name.to_string()));
                }
                name.to_string()
            }
            None => self.unique_custom_name(template),
        };

        let target = self.option_dir(ConfigurationLayer::Custom, &name);
        let decision = self.policy.check_directory(&target, DirectoryOperation::Create);
        if !decision.is_allowed() {
            return Err(LayoutError::Denied {
                path: decision.path,
                operation: DirectoryOperation::Create.to_string(),
                reason: decision.reason,
                violation: decision.violation,
            });
        }

        let copied = self.fs.copy_directory(&source, &target, cancel)?;
        info!(template, custom = %name, files = copied, "copied template to custom layer");
        Ok(name)
    }

    /// `<template>-custom`, then `-custom-2`, `-custom-3`, ... until free.
    fn unique_custom_name(&self, template: &str) -> String {
        let base = format!("{}{}", template, CUSTOM_SUFFIX);
        let mut candidate = base.clone();
        let mut n = 2u32;
        while self
            .fs
            .exists(&self.option_dir(ConfigurationLayer::Custom, &candidate))
        {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        candidate
    }

    pub fn save_image_metadata(&self, metadata: &ImageMetadata) -> Result<(), LayoutError> {
        validate_option_name(&metadata.image_name)?;
        let dir = self.option_dir(ConfigurationLayer::Images, &metadata.image_name);
        if !self.fs.is_dir(&dir) {
            return Err(LayoutError::ImageNotFound(metadata.image_name.clone()));
        }
        self.fs
            .write_text_file(&dir.join(IMAGE_METADATA_FILE), &metadata.to_key_value())?;
        debug!(image = %metadata.image_name, status = %metadata.build_status, "saved image metadata");
        Ok(())
    }

    /// `Ok(None)` when the image or its sidecar does not exist.
    pub fn get_image_metadata(
        &self,
        image_name: &str,
    ) -> Result<Option<ImageMetadata>, LayoutError> {
        validate_option_name(image_name)?;
        let path = self
            .option_dir(ConfigurationLayer::Images, image_name)
            .join(IMAGE_METADATA_FILE);
        if !self.fs.exists(&path) {
            return Ok(None);
        }

        let contents = self.fs.read_text_file(&path)?;
        ImageMetadata::parse(&contents)
            .map(Some)
            .map_err(|source| LayoutError::Metadata {
                image: image_name.to_string(),
                source,
            })
    }

    /// Scan all layers, creating the layout first if `.deck` is absent.
    pub fn list_layer_options(&self) -> Result<LayerOptions, LayoutError> {
        if !self.fs.exists(&self.deck_root()) {
            info!(path = %self.project_root.display(), "no .deck directory, initializing");
            self.initialize_layout()?;
        }

        let mut options = LayerOptions::default();
        for layer in ConfigurationLayer::ALL {
            let dir = self.layer_dir(layer);
            if !self.fs.is_dir(&dir) {
                continue;
            }
            let found = self
                .fs
                .list_directories(&dir)?
                .iter()
                .map(|path| ConfigurationOption::scan(layer, path, self.fs.as_ref()))
                .collect();
            options.set(layer, found);
        }
        Ok(options)
    }

    fn list_names(&self, layer: ConfigurationLayer) -> Result<Vec<String>, LayoutError> {
        let dir = self.layer_dir(layer);
        if !self.fs.is_dir(&dir) {
            return Ok(Vec::new());
        }
        Ok(self
            .fs
            .list_directories(&dir)?
            .iter()
            .map(|p| file_name(p))
            .collect())
    }
}

/// Reject names that would escape the layer directory.
pub fn validate_option_name(name: &str) -> Result<(), LayoutError> {
    let invalid = |message: &str| LayoutError::InvalidName {
        name: name.to_string(),
        message: message.to_string(),
        suggested: None,
    };

    if name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(invalid("name must be a single directory name"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("name contains control characters"));
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
