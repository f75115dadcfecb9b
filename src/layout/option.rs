//! Configuration options found while scanning a layer

use chrono::{DateTime, Utc};
use deck_policy::ConfigurationLayer;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::fs::FileSystem;
use crate::project::ProjectType;

/// Files whose presence makes an option startable.
const RUNNABLE_MARKERS: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
    "Dockerfile",
];

/// A named configuration inside a layer.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationOption {
    pub name: String,
    pub layer: ConfigurationLayer,
    pub path: PathBuf,
    pub project_type: ProjectType,

    /// Has a compose file or Dockerfile
    pub is_available: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl ConfigurationOption {
    pub fn scan(layer: ConfigurationLayer, path: &Path, fs: &dyn FileSystem) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let is_available = RUNNABLE_MARKERS.iter().any(|m| fs.exists(&path.join(m)));

        Self {
            name,
            layer,
            path: path.to_path_buf(),
            project_type: ProjectType::detect(path, fs),
            is_available,
            last_modified: fs.modified(path),
        }
    }
}

/// Options of all three layers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LayerOptions {
    pub templates: Vec<ConfigurationOption>,
    pub custom: Vec<ConfigurationOption>,
    pub images: Vec<ConfigurationOption>,
}

impl LayerOptions {
    pub fn get(&self, layer: ConfigurationLayer) -> &[ConfigurationOption] {
        match layer {
            ConfigurationLayer::Templates => &self.templates,
            ConfigurationLayer::Custom => &self.custom,
            ConfigurationLayer::Images => &self.images,
        }
    }

    pub(crate) fn set(&mut self, layer: ConfigurationLayer, options: Vec<ConfigurationOption>) {
        match layer {
            ConfigurationLayer::Templates => self.templates = options,
            ConfigurationLayer::Custom => self.custom = options,
            ConfigurationLayer::Images => self.images = options,
        }
    }

    pub fn names(&self, layer: ConfigurationLayer) -> Vec<String> {
        self.get(layer).iter().map(|o| o.name.clone()).collect()
    }
}
