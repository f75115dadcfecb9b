//! Layer classification for paths under a `.deck` root.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

/// Name of the per-project configuration root.
pub const DECK_DIR: &str = ".deck";

/// A stage in the configuration pipeline.
///
/// Artifacts only ever flow forward: Templates → Custom → Images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationLayer {
    /// Read-only starting points
    Templates,
    /// User-editable working configurations
    Custom,
    /// Built, runnable snapshots
    Images,
}

impl ConfigurationLayer {
    /// All layers in pipeline order.
    pub const ALL: [ConfigurationLayer; 3] = [
        ConfigurationLayer::Templates,
        ConfigurationLayer::Custom,
        ConfigurationLayer::Images,
    ];

    /// Directory name of this layer under `.deck`.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ConfigurationLayer::Templates => "templates",
            ConfigurationLayer::Custom => "custom",
            ConfigurationLayer::Images => "images",
        }
    }

    /// Parse a layer from its directory name.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "templates" => Some(ConfigurationLayer::Templates),
            "custom" => Some(ConfigurationLayer::Custom),
            "images" => Some(ConfigurationLayer::Images),
            _ => None,
        }
    }

    /// The layer artifacts are copied into from this one.
    pub fn next(&self) -> Option<Self> {
        match self {
            ConfigurationLayer::Templates => Some(ConfigurationLayer::Custom),
            ConfigurationLayer::Custom => Some(ConfigurationLayer::Images),
            ConfigurationLayer::Images => None,
        }
    }
}

impl fmt::Display for ConfigurationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationLayer::Templates => write!(f, "Templates"),
            ConfigurationLayer::Custom => write!(f, "Custom"),
            ConfigurationLayer::Images => write!(f, "Images"),
        }
    }
}

/// Where a path sits relative to the three-tier layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathContext {
    /// Layer the path belongs to, if it is under `.deck/<layer>`
    pub layer: Option<ConfigurationLayer>,

    /// Option directory directly below the layer directory
    pub option_name: Option<String>,

    /// Components below the option directory
    pub relative: Vec<String>,
}

impl PathContext {
    /// Classify a path by locating the innermost `.deck/<layer>` pair in it.
    ///
    /// The path is normalized lexically first, so `..` segments are resolved
    /// against the components before them rather than dropped.
    pub fn classify(path: &Path) -> Self {
        let parts = normalize(path);

        let anchor = parts.iter().enumerate().rev().find_map(|(i, part)| {
            if part != DECK_DIR {
                return None;
            }
            parts
                .get(i + 1)
                .and_then(|p| ConfigurationLayer::from_dir_name(p))
                .map(|layer| (i, layer))
        });

        match anchor {
            Some((i, layer)) => Self {
                layer: Some(layer),
                option_name: parts.get(i + 2).cloned(),
                relative: parts.iter().skip(i + 3).cloned().collect(),
            },
            None => Self::default(),
        }
    }

    /// True for `.deck/<layer>` itself.
    pub fn is_layer_root(&self) -> bool {
        self.layer.is_some() && self.option_name.is_none()
    }

    /// True for `.deck/<layer>/<option>` itself.
    pub fn is_option_root(&self) -> bool {
        self.option_name.is_some() && self.relative.is_empty()
    }

    /// True when the path is inside the given layer.
    pub fn is_in(&self, layer: ConfigurationLayer) -> bool {
        self.layer == Some(layer)
    }
}

/// Lexical normalization: `.` is skipped and `..` removes the preceding part.
///
/// A `..` with nothing left to remove is dropped, matching how the OS treats
/// `/..`.
fn normalize(path: &Path) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts
}
