//! Static rule tables.
//!
//! The policy is data: every (path class, operation) pair maps to one row.
//! Pairs without a row are denied.

use crate::guidance::ViolationKind;
use crate::layer::{ConfigurationLayer, PathContext};
use crate::result::{ImpactLevel, Permission};
use crate::{PolicyError, IMAGE_METADATA_FILE};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Build artifacts that are frozen once an image directory exists.
pub const PROTECTED_PATTERNS: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "Dockerfile",
    "Dockerfile.*",
    "metadata.json",
    ".dockerignore",
];

/// Runtime environment file of an image.
pub const ENV_FILE: &str = ".env";

/// File operations the engine decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Read,
    Write,
    Delete,
}

/// Directory operations the engine decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryOperation {
    Read,
    Create,
    Modify,
    Delete,
    Rename,
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOperation::Read => write!(f, "read"),
            FileOperation::Write => write!(f, "write"),
            FileOperation::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for FileOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(FileOperation::Read),
            "write" => Ok(FileOperation::Write),
            "delete" => Ok(FileOperation::Delete),
            _ => Err(format!("Unknown file operation: {}", s)),
        }
    }
}

impl fmt::Display for DirectoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryOperation::Read => write!(f, "read"),
            DirectoryOperation::Create => write!(f, "create"),
            DirectoryOperation::Modify => write!(f, "modify"),
            DirectoryOperation::Delete => write!(f, "delete"),
            DirectoryOperation::Rename => write!(f, "rename"),
        }
    }
}

impl FromStr for DirectoryOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(DirectoryOperation::Read),
            "create" => Ok(DirectoryOperation::Create),
            "modify" => Ok(DirectoryOperation::Modify),
            "delete" => Ok(DirectoryOperation::Delete),
            "rename" => Ok(DirectoryOperation::Rename),
            _ => Err(format!("Unknown directory operation: {}", s)),
        }
    }
}

/// What role a file plays, as far as the policy is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathClass {
    /// Protected build artifact inside an image directory
    ProtectedArtifact,
    /// `.env` inside an image directory
    RuntimeEnv,
    /// Metadata sidecar at the root of an image directory; written by deck only
    ImageMetadata,
    /// Any file under the Templates layer
    TemplateFile,
    Other,
}

/// What role a directory plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryClass {
    /// `.deck/images/<name>`
    ImageDirectory,
    /// `.deck/<layer>` itself
    LayerRoot,
    /// `.deck/templates/<name>` and below
    TemplateDirectory,
    Other,
}

/// One row of the file rule table.
#[derive(Debug, Serialize)]
pub struct FileRule {
    pub class: PathClass,
    pub operation: FileOperation,
    pub permission: Permission,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<ViolationKind>,
    pub reason: &'static str,
    pub alternatives: &'static [&'static str],
    pub suggestions: &'static [&'static str],
}

/// One row of the directory rule table.
#[derive(Debug, Serialize)]
pub struct DirectoryRule {
    pub class: DirectoryClass,
    pub operation: DirectoryOperation,
    pub permission: Permission,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<ViolationKind>,
    pub reason: &'static str,
    pub alternatives: &'static [&'static str],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<(ImpactLevel, &'static [&'static str])>,
}

const EDIT_IN_CUSTOM: &[&str] = &[
    "Edit the corresponding file in the Custom layer (.deck/custom/<config>/)",
    "Create a new image from the updated Custom configuration",
];

const COPY_TEMPLATE: &[&str] = &[
    "Copy the template to the Custom layer with `deck copy <template>`",
    "Edit the copy in .deck/custom/<config>/",
];

const RECORD_STATUS: &[&str] = &["Record build status with `deck image status <name> --set <status>`"];

const IMAGE_LINK: &[&str] = &["image management", "container name resolution"];
const REPRODUCIBILITY: &[&str] = &["image reproducibility"];
const LAYOUT_STRUCTURE: &[&str] = &["layout structure"];

/// File decisions, keyed by (class, operation).
pub const FILE_RULES: &[FileRule] = &[
    FileRule {
        class: PathClass::ProtectedArtifact,
        operation: FileOperation::Read,
        permission: Permission::Allowed,
        violation: None,
        reason: "Reading a protected configuration snapshot is always allowed",
        alternatives: &[],
        suggestions: &[],
    },
    FileRule {
        class: PathClass::ProtectedArtifact,
        operation: FileOperation::Write,
        permission: Permission::Denied,
        violation: Some(ViolationKind::ProtectedFileModification),
        reason: "File is part of a protected configuration snapshot",
        alternatives: EDIT_IN_CUSTOM,
        suggestions: &["Only runtime variables in the image .env may change after build"],
    },
    FileRule {
        class: PathClass::ProtectedArtifact,
        operation: FileOperation::Delete,
        permission: Permission::Denied,
        violation: Some(ViolationKind::ProtectedFileDeletion),
        reason: "File is part of a protected configuration snapshot",
        alternatives: EDIT_IN_CUSTOM,
        suggestions: &[],
    },
    FileRule {
        class: PathClass::RuntimeEnv,
        operation: FileOperation::Read,
        permission: Permission::Allowed,
        violation: None,
        reason: "Reading the runtime environment is always allowed",
        alternatives: &[],
        suggestions: &[],
    },
    FileRule {
        class: PathClass::RuntimeEnv,
        operation: FileOperation::Write,
        permission: Permission::Warning,
        violation: None,
        reason: "Only runtime variables may be changed without rebuilding",
        alternatives: &["Change build-time variables in the Custom layer .env and rebuild"],
        suggestions: &["Validate the change set with `deck check env` before writing"],
    },
    FileRule {
        class: PathClass::RuntimeEnv,
        operation: FileOperation::Delete,
        permission: Permission::Denied,
        violation: Some(ViolationKind::EnvDeletion),
        reason: "Deleting the runtime .env silently breaks the running container's configuration",
        alternatives: &[
            "Edit runtime variables in place instead",
            "Create a new image from the Custom layer to restore defaults",
        ],
        suggestions: &[],
    },
    FileRule {
        class: PathClass::ImageMetadata,
        operation: FileOperation::Read,
        permission: Permission::Allowed,
        violation: None,
        reason: "Reading image metadata is always allowed",
        alternatives: &[],
        suggestions: &[],
    },
    FileRule {
        class: PathClass::ImageMetadata,
        operation: FileOperation::Write,
        permission: Permission::Denied,
        violation: Some(ViolationKind::ProtectedFileModification),
        reason: "Image metadata links the image to its source configuration and is managed by deck",
        alternatives: RECORD_STATUS,
        suggestions: &[],
    },
    FileRule {
        class: PathClass::ImageMetadata,
        operation: FileOperation::Delete,
        permission: Permission::Denied,
        violation: Some(ViolationKind::ProtectedFileDeletion),
        reason: "Image metadata links the image to its source configuration and is managed by deck",
        alternatives: RECORD_STATUS,
        suggestions: &[],
    },
    FileRule {
        class: PathClass::TemplateFile,
        operation: FileOperation::Read,
        permission: Permission::Allowed,
        violation: None,
        reason: "Reading a template is always allowed",
        alternatives: &[],
        suggestions: &[],
    },
    FileRule {
        class: PathClass::TemplateFile,
        operation: FileOperation::Write,
        permission: Permission::Denied,
        violation: Some(ViolationKind::TemplateModification),
        reason: "Templates are read-only starting points",
        alternatives: COPY_TEMPLATE,
        suggestions: &[],
    },
    FileRule {
        class: PathClass::TemplateFile,
        operation: FileOperation::Delete,
        permission: Permission::Denied,
        violation: Some(ViolationKind::TemplateModification),
        reason: "Templates are read-only starting points",
        alternatives: COPY_TEMPLATE,
        suggestions: &[],
    },
    FileRule {
        class: PathClass::Other,
        operation: FileOperation::Read,
        permission: Permission::Allowed,
        violation: None,
        reason: "Unprotected file",
        alternatives: &[],
        suggestions: &[],
    },
    FileRule {
        class: PathClass::Other,
        operation: FileOperation::Write,
        permission: Permission::Allowed,
        violation: None,
        reason: "Unprotected file",
        alternatives: &[],
        suggestions: &["Keep this file under version control"],
    },
    FileRule {
        class: PathClass::Other,
        operation: FileOperation::Delete,
        permission: Permission::Allowed,
        violation: None,
        reason: "Unprotected file",
        alternatives: &[],
        suggestions: &["Keep this file under version control"],
    },
];

/// Directory decisions, keyed by (class, operation).
pub const DIRECTORY_RULES: &[DirectoryRule] = &[
    DirectoryRule {
        class: DirectoryClass::ImageDirectory,
        operation: DirectoryOperation::Read,
        permission: Permission::Allowed,
        violation: None,
        reason: "Reading an image directory is always allowed",
        alternatives: &[],
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::ImageDirectory,
        operation: DirectoryOperation::Create,
        permission: Permission::Allowed,
        violation: None,
        reason: "New image directory",
        alternatives: &[],
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::ImageDirectory,
        operation: DirectoryOperation::Modify,
        permission: Permission::Warning,
        violation: None,
        reason: "Image directory contents are a build snapshot; only runtime files should change",
        alternatives: &["Make structural changes in the Custom layer and rebuild"],
        impact: Some((ImpactLevel::Low, REPRODUCIBILITY)),
    },
    DirectoryRule {
        class: DirectoryClass::ImageDirectory,
        operation: DirectoryOperation::Delete,
        permission: Permission::Denied,
        violation: Some(ViolationKind::DirectoryDelete),
        reason: "The directory name is the only link between a configuration and its built image",
        alternatives: &[
            "Remove the container and image with the container engine first",
            "Create a new image instead of reusing this one",
        ],
        impact: Some((ImpactLevel::Critical, IMAGE_LINK)),
    },
    DirectoryRule {
        class: DirectoryClass::ImageDirectory,
        operation: DirectoryOperation::Rename,
        permission: Permission::Denied,
        violation: Some(ViolationKind::DirectoryRename),
        reason: "The directory name is the only link between a configuration and its built image",
        alternatives: &["Create a new image with the desired prefix"],
        impact: Some((ImpactLevel::Critical, IMAGE_LINK)),
    },
    DirectoryRule {
        class: DirectoryClass::LayerRoot,
        operation: DirectoryOperation::Read,
        permission: Permission::Allowed,
        violation: None,
        reason: "Layer directory",
        alternatives: &[],
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::LayerRoot,
        operation: DirectoryOperation::Create,
        permission: Permission::Allowed,
        violation: None,
        reason: "Layer directory",
        alternatives: &[],
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::LayerRoot,
        operation: DirectoryOperation::Modify,
        permission: Permission::Allowed,
        violation: None,
        reason: "Layer directory",
        alternatives: &[],
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::LayerRoot,
        operation: DirectoryOperation::Delete,
        permission: Permission::Denied,
        violation: Some(ViolationKind::DirectoryDelete),
        reason: "Layer directories are part of the required .deck structure",
        alternatives: &["Remove individual configurations instead"],
        impact: Some((ImpactLevel::High, LAYOUT_STRUCTURE)),
    },
    DirectoryRule {
        class: DirectoryClass::LayerRoot,
        operation: DirectoryOperation::Rename,
        permission: Permission::Denied,
        violation: Some(ViolationKind::DirectoryRename),
        reason: "Layer directories are part of the required .deck structure",
        alternatives: &["Leave layer directory names unchanged"],
        impact: Some((ImpactLevel::High, LAYOUT_STRUCTURE)),
    },
    DirectoryRule {
        class: DirectoryClass::TemplateDirectory,
        operation: DirectoryOperation::Read,
        permission: Permission::Allowed,
        violation: None,
        reason: "Reading a template is always allowed",
        alternatives: &[],
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::TemplateDirectory,
        operation: DirectoryOperation::Create,
        permission: Permission::Denied,
        violation: Some(ViolationKind::TemplateModification),
        reason: "Templates are read-only starting points",
        alternatives: COPY_TEMPLATE,
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::TemplateDirectory,
        operation: DirectoryOperation::Modify,
        permission: Permission::Denied,
        violation: Some(ViolationKind::TemplateModification),
        reason: "Templates are read-only starting points",
        alternatives: COPY_TEMPLATE,
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::TemplateDirectory,
        operation: DirectoryOperation::Delete,
        permission: Permission::Denied,
        violation: Some(ViolationKind::TemplateModification),
        reason: "Templates are read-only starting points",
        alternatives: COPY_TEMPLATE,
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::TemplateDirectory,
        operation: DirectoryOperation::Rename,
        permission: Permission::Denied,
        violation: Some(ViolationKind::TemplateModification),
        reason: "Templates are read-only starting points",
        alternatives: COPY_TEMPLATE,
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::Other,
        operation: DirectoryOperation::Read,
        permission: Permission::Allowed,
        violation: None,
        reason: "Unprotected directory",
        alternatives: &[],
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::Other,
        operation: DirectoryOperation::Create,
        permission: Permission::Allowed,
        violation: None,
        reason: "Unprotected directory",
        alternatives: &[],
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::Other,
        operation: DirectoryOperation::Modify,
        permission: Permission::Allowed,
        violation: None,
        reason: "Unprotected directory",
        alternatives: &[],
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::Other,
        operation: DirectoryOperation::Delete,
        permission: Permission::Allowed,
        violation: None,
        reason: "Unprotected directory",
        alternatives: &[],
        impact: None,
    },
    DirectoryRule {
        class: DirectoryClass::Other,
        operation: DirectoryOperation::Rename,
        permission: Permission::Allowed,
        violation: None,
        reason: "Unprotected directory",
        alternatives: &[],
        impact: None,
    },
];

/// Look up the rule for a file operation.
pub fn file_rule(class: PathClass, operation: FileOperation) -> Option<&'static FileRule> {
    FILE_RULES
        .iter()
        .find(|r| r.class == class && r.operation == operation)
}

/// Look up the rule for a directory operation.
pub fn directory_rule(
    class: DirectoryClass,
    operation: DirectoryOperation,
) -> Option<&'static DirectoryRule> {
    DIRECTORY_RULES
        .iter()
        .find(|r| r.class == class && r.operation == operation)
}

/// Matcher for protected artifact file names.
#[derive(Debug, Clone)]
pub struct ProtectedFiles {
    patterns: Vec<String>,
    glob_set: GlobSet,
}

impl ProtectedFiles {
    /// The built-in protected set.
    pub fn new() -> Result<Self, PolicyError> {
        Self::with_patterns(&[])
    }

    /// The built-in set plus extra glob patterns.
    pub fn with_patterns(extra: &[&str]) -> Result<Self, PolicyError> {
        let mut builder = GlobSetBuilder::new();
        let mut patterns = Vec::new();

        for pattern in PROTECTED_PATTERNS.iter().chain(extra.iter()) {
            if pattern.is_empty() {
                continue;
            }
            builder.add(Glob::new(pattern)?);
            patterns.push(pattern.to_string());
        }

        Ok(Self {
            patterns,
            glob_set: builder.build()?,
        })
    }

    /// Check a bare file name (no directories).
    pub fn is_protected(&self, file_name: &str) -> bool {
        self.glob_set.is_match(file_name)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// Classify a file path for the file rule table.
pub fn classify_file(ctx: &PathContext, file_name: &str, protected: &ProtectedFiles) -> PathClass {
    match ctx.layer {
        Some(ConfigurationLayer::Images) if !ctx.relative.is_empty() => {
            if file_name == ENV_FILE {
                PathClass::RuntimeEnv
            } else if file_name == IMAGE_METADATA_FILE && ctx.relative.len() == 1 {
                PathClass::ImageMetadata
            } else if protected.is_protected(file_name) {
                PathClass::ProtectedArtifact
            } else {
                PathClass::Other
            }
        }
        Some(ConfigurationLayer::Templates) if ctx.option_name.is_some() => PathClass::TemplateFile,
        _ => PathClass::Other,
    }
}

/// Classify a directory path for the directory rule table.
pub fn classify_directory(ctx: &PathContext) -> DirectoryClass {
    match ctx.layer {
        Some(_) if ctx.is_layer_root() => DirectoryClass::LayerRoot,
        Some(ConfigurationLayer::Images) if ctx.is_option_root() => DirectoryClass::ImageDirectory,
        Some(ConfigurationLayer::Templates) => DirectoryClass::TemplateDirectory,
        _ => DirectoryClass::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_protected_patterns() {
        let protected = ProtectedFiles::new().unwrap();

        for name in [
            "compose.yaml",
            "compose.yml",
            "docker-compose.yaml",
            "Dockerfile",
            "Dockerfile.dev",
            "metadata.json",
            ".dockerignore",
        ] {
            assert!(protected.is_protected(name), "{} should be protected", name);
        }

        assert!(!protected.is_protected(".env"));
        assert!(!protected.is_protected("README.md"));
        assert!(!protected.is_protected("dockerfile.txt"));
    }

    #[test]
    fn test_extra_patterns() {
        let protected = ProtectedFiles::with_patterns(&["*.lock"]).unwrap();
        assert!(protected.is_protected("deps.lock"));
        assert!(protected.is_protected("Dockerfile"));
        assert_eq!(protected.patterns().len(), PROTECTED_PATTERNS.len() + 1);
    }

    #[test]
    fn test_every_pair_has_a_rule() {
        for class in [
            PathClass::ProtectedArtifact,
            PathClass::RuntimeEnv,
            PathClass::TemplateFile,
            PathClass::Other,
        ] {
            for op in [FileOperation::Read, FileOperation::Write, FileOperation::Delete] {
                assert!(file_rule(class, op).is_some(), "{:?}/{:?}", class, op);
            }
        }

        for class in [
            DirectoryClass::ImageDirectory,
            DirectoryClass::LayerRoot,
            DirectoryClass::TemplateDirectory,
            DirectoryClass::Other,
        ] {
            for op in [
                DirectoryOperation::Read,
                DirectoryOperation::Create,
                DirectoryOperation::Modify,
                DirectoryOperation::Delete,
                DirectoryOperation::Rename,
            ] {
                assert!(directory_rule(class, op).is_some(), "{:?}/{:?}", class, op);
            }
        }
    }

    #[test]
    fn test_denials_carry_violation_and_alternatives() {
        for rule in FILE_RULES {
            if rule.permission == Permission::Denied {
                assert!(rule.violation.is_some());
                assert!(!rule.alternatives.is_empty());
            }
        }
        for rule in DIRECTORY_RULES {
            if rule.permission == Permission::Denied {
                assert!(rule.violation.is_some());
                assert!(!rule.alternatives.is_empty());
            }
        }
    }

    #[test]
    fn test_classify_file() {
        let protected = ProtectedFiles::new().unwrap();
        let classify = |p: &str| {
            let path = Path::new(p);
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            classify_file(&PathContext::classify(path), &name, &protected)
        };

        assert_eq!(
            classify(".deck/images/app-20240101-1200/Dockerfile"),
            PathClass::ProtectedArtifact
        );
        assert_eq!(classify(".deck/images/app-20240101-1200/.env"), PathClass::RuntimeEnv);
        assert_eq!(classify(".deck/custom/app/Dockerfile"), PathClass::Other);
        assert_eq!(classify(".deck/templates/ubuntu/compose.yaml"), PathClass::TemplateFile);
        assert_eq!(classify("src/Dockerfile"), PathClass::Other);
    }

    #[test]
    fn test_classify_directory() {
        let classify = |p: &str| classify_directory(&PathContext::classify(Path::new(p)));

        assert_eq!(classify(".deck/images"), DirectoryClass::LayerRoot);
        assert_eq!(
            classify(".deck/images/app-20240101-1200"),
            DirectoryClass::ImageDirectory
        );
        assert_eq!(classify(".deck/images/app-20240101-1200/data"), DirectoryClass::Other);
        assert_eq!(classify(".deck/templates/ubuntu"), DirectoryClass::TemplateDirectory);
        assert_eq!(classify(".deck/custom/ubuntu-custom"), DirectoryClass::Other);
    }

    #[test]
    fn test_parse_operations() {
        assert_eq!("Write".parse::<FileOperation>(), Ok(FileOperation::Write));
        assert_eq!("rename".parse::<DirectoryOperation>(), Ok(DirectoryOperation::Rename));
        assert!("chmod".parse::<FileOperation>().is_err());
    }
}
