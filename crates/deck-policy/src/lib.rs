//! Deny-by-default permission policy for deck configuration layers.
//!
//! The engine decides, per file, directory or env variable, whether an
//! operation is allowed, allowed with a warning, or denied, based on which
//! layer of `.deck/{templates,custom,images}` the path lives in. It never
//! touches the filesystem; callers pass paths and observed state in.

mod env;
mod guidance;
mod layer;
mod naming;
mod result;
mod rules;

pub use env::{
    parse_env, render_env, RuntimeWhitelist, DEFAULT_RUNTIME_VARIABLES, PORT_VARIABLES,
};
pub use guidance::{guidance_for, PermissionGuidance, ViolationKind};
pub use layer::{ConfigurationLayer, PathContext, DECK_DIR};
pub use naming::{
    generate_image_name, validate_image_directory_name, validate_image_directory_name_at,
    ImageNameValidation, IMAGE_NAME_FORMAT,
};
pub use result::{
    DirectoryPermissionResult, EnvPermissionResult, EnvValidationDetail, FilePermissionResult,
    Impact, ImpactLevel, Permission, VariableType,
};
pub use rules::{
    DirectoryClass, DirectoryOperation, DirectoryRule, FileOperation, FileRule, PathClass,
    ProtectedFiles, DIRECTORY_RULES, ENV_FILE, FILE_RULES, PROTECTED_PATTERNS,
};

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Name of the metadata sidecar inside every image directory.
pub const IMAGE_METADATA_FILE: &str = "image.meta";

/// Errors building the policy engine.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Invalid protected file pattern: {0}")]
    Glob(#[from] globset::Error),
}

/// One file observed in an image directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub writable: bool,
}

/// Something wrong with an image directory that does not break the layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectoryAnomaly {
    InvalidName {
        suggested_name: Option<String>,
    },
    WritableProtectedFile {
        file: String,
    },
    MissingMetadata,
}

/// Directory-level summary of one image directory.
#[derive(Debug, Clone, Serialize)]
pub struct ImageDirectorySummary {
    pub name: String,
    pub anomalies: Vec<DirectoryAnomaly>,
}

impl ImageDirectorySummary {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }

    /// One line per anomaly, for validation warnings.
    pub fn messages(&self) -> Vec<String> {
        self.anomalies
            .iter()
            .map(|a| match a {
                DirectoryAnomaly::InvalidName { suggested_name } => match suggested_name {
                    Some(s) => format!(
                        "Image directory '{}' does not match prefix-YYYYMMDD-HHMM (suggested: {})",
                        self.name, s
                    ),
                    None => format!(
                        "Image directory '{}' does not match prefix-YYYYMMDD-HHMM",
                        self.name
                    ),
                },
                DirectoryAnomaly::WritableProtectedFile { file } => format!(
                    "Protected file '{}' in image '{}' is writable",
                    file, self.name
                ),
                DirectoryAnomaly::MissingMetadata => format!(
                    "Image '{}' has no {} metadata file",
                    self.name, IMAGE_METADATA_FILE
                ),
            })
            .collect()
    }
}

/// Serializable view of the active policy.
#[derive(Debug, Serialize)]
pub struct PolicySnapshot {
    pub protected_patterns: Vec<String>,
    pub runtime_variables: Vec<String>,
    pub file_rules: &'static [FileRule],
    pub directory_rules: &'static [DirectoryRule],
}

/// The permission policy engine.
#[derive(Debug, Clone)]
pub struct PermissionEngine {
    protected: ProtectedFiles,
    whitelist: RuntimeWhitelist,
}

impl PermissionEngine {
    pub fn new(whitelist: RuntimeWhitelist) -> Result<Self, PolicyError> {
        Ok(Self {
            protected: ProtectedFiles::new()?,
            whitelist,
        })
    }

    /// Engine with the built-in protected set and whitelist.
    pub fn with_defaults() -> Result<Self, PolicyError> {
        Self::new(RuntimeWhitelist::default())
    }

    pub fn whitelist(&self) -> &RuntimeWhitelist {
        &self.whitelist
    }

    /// Check a bare file name against the protected set.
    pub fn is_protected_file(&self, file_name: &str) -> bool {
        self.protected.is_protected(file_name)
    }

    /// Decide a file operation.
    pub fn check_file(&self, path: &Path, operation: FileOperation) -> FilePermissionResult {
        let ctx = PathContext::classify(path);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let class = rules::classify_file(&ctx, &file_name, &self.protected);

        let mut result = match rules::file_rule(class, operation) {
            Some(rule) => FilePermissionResult {
                path: path.display().to_string(),
                operation,
                layer: ctx.layer,
                permission: rule.permission,
                reason: rule.reason.to_string(),
                alternatives: to_strings(rule.alternatives),
                suggestions: to_strings(rule.suggestions),
                violation: rule.violation,
            },
            None => FilePermissionResult {
                path: path.display().to_string(),
                operation,
                layer: ctx.layer,
                permission: Permission::Denied,
                reason: format!("No rule allows {} on {:?} paths", operation, class),
                alternatives: vec!["Perform the change in the Custom layer".to_string()],
                suggestions: Vec::new(),
                violation: None,
            },
        };

        if class == PathClass::RuntimeEnv && operation == FileOperation::Write {
            result.reason = format!(
                "{}: {}",
                result.reason,
                self.whitelist.variables().join(", ")
            );
        }

        if result.permission == Permission::Denied {
            debug!(
                path = %result.path,
                operation = %operation,
                violation = ?result.violation,
                "file operation denied"
            );
        }

        result
    }

    /// Decide a directory operation.
    pub fn check_directory(
        &self,
        path: &Path,
        operation: DirectoryOperation,
    ) -> DirectoryPermissionResult {
        let ctx = PathContext::classify(path);
        let class = rules::classify_directory(&ctx);

        let mut result = match rules::directory_rule(class, operation) {
            Some(rule) => DirectoryPermissionResult {
                path: path.display().to_string(),
                operation,
                layer: ctx.layer,
                permission: rule.permission,
                reason: rule.reason.to_string(),
                alternatives: to_strings(rule.alternatives),
                suggestions: Vec::new(),
                impact: rule.impact.map(|(level, components)| Impact {
                    level,
                    affected_components: to_strings(components),
                }),
                violation: rule.violation,
            },
            None => DirectoryPermissionResult {
                path: path.display().to_string(),
                operation,
                layer: ctx.layer,
                permission: Permission::Denied,
                reason: format!("No rule allows {} on {:?} directories", operation, class),
                alternatives: vec!["Perform the change in the Custom layer".to_string()],
                suggestions: Vec::new(),
                impact: None,
                violation: None,
            },
        };

        // New image directories must carry a conforming name
        if class == DirectoryClass::ImageDirectory && operation == DirectoryOperation::Create {
            if let Some(name) = ctx.option_name.as_deref() {
                let naming = naming::validate_image_directory_name(name);
                if !naming.is_valid {
                    result.permission = Permission::Warning;
                    result.reason = format!("Image directory name '{}' is not conforming", name);
                    result.violation = Some(ViolationKind::InvalidImageName);
                    result.suggestions.extend(naming.suggested_name.map(|s| {
                        format!("Use '{}' ({})", s, naming.format_description)
                    }));
                }
            }
        }

        if result.permission == Permission::Denied {
            debug!(
                path = %result.path,
                operation = %operation,
                violation = ?result.violation,
                "directory operation denied"
            );
        }

        result
    }

    /// Classify each requested env change against the whitelist.
    ///
    /// Only an image's `.env` is restricted; in other layers every key is
    /// allowed and merely classified.
    pub fn validate_env_file_changes(
        &self,
        path: &Path,
        changes: &BTreeMap<String, String>,
    ) -> EnvPermissionResult {
        let ctx = PathContext::classify(path);
        let restricted = ctx.is_in(ConfigurationLayer::Images) && !ctx.relative.is_empty();

        let mut result = EnvPermissionResult {
            path: path.display().to_string(),
            ..Default::default()
        };

        for (key, value) in changes {
            let variable_type = self.whitelist.classify(key);

            // A line break would smuggle extra assignments into the file
            if let Some(problem) = env::malformed_entry(key, value) {
                result.denied_changes.insert(key.clone(), value.clone());
                result.details.insert(
                    key.clone(),
                    EnvValidationDetail {
                        variable_type,
                        permission: Permission::Denied,
                        suggestion: Some(format!("{}: {}", key, problem)),
                    },
                );
                continue;
            }

            let detail = match (variable_type, restricted) {
                (VariableType::BuildTime, true) => {
                    result.denied_changes.insert(key.clone(), value.clone());
                    EnvValidationDetail {
                        variable_type,
                        permission: Permission::Denied,
                        suggestion: Some(format!(
                            "Set {} in the Custom layer .env and create a new image; \
                             build-time variables only take effect on a fresh build",
                            key
                        )),
                    }
                }
                (VariableType::BuildTime, false) => {
                    result.allowed_changes.insert(key.clone(), value.clone());
                    EnvValidationDetail {
                        variable_type,
                        permission: Permission::Allowed,
                        suggestion: Some("Takes effect on the next image build".to_string()),
                    }
                }
                (VariableType::Runtime, _) => {
                    result.allowed_changes.insert(key.clone(), value.clone());
                    EnvValidationDetail {
                        variable_type,
                        permission: Permission::Allowed,
                        suggestion: None,
                    }
                }
            };

            result.details.insert(key.clone(), detail);
        }

        if !result.is_valid() {
            debug!(
                path = %result.path,
                denied = ?result.denied_changes.keys().collect::<Vec<_>>(),
                "env changes denied"
            );
        }

        result
    }

    pub fn validate_image_directory_name(&self, name: &str) -> ImageNameValidation {
        naming::validate_image_directory_name(name)
    }

    pub fn permission_guidance(&self, violation: ViolationKind) -> PermissionGuidance {
        guidance_for(violation)
    }

    /// Report recoverable anomalies of one image directory.
    pub fn summarize_image_directory(
        &self,
        name: &str,
        entries: &[FileEntry],
        has_metadata: bool,
    ) -> ImageDirectorySummary {
        let mut anomalies = Vec::new();

        let naming = naming::validate_image_directory_name(name);
        if !naming.is_valid {
            anomalies.push(DirectoryAnomaly::InvalidName {
                suggested_name: naming.suggested_name,
            });
        }

        for entry in entries {
            if entry.writable && self.protected.is_protected(&entry.name) {
                anomalies.push(DirectoryAnomaly::WritableProtectedFile {
                    file: entry.name.clone(),
                });
            }
        }

        if !has_metadata {
            anomalies.push(DirectoryAnomaly::MissingMetadata);
        }

        ImageDirectorySummary {
            name: name.to_string(),
            anomalies,
        }
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            protected_patterns: self.protected.patterns().to_vec(),
            runtime_variables: self.whitelist.variables(),
            file_rules: FILE_RULES,
            directory_rules: DIRECTORY_RULES,
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PermissionEngine {
        PermissionEngine::with_defaults().unwrap()
    }

    const IMAGE: &str = "/p/.deck/images/app-20240315-1430";

    #[test]
    fn test_protected_write_denied_with_custom_alternative() {
        let result = engine().check_file(
            &Path::new(IMAGE).join("compose.yaml"),
            FileOperation::Write,
        );
        assert_eq!(result.permission, Permission::Denied);
        assert!(!result.is_allowed());
        assert_eq!(result.violation, Some(ViolationKind::ProtectedFileModification));
        assert!(result.alternatives.iter().any(|a| a.contains("Custom layer")));
    }

    #[test]
    fn test_env_write_warning_names_whitelist() {
        let result = engine().check_file(&Path::new(IMAGE).join(".env"), FileOperation::Write);
        assert_eq!(result.permission, Permission::Warning);
        assert!(result.is_allowed());
        assert!(result.reason.contains("DEV_PORT"));
    }

    #[test]
    fn test_env_delete_denied() {
        let result = engine().check_file(&Path::new(IMAGE).join(".env"), FileOperation::Delete);
        assert_eq!(result.permission, Permission::Denied);
        assert_eq!(result.violation, Some(ViolationKind::EnvDeletion));
    }

    #[test]
    fn test_custom_layer_files_allowed() {
        let result = engine().check_file(
            Path::new("/p/.deck/custom/app/Dockerfile"),
            FileOperation::Write,
        );
        assert_eq!(result.permission, Permission::Allowed);
        assert!(result.suggestions.iter().any(|s| s.contains("version control")));
    }

    #[test]
    fn test_template_write_denied() {
        let result = engine().check_file(
            Path::new("/p/.deck/templates/ubuntu/compose.yaml"),
            FileOperation::Write,
        );
        assert_eq!(result.permission, Permission::Denied);
        assert_eq!(result.violation, Some(ViolationKind::TemplateModification));
    }

    #[test]
    fn test_image_directory_rename_denied_critical() {
        let result = engine().check_directory(Path::new(IMAGE), DirectoryOperation::Rename);
        assert_eq!(result.permission, Permission::Denied);
        let impact = result.impact.unwrap();
        assert_eq!(impact.level, ImpactLevel::Critical);
        assert_eq!(
            impact.affected_components,
            vec!["image management".to_string(), "container name resolution".to_string()]
        );
    }

    #[test]
    fn test_image_directory_create_with_bad_name_warns() {
        let result = engine().check_directory(
            Path::new("/p/.deck/images/app-latest"),
            DirectoryOperation::Create,
        );
        assert_eq!(result.permission, Permission::Warning);
        assert_eq!(result.violation, Some(ViolationKind::InvalidImageName));
        assert!(result.suggestions[0].starts_with("Use 'app-"));

        let ok = engine().check_directory(Path::new(IMAGE), DirectoryOperation::Create);
        assert_eq!(ok.permission, Permission::Allowed);
    }

    #[test]
    fn test_env_changes_in_image() {
        let mut changes = BTreeMap::new();
        changes.insert("DEV_PORT".to_string(), "5100".to_string());
        changes.insert("BASE_IMAGE".to_string(), "alpine".to_string());

        let result =
            engine().validate_env_file_changes(&Path::new(IMAGE).join(".env"), &changes);
        assert!(!result.is_valid());
        assert!(result.allowed_changes.contains_key("DEV_PORT"));
        assert!(result.denied_changes.contains_key("BASE_IMAGE"));
        assert_eq!(result.details["BASE_IMAGE"].variable_type, VariableType::BuildTime);
        assert!(result.details["BASE_IMAGE"]
            .suggestion
            .as_deref()
            .unwrap()
            .contains("Custom layer"));
    }

    #[test]
    fn test_env_changes_outside_images_allowed() {
        let mut changes = BTreeMap::new();
        changes.insert("BASE_IMAGE".to_string(), "alpine".to_string());

        let result = engine()
            .validate_env_file_changes(Path::new("/p/.deck/custom/app/.env"), &changes);
        assert!(result.is_valid());
        assert_eq!(result.details["BASE_IMAGE"].variable_type, VariableType::BuildTime);
    }

    #[test]
    fn test_multiline_value_denied_in_every_layer() {
        let mut changes = BTreeMap::new();
        changes.insert("DEV_PORT".to_string(), "5000\nBASE_IMAGE=evil".to_string());
        changes.insert("PROJECT_NAME".to_string(), "app\r".to_string());
        changes.insert("BAD=KEY".to_string(), "1".to_string());

        for path in [
            Path::new(IMAGE).join(".env"),
            Path::new("/p/.deck/custom/app/.env").to_path_buf(),
        ] {
            let result = engine().validate_env_file_changes(&path, &changes);
            assert!(result.allowed_changes.is_empty());
            assert_eq!(result.denied_changes.len(), 3);
            assert_eq!(result.details["DEV_PORT"].permission, Permission::Denied);
        }
    }

    #[test]
    fn test_extended_whitelist() {
        let engine =
            PermissionEngine::new(RuntimeWhitelist::with_variables(["ASPNETCORE_URLS"])).unwrap();
        let mut changes = BTreeMap::new();
        changes.insert("ASPNETCORE_URLS".to_string(), "http://+:5000".to_string());

        let result = engine.validate_env_file_changes(&Path::new(IMAGE).join(".env"), &changes);
        assert!(result.is_valid());
    }

    #[test]
    fn test_summarize_image_directory() {
        let entries = vec![
            FileEntry {
                name: "compose.yaml".to_string(),
                writable: true,
            },
            FileEntry {
                name: ".env".to_string(),
                writable: true,
            },
            FileEntry {
                name: "Dockerfile".to_string(),
                writable: false,
            },
        ];

        let summary = engine().summarize_image_directory("not-valid", &entries, false);
        assert_eq!(summary.anomalies.len(), 3);
        assert!(summary.anomalies.contains(&DirectoryAnomaly::MissingMetadata));
        assert!(summary
            .anomalies
            .contains(&DirectoryAnomaly::WritableProtectedFile {
                file: "compose.yaml".to_string()
            }));
        assert_eq!(summary.messages().len(), 3);

        let clean = engine().summarize_image_directory("app-20240315-1430", &entries[1..], true);
        assert!(clean.is_clean());
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_string(&engine().snapshot()).unwrap();
        assert!(json.contains("Dockerfile.*"));
        assert!(json.contains("VOLUME_PREFIX"));
        assert!(json.contains("protected_artifact"));
    }
}
