//! Permission policy decision matrix
//!
//! Walks the rule table through the public engine: protected artifacts,
//! runtime env files, other files, directories and env change sets.

use deck_policy::{
    guidance_for, validate_image_directory_name, DirectoryOperation, FileOperation, ImpactLevel,
    Permission, PermissionEngine, RuntimeWhitelist, VariableType, ViolationKind,
    DEFAULT_RUNTIME_VARIABLES, PORT_VARIABLES, PROTECTED_PATTERNS,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const IMAGE: &str = "/work/app/.deck/images/app-20240315-1430";

fn engine() -> PermissionEngine {
    PermissionEngine::with_defaults().unwrap()
}

fn in_image(name: &str) -> PathBuf {
    Path::new(IMAGE).join(name)
}

fn changes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// Files
// =============================================================================

#[test]
fn test_protected_artifacts_frozen() {
    let engine = engine();
    let names = [
        "compose.yaml",
        "compose.yml",
        "docker-compose.yaml",
        "Dockerfile",
        "Dockerfile.dev",
        "metadata.json",
        ".dockerignore",
    ];
    assert_eq!(names.len(), PROTECTED_PATTERNS.len());

    for name in names {
        for op in [FileOperation::Write, FileOperation::Delete] {
            let result = engine.check_file(&in_image(name), op);
            assert_eq!(result.permission, Permission::Denied, "{} {}", name, op);
            assert!(result.violation.is_some());
            assert!(
                result.alternatives.iter().any(|a| a.contains("Custom layer")),
                "{} {}: {:?}",
                name,
                op,
                result.alternatives
            );
        }
        assert!(engine.check_file(&in_image(name), FileOperation::Read).is_allowed());
    }
}

#[test]
fn test_other_files_always_allowed() {
    let engine = engine();
    for name in ["README.md", "src/main.rs", "config/app.json", "Dockerfile-notes.txt"] {
        for op in [FileOperation::Read, FileOperation::Write, FileOperation::Delete] {
            let result = engine.check_file(&in_image(name), op);
            assert!(result.is_allowed(), "{} {} -> {:?}", name, op, result.permission);
        }
    }
}

#[test]
fn test_runtime_env_file() {
    let engine = engine();
    let path = in_image(".env");

    let write = engine.check_file(&path, FileOperation::Write);
    assert_eq!(write.permission, Permission::Warning);
    assert!(write.reason.contains("DEV_PORT"));

    let delete = engine.check_file(&path, FileOperation::Delete);
    assert_eq!(delete.permission, Permission::Denied);
    assert_eq!(delete.violation, Some(ViolationKind::EnvDeletion));
}

#[test]
fn test_custom_layer_is_editable() {
    let path = Path::new("/work/app/.deck/custom/app-custom/compose.yaml");
    for op in [FileOperation::Write, FileOperation::Delete] {
        assert!(engine().check_file(path, op).is_allowed());
    }
}

#[test]
fn test_templates_layer_is_read_only() {
    let path = Path::new("/work/app/.deck/templates/ubuntu/compose.yaml");
    let engine = engine();
    assert!(engine.check_file(path, FileOperation::Read).is_allowed());
    let write = engine.check_file(path, FileOperation::Write);
    assert_eq!(write.permission, Permission::Denied);
    assert!(!write.alternatives.is_empty());
}

#[test]
fn test_parent_segments_resolve_to_real_layer() {
    let engine = engine();
    let climbing = Path::new("/work/app/.deck/custom/x/../../images/app-20240315-1430/compose.yaml");
    for op in [FileOperation::Write, FileOperation::Delete] {
        let result = engine.check_file(climbing, op);
        assert_eq!(result.permission, Permission::Denied, "{}", op);
        assert_eq!(result.layer, Some(deck_policy::ConfigurationLayer::Images));
    }

    let dir = Path::new("/work/app/.deck/custom/../images/./app-20240315-1430");
    let result = engine.check_directory(dir, DirectoryOperation::Delete);
    assert_eq!(result.permission, Permission::Denied);
}

#[test]
fn test_image_metadata_is_tool_managed() {
    let engine = engine();
    let path = in_image(deck_policy::IMAGE_METADATA_FILE);
    assert!(engine.check_file(&path, FileOperation::Read).is_allowed());

    let write = engine.check_file(&path, FileOperation::Write);
    assert_eq!(write.permission, Permission::Denied);
    assert_eq!(write.violation, Some(ViolationKind::ProtectedFileModification));

    let delete = engine.check_file(&path, FileOperation::Delete);
    assert_eq!(delete.violation, Some(ViolationKind::ProtectedFileDeletion));

    // Same name deeper in the image is ordinary content
    let nested = in_image("docs/image.meta");
    assert!(engine.check_file(&nested, FileOperation::Write).is_allowed());
}

// =============================================================================
// Directories
// =============================================================================

#[test]
fn test_image_directory_delete_and_rename() {
    let engine = engine();
    for op in [DirectoryOperation::Delete, DirectoryOperation::Rename] {
        let result = engine.check_directory(Path::new(IMAGE), op);
        assert_eq!(result.permission, Permission::Denied);

        let impact = result.impact.expect("impact on denial");
        assert_eq!(impact.level, ImpactLevel::Critical);
        assert_eq!(
            impact.affected_components,
            vec!["image management", "container name resolution"]
        );
    }
}

#[test]
fn test_image_directory_read_create_modify() {
    let engine = engine();
    assert!(engine
        .check_directory(Path::new(IMAGE), DirectoryOperation::Read)
        .is_allowed());
    assert!(engine
        .check_directory(Path::new(IMAGE), DirectoryOperation::Create)
        .is_allowed());
    assert_eq!(
        engine
            .check_directory(Path::new(IMAGE), DirectoryOperation::Modify)
            .permission,
        Permission::Warning
    );
}

#[test]
fn test_nonconforming_image_create_warns_with_name() {
    let result = engine().check_directory(
        Path::new("/work/app/.deck/images/latest"),
        DirectoryOperation::Create,
    );
    assert_eq!(result.permission, Permission::Warning);
    assert_eq!(result.violation, Some(ViolationKind::InvalidImageName));
    assert!(result.suggestions[0].starts_with("Use 'latest-"));
}

// =============================================================================
// Env change sets
// =============================================================================

#[test]
fn test_whitelisted_changes_valid() {
    let set: Vec<(&str, &str)> = DEFAULT_RUNTIME_VARIABLES.iter().map(|k| (*k, "1")).collect();
    let result = engine().validate_env_file_changes(&in_image(".env"), &changes(&set));

    assert!(result.is_valid());
    assert!(result.denied_changes.is_empty());
    assert_eq!(result.allowed_changes.len(), DEFAULT_RUNTIME_VARIABLES.len());
}

#[test]
fn test_build_time_change_denied() {
    let result = engine().validate_env_file_changes(
        &in_image(".env"),
        &changes(&[("DEV_PORT", "5050"), ("DOTNET_VERSION", "8.0")]),
    );

    assert!(!result.is_valid());
    assert_eq!(result.denied_changes.get("DOTNET_VERSION").map(String::as_str), Some("8.0"));
    let detail = &result.details["DOTNET_VERSION"];
    assert_eq!(detail.variable_type, VariableType::BuildTime);
    assert!(detail.suggestion.as_deref().unwrap_or("").contains("Custom layer"));
    assert!(result.allowed_changes.contains_key("DEV_PORT"));
}

#[test]
fn test_line_breaks_in_values_denied() {
    let result = engine().validate_env_file_changes(
        &in_image(".env"),
        &changes(&[("DEV_PORT", "5000\nBASE_IMAGE=evil"), ("DEBUG_PORT", "5001")]),
    );

    assert!(!result.is_valid());
    assert!(result.denied_changes.contains_key("DEV_PORT"));
    assert_eq!(result.details["DEV_PORT"].variable_type, VariableType::Runtime);
    assert_eq!(result.details["DEV_PORT"].permission, Permission::Denied);
    assert!(result.allowed_changes.contains_key("DEBUG_PORT"));
}

#[test]
fn test_allocated_port_variables_are_runtime() {
    let set: Vec<(&str, &str)> = PORT_VARIABLES.iter().map(|k| (*k, "15000")).collect();
    let result = engine().validate_env_file_changes(&in_image(".env"), &changes(&set));
    assert!(result.is_valid());
}

#[test]
fn test_extended_whitelist() {
    let engine = PermissionEngine::new(RuntimeWhitelist::with_variables(["LOG_LEVEL"])).unwrap();
    let result =
        engine.validate_env_file_changes(&in_image(".env"), &changes(&[("LOG_LEVEL", "debug")]));
    assert!(result.is_valid());
}

// =============================================================================
// Names and guidance
// =============================================================================

#[test]
fn test_image_name_examples() {
    let ok = validate_image_directory_name("myapp-20240315-1430");
    assert!(ok.is_valid);
    assert_eq!(ok.prefix.as_deref(), Some("myapp"));
    assert_eq!(ok.timestamp.as_deref(), Some("20240315-1430"));

    let bad = validate_image_directory_name("myapp-invalid-format");
    assert!(!bad.is_valid);
    assert!(bad.suggested_name.unwrap().starts_with("myapp-"));
    assert!(!bad.format_description.is_empty());
}

#[test]
fn test_every_violation_has_guidance() {
    for kind in ViolationKind::ALL {
        let guidance = guidance_for(kind);
        assert_eq!(guidance.violation, kind);
        assert!(!guidance.fix_steps.is_empty(), "{}", kind);
        assert!(guidance.to_human().contains(kind.code()));
        assert_eq!(kind.code().parse::<ViolationKind>(), Ok(kind));
    }
}
