//! Directory Layer Model scenarios
//!
//! Runs the layout against real temporary project roots.

use chrono::{TimeZone, Utc};
use deck_env::layout::{BuildStatus, DeckLayout, ImageMetadata, LayoutError, StdFileSystem};
use deck_env::{CancellationToken, ConfigurationLayer, PermissionEngine, ProjectType};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn layout(root: &Path) -> DeckLayout {
    DeckLayout::new(
        root,
        Arc::new(StdFileSystem),
        PermissionEngine::with_defaults().unwrap(),
    )
}

fn seed_template(root: &Path, name: &str) {
    let dir = root.join(".deck/templates").join(name);
    fs::create_dir_all(dir.join("scripts")).unwrap();
    fs::write(dir.join("compose.yaml"), "services: {}\n").unwrap();
    fs::write(dir.join("scripts/setup.sh"), "#!/bin/sh\n").unwrap();
}

// =============================================================================
// ValidateLayout
// =============================================================================

#[test]
fn test_missing_templates_only() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join(".deck/custom")).unwrap();
    fs::create_dir_all(temp.path().join(".deck/images")).unwrap();

    let result = layout(temp.path()).validate_layout().unwrap();

    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("templates"));
    assert!(
        !result.warnings.iter().any(|w| w.contains("empty")),
        "missing templates must not also be reported as empty: {:?}",
        result.warnings
    );
}

#[test]
fn test_every_missing_layer_reported() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join(".deck")).unwrap();

    let result = layout(temp.path()).validate_layout().unwrap();
    assert_eq!(result.errors.len(), 3);
    assert_eq!(result.repair_suggestions.len(), 1);
}

#[test]
fn test_image_anomalies_are_warnings() {
    let temp = TempDir::new().unwrap();
    let layout = layout(temp.path());
    layout.initialize_layout().unwrap();
    seed_template(temp.path(), "ubuntu");

    let image = layout.option_dir(ConfigurationLayer::Images, "broken-name");
    fs::create_dir_all(&image).unwrap();
    fs::write(image.join("Dockerfile"), "FROM scratch\n").unwrap();

    let result = layout.validate_layout().unwrap();
    assert!(result.is_valid);
    assert!(result.errors.is_empty());
    assert!(result.warnings.iter().any(|w| w.contains("broken-name")));
    assert!(result.warnings.iter().any(|w| w.contains("Dockerfile")));
    assert!(result.warnings.iter().any(|w| w.contains("metadata")));
}

// =============================================================================
// CopyTemplateToCustom
// =============================================================================

#[test]
fn test_generated_custom_names() {
    let temp = TempDir::new().unwrap();
    let layout = layout(temp.path());
    layout.initialize_layout().unwrap();
    seed_template(temp.path(), "ubuntu");
    fs::create_dir_all(layout.option_dir(ConfigurationLayer::Custom, "ubuntu-custom")).unwrap();

    let cancel = CancellationToken::new();
    let name = layout.copy_template_to_custom("ubuntu", None, &cancel).unwrap();
    assert_eq!(name, "ubuntu-custom-2");

    let name = layout.copy_template_to_custom("ubuntu", None, &cancel).unwrap();
    assert_eq!(name, "ubuntu-custom-3");

    let copied = layout.option_dir(ConfigurationLayer::Custom, "ubuntu-custom-2");
    assert!(copied.join("compose.yaml").is_file());
    assert!(copied.join("scripts/setup.sh").is_file());
}

#[test]
fn test_copy_missing_template() {
    let temp = TempDir::new().unwrap();
    let layout = layout(temp.path());
    layout.initialize_layout().unwrap();

    let err = layout
        .copy_template_to_custom("ubuntu", None, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, LayoutError::TemplateNotFound { .. }));
    assert!(!err.suggestion().is_empty());
}

#[test]
fn test_template_name_cannot_leave_its_layer() {
    let temp = TempDir::new().unwrap();
    let layout = layout(temp.path());
    layout.initialize_layout().unwrap();
    fs::create_dir_all(temp.path().join(".deck/images/app-20240315-1430")).unwrap();

    for template in ["../images/app-20240315-1430", "..", "a/b", "a\\b", "tab\tname"] {
        let err = layout
            .copy_template_to_custom(template, None, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, LayoutError::InvalidName { .. }), "{:?}", template);
    }

    let images: Vec<_> = fs::read_dir(temp.path().join(".deck/images"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(images, vec!["app-20240315-1430"]);
    assert!(fs::read_dir(temp.path().join(".deck/custom")).unwrap().next().is_none());
}

#[test]
fn test_cancelled_copy_reports_partial() {
    let temp = TempDir::new().unwrap();
    let layout = layout(temp.path());
    layout.initialize_layout().unwrap();
    seed_template(temp.path(), "ubuntu");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = layout
        .copy_template_to_custom("ubuntu", Some("mine"), &cancel)
        .unwrap_err();
    assert!(err.suggestion().contains("partial"), "{}", err.suggestion());
}

// =============================================================================
// Metadata and listing
// =============================================================================

#[test]
fn test_metadata_absent_then_saved() {
    let temp = TempDir::new().unwrap();
    let layout = layout(temp.path());
    layout.initialize_layout().unwrap();
    let name = "api-20240315-1430";
    fs::create_dir_all(layout.option_dir(ConfigurationLayer::Images, name)).unwrap();

    assert!(layout.get_image_metadata(name).unwrap().is_none());

    let created = Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap();
    let mut metadata = ImageMetadata::new(name, "api-custom", created);
    metadata.build_status = BuildStatus::Built;
    layout.save_image_metadata(&metadata).unwrap();

    assert_eq!(layout.get_image_metadata(name).unwrap(), Some(metadata));
}

#[test]
fn test_save_metadata_for_missing_image() {
    let temp = TempDir::new().unwrap();
    let layout = layout(temp.path());
    layout.initialize_layout().unwrap();

    let metadata = ImageMetadata::new("ghost-20240315-1430", "ghost", Utc::now());
    let err = layout.save_image_metadata(&metadata).unwrap_err();
    assert!(matches!(err, LayoutError::ImageNotFound(_)));
}

#[test]
fn test_list_initializes_and_detects_types() {
    let temp = TempDir::new().unwrap();
    let layout = layout(temp.path());

    let options = layout.list_layer_options().unwrap();
    assert!(options.templates.is_empty());
    assert!(temp.path().join(".deck/images").is_dir());

    let web = layout.option_dir(ConfigurationLayer::Templates, "web");
    fs::create_dir_all(&web).unwrap();
    fs::write(web.join("package.json"), "{}").unwrap();
    fs::write(web.join("Dockerfile"), "FROM node\n").unwrap();
    fs::create_dir_all(layout.option_dir(ConfigurationLayer::Templates, "bare")).unwrap();

    let options = layout.list_layer_options().unwrap();
    assert_eq!(options.names(ConfigurationLayer::Templates), vec!["bare", "web"]);

    let web = &options.templates[1];
    assert_eq!(web.project_type, ProjectType::Node);
    assert!(web.is_available);
    assert!(!options.templates[0].is_available);
}
