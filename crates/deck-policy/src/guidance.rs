//! Guidance for permission violations
//!
//! A static knowledge base that turns every denial into something a user can
//! act on. Nothing here depends on filesystem state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of policy violation a caller can ask guidance for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// Write to a protected build artifact in an image
    ProtectedFileModification,
    /// Delete of a protected build artifact in an image
    ProtectedFileDeletion,
    /// Rename of an image directory
    DirectoryRename,
    /// Delete of an image directory
    DirectoryDelete,
    /// Delete of an image's runtime `.env`
    EnvDeletion,
    /// Post-build change to a build-time env variable
    BuildTimeVariableChange,
    /// Write or delete inside the Templates layer
    TemplateModification,
    /// Image directory name not in `prefix-YYYYMMDD-HHMM` form
    InvalidImageName,
}

impl ViolationKind {
    /// Every kind, in declaration order.
    pub const ALL: [ViolationKind; 8] = [
        ViolationKind::ProtectedFileModification,
        ViolationKind::ProtectedFileDeletion,
        ViolationKind::DirectoryRename,
        ViolationKind::DirectoryDelete,
        ViolationKind::EnvDeletion,
        ViolationKind::BuildTimeVariableChange,
        ViolationKind::TemplateModification,
        ViolationKind::InvalidImageName,
    ];

    /// Machine-readable code, e.g. `PROTECTED_FILE_MODIFICATION`.
    pub fn code(&self) -> &'static str {
        match self {
            ViolationKind::ProtectedFileModification => "PROTECTED_FILE_MODIFICATION",
            ViolationKind::ProtectedFileDeletion => "PROTECTED_FILE_DELETION",
            ViolationKind::DirectoryRename => "DIRECTORY_RENAME",
            ViolationKind::DirectoryDelete => "DIRECTORY_DELETE",
            ViolationKind::EnvDeletion => "ENV_DELETION",
            ViolationKind::BuildTimeVariableChange => "BUILD_TIME_VARIABLE_CHANGE",
            ViolationKind::TemplateModification => "TEMPLATE_MODIFICATION",
            ViolationKind::InvalidImageName => "INVALID_IMAGE_NAME",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ViolationKind {
    type Err = String;

    /// Accepts the machine code, kebab-case or the bare PascalCase name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        ViolationKind::ALL
            .into_iter()
            .find(|k| {
                let code: String = k
                    .code()
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .map(|c| c.to_ascii_lowercase())
                    .collect();
                code == normalized
            })
            .ok_or_else(|| format!("Unknown violation kind: {}", s))
    }
}

/// Guidance bundle for one violation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGuidance {
    pub violation: ViolationKind,
    pub detailed_explanation: String,
    pub design_rationale: String,
    pub fix_steps: Vec<String>,
    pub alternatives: Vec<String>,
    pub examples: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn bundle(
    kind: ViolationKind,
    explanation: &str,
    rationale: &str,
    steps: &[&str],
    alternatives: &[&str],
    examples: &[&str],
) -> PermissionGuidance {
    PermissionGuidance {
        violation: kind,
        detailed_explanation: explanation.to_string(),
        design_rationale: rationale.to_string(),
        fix_steps: strings(steps),
        alternatives: strings(alternatives),
        examples: strings(examples),
    }
}

/// Look up the guidance bundle for a violation.
pub fn guidance_for(kind: ViolationKind) -> PermissionGuidance {
    match kind {
        ViolationKind::ProtectedFileModification => bundle(
            kind,
            "Build artifacts inside an Images directory (compose files, Dockerfiles, \
             metadata.json, .dockerignore) are a frozen snapshot of the configuration \
             the image was built from.",
            "An image must always be reproducible from its own directory. Editing an \
             artifact in place makes the directory disagree with the image that is \
             actually running.",
            &[
                "Open the matching file in the Custom layer (.deck/custom/<config>/)",
                "Apply the change there",
                "Create a new image from the updated Custom configuration",
            ],
            &[
                "Edit the file in the Custom layer and rebuild",
                "Change runtime variables in the image .env if only ports or names differ",
            ],
            &[
                "deck copy ubuntu --name ubuntu-dev",
                "deck image create ubuntu-dev --prefix ubuntu",
            ],
        ),
        ViolationKind::ProtectedFileDeletion => bundle(
            kind,
            "Protected build artifacts cannot be deleted from an Images directory.",
            "Without its compose file or Dockerfile the image can no longer be rebuilt \
             or started from its directory.",
            &[
                "Remove the file from the Custom layer configuration instead",
                "Create a new image from the Custom configuration",
            ],
            &[
                "Delete the file in the Custom layer and rebuild",
                "Keep the old image and create a new one alongside it",
            ],
            &["deck image create ubuntu-dev"],
        ),
        ViolationKind::DirectoryRename => bundle(
            kind,
            "Image directories cannot be renamed in place.",
            "The directory name is the only link between a human-chosen configuration \
             and its built artifact. Renaming it orphans the image and breaks container \
             name resolution.",
            &[
                "Create a new image with the desired prefix",
                "Retire the old image once the new one is running",
            ],
            &["Create a new image with a different prefix"],
            &["deck image create ubuntu-dev --prefix ubuntu-next"],
        ),
        ViolationKind::DirectoryDelete => bundle(
            kind,
            "Image directories cannot be deleted through this tool.",
            "Deleting the directory leaves the built image and any container without \
             the configuration they were created from.",
            &[
                "Stop and remove the container with the container engine",
                "Remove the built image with the container engine",
                "Only then remove the directory by hand",
            ],
            &[
                "Create a new image instead of reusing this one",
                "Leave the directory in place as a record of the build",
            ],
            &["deck image status myapp-20240315-1430"],
        ),
        ViolationKind::EnvDeletion => bundle(
            kind,
            "The runtime .env of an image cannot be deleted.",
            "The running container reads its ports and names from this file. Deleting \
             it silently breaks the container's configuration on next start.",
            &[
                "Edit the runtime variables in place instead",
                "Restore defaults by creating a new image from the Custom layer",
            ],
            &[
                "Change only runtime variables in the image .env",
                "Edit the Custom layer .env and rebuild",
            ],
            &["deck check env .deck/images/myapp-20240315-1430/.env DEV_PORT=5100"],
        ),
        ViolationKind::BuildTimeVariableChange => bundle(
            kind,
            "Only runtime variables may change in an image .env after it is built.",
            "Build-time variables are baked into the image. Changing them afterwards has \
             no effect and makes the .env disagree with the image.",
            &[
                "Make the change in the Custom layer .env",
                "Create a new image from the Custom configuration",
            ],
            &[
                "Edit the Custom layer .env and rebuild",
                "Use a runtime variable if the value only matters at container start",
            ],
            &["deck policy"],
        ),
        ViolationKind::TemplateModification => bundle(
            kind,
            "Templates are read-only starting points.",
            "Templates are shared and re-synced; local edits would be overwritten or \
             leak into every configuration created from them.",
            &[
                "Copy the template into the Custom layer",
                "Edit the copy",
            ],
            &["Copy the template to the Custom layer and edit it there"],
            &["deck copy ubuntu"],
        ),
        ViolationKind::InvalidImageName => bundle(
            kind,
            "Image directory names must follow prefix-YYYYMMDD-HHMM.",
            "The timestamp suffix keeps image names unique and sortable by creation \
             time, and the prefix ties the image back to its configuration.",
            &[
                "Use the suggested name",
                "Or let the image command generate the name from the current time",
            ],
            &["Let `deck image create` generate the directory name"],
            &["myapp-20240315-1430"],
        ),
    }
}

impl PermissionGuidance {
    /// Format as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Format as human-readable text
    pub fn to_human(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Violation: {}", self.violation));
        lines.push(String::new());
        lines.push(self.detailed_explanation.clone());
        lines.push(String::new());
        lines.push(format!("Why: {}", self.design_rationale));

        lines.push(String::new());
        lines.push("How to fix:".to_string());
        for (i, step) in self.fix_steps.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, step));
        }

        if !self.alternatives.is_empty() {
            lines.push(String::new());
            lines.push("Alternatives:".to_string());
            for alt in &self.alternatives {
                lines.push(format!("  - {}", alt));
            }
        }

        if !self.examples.is_empty() {
            lines.push(String::new());
            lines.push("Examples:".to_string());
            for example in &self.examples {
                lines.push(format!("  $ {}", example));
            }
        }

        lines.join("\n")
    }
}
