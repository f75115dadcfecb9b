//! Project type detection
//!
//! A configuration's project type picks its default port roles. Detection
//! tries, in order: a `PROJECT_TYPE` key in the directory's `.env`, marker
//! files, then tokens of the directory name.

use deck_policy::parse_env;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::layout::FileSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    DotNet,
    Avalonia,
    Node,
    Python,
    Rust,
    Go,
    Java,
    Unknown,
}

impl ProjectType {
    pub const ALL: [ProjectType; 8] = [
        ProjectType::DotNet,
        ProjectType::Avalonia,
        ProjectType::Node,
        ProjectType::Python,
        ProjectType::Rust,
        ProjectType::Go,
        ProjectType::Java,
        ProjectType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::DotNet => "dotnet",
            ProjectType::Avalonia => "avalonia",
            ProjectType::Node => "node",
            ProjectType::Python => "python",
            ProjectType::Rust => "rust",
            ProjectType::Go => "go",
            ProjectType::Java => "java",
            ProjectType::Unknown => "unknown",
        }
    }

    /// Detect the project type of a configuration directory.
    pub fn detect(dir: &Path, fs: &dyn FileSystem) -> ProjectType {
        if let Ok(contents) = fs.read_text_file(&dir.join(".env")) {
            if let Some(declared) = parse_env(&contents).get("PROJECT_TYPE") {
                if let Ok(project_type) = declared.parse::<ProjectType>() {
                    return project_type;
                }
            }
        }

        if let Some(project_type) = Self::from_markers(dir, fs) {
            return project_type;
        }

        dir.file_name()
            .map(|n| Self::from_dir_name(&n.to_string_lossy()))
            .unwrap_or(ProjectType::Unknown)
    }

    fn from_markers(dir: &Path, fs: &dyn FileSystem) -> Option<ProjectType> {
        let files = fs.list_files(dir).ok()?;
        let names: Vec<String> = files
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        let has = |name: &str| names.iter().any(|n| n == name);

        if let Some(csproj) = files
            .iter()
            .find(|p| p.extension().is_some_and(|e| e == "csproj"))
        {
            let references_avalonia = fs
                .read_text_file(csproj)
                .map(|c| c.contains("Avalonia"))
                .unwrap_or(false);
            return Some(if references_avalonia {
                ProjectType::Avalonia
            } else {
                ProjectType::DotNet
            });
        }
        if names.iter().any(|n| n.ends_with(".sln")) {
            return Some(ProjectType::DotNet);
        }
        if has("package.json") {
            return Some(ProjectType::Node);
        }
        if has("pyproject.toml") || has("requirements.txt") {
            return Some(ProjectType::Python);
        }
        if has("Cargo.toml") {
            return Some(ProjectType::Rust);
        }
        if has("go.mod") {
            return Some(ProjectType::Go);
        }
        if has("pom.xml") || has("build.gradle") {
            return Some(ProjectType::Java);
        }
        None
    }

    /// Match whole name tokens, so `django` never reads as `go`.
    pub fn from_dir_name(name: &str) -> ProjectType {
        let lower = name.to_lowercase();
        lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .find_map(|token| token.parse::<ProjectType>().ok())
            .unwrap_or(ProjectType::Unknown)
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dotnet" | ".net" | "net" | "csharp" | "aspnet" => Ok(ProjectType::DotNet),
            "avalonia" => Ok(ProjectType::Avalonia),
            "node" | "nodejs" | "javascript" | "typescript" | "react" | "vue" | "next" => {
                Ok(ProjectType::Node)
            }
            "python" | "py" | "django" | "flask" | "fastapi" => Ok(ProjectType::Python),
            "rust" => Ok(ProjectType::Rust),
            "go" | "golang" => Ok(ProjectType::Go),
            "java" | "spring" | "kotlin" => Ok(ProjectType::Java),
            "unknown" => Ok(ProjectType::Unknown),
            _ => Err(format!("Unknown project type: {}", s)),
        }
    }
}
