//! Image metadata sidecar (`image.meta`)
//!
//! One `key=value` line per field, written when an image is materialized
//! and re-read on every listing or status command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Build lifecycle of an image directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Prepared,
    Building,
    Built,
    Failed,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Prepared => write!(f, "Prepared"),
            BuildStatus::Building => write!(f, "Building"),
            BuildStatus::Built => write!(f, "Built"),
            BuildStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prepared" => Ok(BuildStatus::Prepared),
            "building" => Ok(BuildStatus::Building),
            "built" => Ok(BuildStatus::Built),
            "failed" => Ok(BuildStatus::Failed),
            _ => Err(format!("Unknown build status: {}", s)),
        }
    }
}

/// Errors reading a sidecar file
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("missing key '{0}'")]
    MissingKey(&'static str),

    #[error("invalid value for '{key}': {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Per-image metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub image_name: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,

    /// Custom configuration the image was materialized from
    pub source_custom: String,

    pub build_status: BuildStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started: Option<DateTime<Utc>>,
}

impl ImageMetadata {
    /// Fresh metadata in `Prepared` state; the container is named after the image.
    pub fn new(image_name: &str, source_custom: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            image_name: image_name.to_string(),
            created_at,
            created_by: current_user(),
            source_custom: source_custom.to_string(),
            build_status: BuildStatus::Prepared,
            container_name: Some(image_name.to_string()),
            last_started: None,
        }
    }

    pub fn to_key_value(&self) -> String {
        let mut lines = vec![
            "# deck image metadata".to_string(),
            format!("image_name={}", self.image_name),
            format!("created_at={}", self.created_at.to_rfc3339()),
            format!("created_by={}", self.created_by),
            format!("source_custom={}", self.source_custom),
            format!("build_status={}", self.build_status),
        ];
        if let Some(container) = &self.container_name {
            lines.push(format!("container_name={}", container));
        }
        if let Some(started) = &self.last_started {
            lines.push(format!("last_started={}", started.to_rfc3339()));
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    pub fn parse(contents: &str) -> Result<Self, MetadataError> {
        let values: BTreeMap<&str, &str> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();

        let required = |key: &'static str| -> Result<&str, MetadataError> {
            values
                .get(key)
                .copied()
                .filter(|v| !v.is_empty())
                .ok_or(MetadataError::MissingKey(key))
        };
        let timestamp = |key: &'static str, value: &str| -> Result<DateTime<Utc>, MetadataError> {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| MetadataError::InvalidValue {
                    key,
                    value: value.to_string(),
                })
        };

        let build_status_raw = required("build_status")?;
        let build_status =
            build_status_raw
                .parse::<BuildStatus>()
                .map_err(|_| MetadataError::InvalidValue {
                    key: "build_status",
                    value: build_status_raw.to_string(),
                })?;

        let last_started = match values.get("last_started").filter(|v| !v.is_empty()) {
            Some(v) => Some(timestamp("last_started", *v)?),
            None => None,
        };

        Ok(Self {
            image_name: required("image_name")?.to_string(),
            created_at: timestamp("created_at", required("created_at")?)?,
            created_by: values.get("created_by").copied().unwrap_or("unknown").to_string(),
            source_custom: required("source_custom")?.to_string(),
            build_status,
            container_name: values
                .get("container_name")
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string()),
            last_started,
        })
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> ImageMetadata {
        let created = Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap();
        let mut meta = ImageMetadata::new("myapp-20240315-1430", "myapp-custom", created);
        meta.created_by = "dev".to_string();
        meta
    }

    #[test]
    fn test_new_is_prepared() {
        let meta = sample();
        assert_eq!(meta.build_status, BuildStatus::Prepared);
        assert_eq!(meta.container_name.as_deref(), Some("myapp-20240315-1430"));
        assert!(meta.last_started.is_none());
    }

    #[test]
    fn test_key_value_format() {
        let text = sample().to_key_value();
        assert!(text.contains("image_name=myapp-20240315-1430\n"));
        assert!(text.contains("build_status=Prepared\n"));
        assert!(!text.contains("last_started"));
        assert_eq!(ImageMetadata::parse(&text).unwrap(), sample());
    }

    #[test]
    fn test_parse_with_last_started() {
        let mut meta = sample();
        meta.build_status = BuildStatus::Built;
        meta.last_started = Some(Utc.with_ymd_and_hms(2024, 3, 16, 9, 0, 0).unwrap());

        let parsed = ImageMetadata::parse(&meta.to_key_value()).unwrap();
        assert_eq!(parsed.last_started, meta.last_started);
        assert_eq!(parsed.build_status, BuildStatus::Built);
    }

    #[test]
    fn test_parse_missing_key() {
        let err = ImageMetadata::parse("image_name=x\n").unwrap_err();
        assert_eq!(err, MetadataError::MissingKey("build_status"));
    }

    #[test]
    fn test_parse_bad_status() {
        let text = sample().to_key_value().replace("Prepared", "Exploded");
        let err = ImageMetadata::parse(&text).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidValue { key: "build_status", .. }));
    }
}
