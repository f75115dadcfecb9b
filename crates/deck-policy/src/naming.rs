//! Image directory naming: `prefix-YYYYMMDD-HHMM`.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Human-readable description of the expected format.
pub const IMAGE_NAME_FORMAT: &str =
    "prefix-YYYYMMDD-HHMM (e.g. myapp-20240315-1430): a prefix of letters, digits, \
     '.', '_' or '-', then an 8-digit date and a 4-digit time";

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M";
const FALLBACK_PREFIX: &str = "image";

/// `None` if the pattern failed to compile; every prefix is then rejected.
fn prefix_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").ok())
        .as_ref()
}

/// Result of checking an image directory name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageNameValidation {
    pub name: String,
    pub is_valid: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// `YYYYMMDD-HHMM` part when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Repaired name, only on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_name: Option<String>,

    pub format_description: String,

    #[serde(default)]
    pub errors: Vec<String>,
}

/// Validate against the current time.
pub fn validate_image_directory_name(name: &str) -> ImageNameValidation {
    validate_image_directory_name_at(name, Utc::now())
}

/// Validate, using `now` to build a suggestion on failure.
pub fn validate_image_directory_name_at(name: &str, now: DateTime<Utc>) -> ImageNameValidation {
    let mut errors = Vec::new();

    let parts: Vec<&str> = name.rsplitn(3, '-').collect();
    let (prefix, date, time) = match parts.as_slice() {
        [time, date, prefix] => (Some(*prefix), Some(*date), Some(*time)),
        _ => (None, None, None),
    };

    // With fewer than two hyphens the whole name is treated as the prefix
    let prefix = prefix.unwrap_or(name);

    if prefix.is_empty() {
        errors.push("Prefix is empty".to_string());
    } else if !prefix_regex().is_some_and(|re| re.is_match(prefix)) {
        errors.push(format!("Prefix '{}' contains invalid characters", prefix));
    }

    match (date, time) {
        (Some(date), Some(time)) => {
            if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
                errors.push(format!("Date segment '{}' must be exactly 8 digits", date));
            } else if NaiveDate::parse_from_str(date, "%Y%m%d").is_err() {
                errors.push(format!("Date segment '{}' is not a calendar date", date));
            }

            if time.len() != 4 || !time.bytes().all(|b| b.is_ascii_digit()) {
                errors.push(format!("Time segment '{}' must be exactly 4 digits", time));
            } else if NaiveTime::parse_from_str(time, "%H%M").is_err() {
                errors.push(format!("Time segment '{}' is not a valid time", time));
            }
        }
        _ => errors.push("Missing -YYYYMMDD-HHMM timestamp suffix".to_string()),
    }

    let is_valid = errors.is_empty();
    let timestamp = match (date, time) {
        (Some(d), Some(t)) if is_valid => Some(format!("{}-{}", d, t)),
        _ => None,
    };

    ImageNameValidation {
        name: name.to_string(),
        is_valid,
        prefix: if prefix.is_empty() {
            None
        } else {
            Some(prefix.to_string())
        },
        timestamp,
        suggested_name: if is_valid {
            None
        } else {
            Some(generate_image_name(prefix, now))
        },
        format_description: IMAGE_NAME_FORMAT.to_string(),
        errors,
    }
}

/// Build a conforming name from a prefix and a time.
///
/// Characters outside the allowed set become `-`; an unusable prefix falls
/// back to `image`.
pub fn generate_image_name(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", sanitize_prefix(prefix), now.format(TIMESTAMP_FORMAT))
}

fn sanitize_prefix(prefix: &str) -> String {
    let cleaned: String = prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| !c.is_ascii_alphanumeric());

    if cleaned.is_empty() {
        FALLBACK_PREFIX.to_string()
    } else {
        cleaned.to_string()
    }
}
