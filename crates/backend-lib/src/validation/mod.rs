// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Input validation for requests and storage keys.

use crate::error::AppError;
use campus_safety_common::{GeoPoint, NamedPoint};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const MAX_ID_LENGTH: usize = 128;
const MAX_SUMMARY_LENGTH: usize = 1000;
const MAX_TEXT_LENGTH: usize = 4000;
const MAX_NAME_LENGTH: usize = 100;
const MAX_KEY_LENGTH: usize = 200;
/// Upper bound on a planned walk, in minutes
const MAX_WALK_MINUTES: u32 = 12 * 60;

static ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());
static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^<>{}\[\]\\]*$").unwrap());

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Invalid text: {0}")]
    InvalidText(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

/// Validate an opaque identifier (user, SOS or walk id)
pub fn validate_id(id: &str) -> ValidationResult<&str> {
    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        return Err(ValidationError::InvalidId(format!(
            "id must be between 1 and {MAX_ID_LENGTH} characters"
        )));
    }
    if !ID_REGEX.is_match(id) {
        return Err(ValidationError::InvalidId(
            "id must contain only alphanumeric characters, hyphens and underscores".to_string(),
        ));
    }
    Ok(id)
}

pub fn validate_coordinates(lat: f64, lng: f64) -> ValidationResult<()> {
    if GeoPoint::new(lat, lng).is_valid() {
        Ok(())
    } else {
        Err(ValidationError::InvalidCoordinates(format!(
            "({lat}, {lng}) is not a valid WGS84 position"
        )))
    }
}

pub fn validate_point(point: &GeoPoint) -> ValidationResult<()> {
    validate_coordinates(point.lat, point.lng)?;
    if let Some(address) = &point.address {
        validate_optional_text(Some(address))?;
    }
    Ok(())
}

pub fn validate_named_point(point: &NamedPoint) -> ValidationResult<()> {
    validate_coordinates(point.lat, point.lng)?;
    if let Some(name) = &point.name {
        validate_name(name)?;
    }
    Ok(())
}

/// Resolution summaries must say something
pub fn validate_summary(summary: &str) -> ValidationResult<&str> {
    let trimmed = summary.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidText(
            "summary must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_SUMMARY_LENGTH {
        return Err(ValidationError::InvalidText(format!(
            "summary must be at most {MAX_SUMMARY_LENGTH} characters"
        )));
    }
    Ok(trimmed)
}

/// Free text such as descriptions, transcripts and notes
pub fn validate_optional_text(text: Option<&String>) -> ValidationResult<()> {
    match text {
        Some(text) if text.chars().count() > MAX_TEXT_LENGTH => Err(ValidationError::InvalidText(
            format!("text must be at most {MAX_TEXT_LENGTH} characters"),
        )),
        _ => Ok(()),
    }
}

/// Non-empty message body
pub fn validate_message(message: &str) -> ValidationResult<&str> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidText(
            "message must not be empty".to_string(),
        ));
    }
    validate_optional_text(Some(&trimmed.to_string()))?;
    Ok(trimmed)
}

/// Display names (escorts, places)
pub fn validate_name(name: &str) -> ValidationResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::InvalidName(format!(
            "name must be between 1 and {MAX_NAME_LENGTH} characters"
        )));
    }
    if !NAME_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidName(
            "name contains invalid characters".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Keys of the local key-value store double as file names
pub fn validate_storage_key(key: &str) -> ValidationResult<&str> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH || key.starts_with('.') {
        return Err(ValidationError::InvalidKey(key.to_string()));
    }
    if !KEY_REGEX.is_match(key) {
        return Err(ValidationError::InvalidKey(key.to_string()));
    }
    Ok(key)
}

pub fn validate_expected_duration(minutes: u32) -> ValidationResult<u32> {
    if minutes == 0 || minutes > MAX_WALK_MINUTES {
        return Err(ValidationError::InvalidDuration(format!(
            "expected duration must be between 1 and {MAX_WALK_MINUTES} minutes"
        )));
    }
    Ok(minutes)
}
