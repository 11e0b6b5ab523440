//! Input validation helpers shared by the ingestion and query paths

use regex::Regex;

use crate::constants::MAX_FILENAME_LENGTH;
use crate::error::{AppError, AppResult};

/// Maximum length of measurement, tag and field names
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an upload filename: it becomes the last segment of an object key.
pub fn validate_filename(filename: &str) -> AppResult<()> {
    if filename.is_empty() {
        return Err(AppError::InvalidInput("Filename cannot be empty".to_string()));
    }

    if filename.chars().count() as u64 > MAX_FILENAME_LENGTH {
        return Err(AppError::InvalidInput(format!(
            "Filename exceeds maximum length of {} characters",
            MAX_FILENAME_LENGTH
        )));
    }

    if filename.contains('/') || filename.contains('\\') || filename == "." || filename == ".." {
        return Err(AppError::InvalidInput(format!(
            "Filename '{}' must not contain path separators",
            filename
        )));
    }

    if filename.chars().any(|c| c.is_control()) {
        return Err(AppError::InvalidInput(
            "Filename contains control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a measurement, tag or field name used in a query.
pub fn validate_identifier(kind: &str, name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::InvalidInput(format!("{} cannot be empty", kind)));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(AppError::InvalidInput(format!(
            "{} '{}' exceeds maximum length of {} characters",
            kind, name, MAX_IDENTIFIER_LENGTH
        )));
    }

    // Pattern: leading letter or underscore, then letters, digits, underscore, hyphen, dot
    let pattern = Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-\.]*$")
        .map_err(|e| AppError::Internal(format!("Failed to compile identifier regex: {}", e)))?;

    if !pattern.is_match(name) {
        return Err(AppError::InvalidInput(format!(
            "{} '{}' contains invalid characters. Allowed: letters, digits, underscore (_), hyphen (-), dot (.)",
            kind, name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("a.jpg").is_ok());
        assert!(validate_filename("sensor reading 01.wav").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("dir/a.jpg").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("Measurement", "temperature").is_ok());
        assert!(validate_identifier("Field", "temp_c.avg").is_ok());
        assert!(validate_identifier("Field", "1abc").is_err());
        assert!(validate_identifier("Field", "a\"; DROP").is_err());
        assert!(validate_identifier("Tag", "").is_err());
    }
}
