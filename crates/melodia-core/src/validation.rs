//! # Validation Module
//!
//! Input checks that run before any store call, plus the identity
//! normalization used to detect duplicate entities.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: THIS MODULE                                                  │
//! │  ├── Empty / oversized ids and names                                   │
//! │  └── Rejected as InvalidArgument before the store is touched           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  ├── PRIMARY KEY uniqueness                                            │
//! │  └── Foreign keys (may be disabled during integrity repair)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::MAX_ID_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates an entity id.
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most 64 characters
/// - No leading/trailing whitespace
///
/// ## Example
/// ```rust
/// use melodia_core::validation::validate_id;
///
/// assert!(validate_id("id", "artist-1").is_ok());
/// assert!(validate_id("id", "").is_err());
/// assert!(validate_id("id", " a1").is_err());
/// ```
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    if id.trim() != id {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not start or end with whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates an optional reference. `None` is always accepted.
pub fn validate_optional_id(field: &str, id: Option<&str>) -> ValidationResult<()> {
    match id {
        Some(id) => validate_id(field, id),
        None => Ok(()),
    }
}

/// Validates a required display text (name, title).
pub fn validate_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

/// Validates a release year.
pub fn validate_year(year: i32) -> ValidationResult<()> {
    if !(1000..=9999).contains(&year) {
        return Err(ValidationError::OutOfRange {
            field: "year".to_string(),
            min: 1000,
            max: 9999,
        });
    }
    Ok(())
}

/// Normalizes a display name into the key used to detect duplicates.
///
/// Trims, collapses inner whitespace runs and lowercases, so
/// `"Radiohead"`, `"radiohead"` and `"  RADIOHEAD "` share one key.
pub fn normalize_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Identity key of an album: owning artist plus normalized title.
///
/// An album without an artist has no identity to share; `None` keeps it
/// from colliding with other artist-less albums of the same title.
pub fn album_identity_key(artist_id: Option<&str>, title: &str) -> Option<String> {
    let artist_id = artist_id?;
    Some(format!("{}\u{1f}{}", artist_id, normalize_key(title)))
}
