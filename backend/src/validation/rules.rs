//! Common validation rules shared across request payloads.

use validator::ValidationError;

const MAX_ROLE_LEN: usize = 32;

/// Validates a role name.
///
/// Requirements:
/// - 1-32 characters in length
/// - Only lowercase ASCII letters and underscores
pub fn validate_role(role: &str) -> Result<(), ValidationError> {
    if role.is_empty() || role.len() > MAX_ROLE_LEN {
        return Err(ValidationError::new("role_invalid_length"));
    }

    if !role.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
        return Err(ValidationError::new("role_invalid_characters"));
    }

    Ok(())
}

/// Rejects values made only of whitespace.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}
