//! Request validation module
//!
//! Cheap checks on request parameters that run before any pipeline work.

use std::str::FromStr;

use mediaquiz_core::tally::Decision;

use crate::error::ApiError;

const MAX_ITEM_LEN: usize = 100;

/// Validates the number of files in one upload request
pub fn validate_file_count(count: usize, max_files: usize) -> Result<(), ApiError> {
    if count > max_files {
        Err(ApiError::bad_request(format!(
            "Too many files: at most {} per upload",
            max_files
        )))
    } else {
        Ok(())
    }
}

/// Normalises an item name: trimmed, lowercase, non-empty and free of path
/// separators.
pub fn validate_item(item: &str) -> Result<String, ApiError> {
    let item = item.trim().to_lowercase();
    if item.is_empty() {
        return Err(ApiError::bad_request("Item must not be empty"));
    }
    if item.len() > MAX_ITEM_LEN {
        return Err(ApiError::bad_request("Item name too long"));
    }
    if item.contains(['/', '\\']) || item.starts_with('.') {
        return Err(ApiError::bad_request(format!("Invalid item name: '{}'", item)));
    }
    Ok(item)
}

/// Image ids are lowercase hex content hashes
pub fn validate_image_id(id: &str) -> Result<&str, ApiError> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::bad_request("Invalid image id"));
    }
    Ok(id)
}

/// Parses a reviewer confirmation (`valid`, `invalid` or `duplicate`)
pub fn parse_confirmation(value: &str) -> Result<Decision, ApiError> {
    Decision::from_str(value)
        .map_err(|_| ApiError::bad_request(format!("Invalid confirmation: '{}'", value.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_count() {
        assert!(validate_file_count(1, 10).is_ok());
        assert!(validate_file_count(10, 10).is_ok());
        assert!(validate_file_count(11, 10).is_err());
    }

    #[test]
    fn test_validate_item_normalises() {
        assert_eq!(validate_item("  Robin ").unwrap(), "robin");
        assert_eq!(validate_item("Blue Tit").unwrap(), "blue tit");
    }

    #[test]
    fn test_validate_item_rejected() {
        assert!(validate_item("").is_err());
        assert!(validate_item("   ").is_err());
        assert!(validate_item("../robin").is_err());
        assert!(validate_item("birds/robin").is_err());
        assert!(validate_item(".hidden").is_err());
    }

    #[test]
    fn test_validate_image_id() {
        assert!(validate_image_id("a3f09c").is_ok());
        assert!(validate_image_id("").is_err());
        assert!(validate_image_id("../x").is_err());
    }

    #[test]
    fn test_parse_confirmation() {
        assert_eq!(parse_confirmation("valid").unwrap(), Decision::Valid);
        assert_eq!(parse_confirmation(" Duplicate ").unwrap(), Decision::Duplicate);
        assert!(parse_confirmation("maybe").is_err());
    }
}
