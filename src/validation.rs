use std::path::Path;

use crate::error::{AppError, Result};
use crate::instance::ResourceId;

pub fn validate_resource_id(resource_id: ResourceId) -> Result<()> {
    if resource_id == 0 {
        return Err(AppError::invalid_argument("slideId must be a positive integer"));
    }
    Ok(())
}

/// Reject empty and relative paths.
pub fn validate_absolute_path(path: &Path, field: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(AppError::invalid_argument(format!(
            "{field} must be a non-empty string"
        )));
    }
    if !path.is_absolute() {
        return Err(AppError::invalid_argument(format!(
            "{field} must be an absolute path"
        )));
    }
    Ok(())
}

/// The source document must be an existing file.
pub fn validate_source_path(path: &Path, field: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(AppError::invalid_argument(format!(
            "{field} must be a non-empty string"
        )));
    }
    if !path.is_file() {
        return Err(AppError::invalid_argument(format!(
            "{field} does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}
