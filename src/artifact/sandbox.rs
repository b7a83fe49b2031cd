//! Path-sandboxed access to build output and export files.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use walkdir::WalkDir;

use super::locator::ArtifactLocator;
use crate::build::ExportFormat;
use crate::error::{AppError, Result};
use crate::instance::ResourceId;

/// One direct child of a build output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    /// Forward-slash path relative to the build root.
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub modified_at: i64,
}

fn normalize_relative(raw: &str) -> String {
    let normalized = raw.replace('\\', "/");
    match normalized.strip_prefix('/') {
        Some(rest) => rest.to_string(),
        None => normalized,
    }
}

fn has_windows_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Resolve `relative` against `base`, failing with PathTraversal if the
/// result leaves the base directory.
pub fn resolve_within_base(base: &Path, relative: &str) -> Result<PathBuf> {
    let canonical_base = base
        .canonicalize()
        .map_err(|e| AppError::internal(format!("Failed to resolve artifact directory: {e}")))?;

    let normalized = normalize_relative(relative);
    if has_windows_drive_prefix(&normalized) {
        return Err(AppError::path_traversal(relative));
    }

    let mut target = canonical_base.clone();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if !target.pop() {
                    return Err(AppError::path_traversal(relative));
                }
            }
            _ => {
                let only_normal = Path::new(part)
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)));
                if !only_normal {
                    return Err(AppError::path_traversal(relative));
                }
                target.push(part);
            }
        }
    }

    if !target.starts_with(&canonical_base) {
        return Err(AppError::path_traversal(relative));
    }

    // Symlinks inside the output must not lead outside it either.
    if target.symlink_metadata().is_ok() {
        let resolved = target
            .canonicalize()
            .map_err(|_| AppError::not_found(format!("File not found: {relative}")))?;
        if !resolved.starts_with(&canonical_base) {
            return Err(AppError::path_traversal(relative));
        }
        return Ok(resolved);
    }

    Ok(target)
}

fn to_forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Serves files produced by builds and exports.
pub struct ArtifactReader {
    locator: Arc<ArtifactLocator>,
}

impl ArtifactReader {
    pub fn new(locator: Arc<ArtifactLocator>) -> Self {
        Self { locator }
    }

    fn build_base(&self, resource_id: ResourceId) -> Result<PathBuf> {
        self.locator.resolve_build_base(resource_id).ok_or_else(|| {
            AppError::not_found(format!("No build output for slideId {resource_id}"))
        })
    }

    /// Read one file from the build output.
    pub async fn read_asset(&self, resource_id: ResourceId, relative: &str) -> Result<Vec<u8>> {
        let base = self.build_base(resource_id)?;
        let target = resolve_within_base(&base, relative)?;

        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(|_| AppError::not_found(format!("File not found: {relative}")))?;
        if metadata.is_dir() {
            return Err(AppError::invalid_argument(format!(
                "Requested path is a directory: {relative}"
            )));
        }

        tokio::fs::read(&target).await.map_err(|e| {
            log::error!("Failed to read asset {} of {}: {}", relative, resource_id, e);
            AppError::internal(format!("Failed to read file: {relative}"))
        })
    }

    /// List the direct children of a directory in the build output.
    pub fn list_entries(&self, resource_id: ResourceId, relative: &str) -> Result<Vec<FileEntry>> {
        let base = self.build_base(resource_id)?;
        let canonical_base = base
            .canonicalize()
            .map_err(|e| AppError::internal(format!("Failed to resolve artifact directory: {e}")))?;
        let target = resolve_within_base(&canonical_base, relative)?;
        let shown = if relative.is_empty() { "." } else { relative };

        if !target.exists() {
            return Err(AppError::not_found(format!("Directory not found: {shown}")));
        }
        if !target.is_dir() {
            return Err(AppError::invalid_argument(format!(
                "Requested path is not a directory: {shown}"
            )));
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&target)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let metadata = entry.metadata()?;
            let relative_path = entry
                .path()
                .strip_prefix(&canonical_base)
                .map(to_forward_slashes)
                .unwrap_or_else(|_| entry.file_name().to_string_lossy().into_owned());
            let modified_at = metadata
                .modified()
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis())
                .unwrap_or(0);

            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: relative_path,
                is_directory: metadata.is_dir(),
                size: metadata.len(),
                modified_at,
            });
        }
        Ok(entries)
    }

    /// Read the exported file for a resource.
    pub async fn read_export_file(&self, resource_id: ResourceId, format: ExportFormat) -> Result<Vec<u8>> {
        let missing = || {
            AppError::not_found(format!(
                "No {} export for slideId {}",
                format.extension(),
                resource_id
            ))
        };
        let path = self
            .locator
            .resolve_export_file(resource_id, format)
            .ok_or_else(missing)?;
        if path.is_dir() {
            return Err(missing());
        }
        tokio::fs::read(&path).await.map_err(|_| missing())
    }
}
