//! Conventional on-disk locations for build output, exports and scratch space.

use std::path::{Path, PathBuf};

use crate::build::ExportFormat;
use crate::instance::ResourceId;

/// Default build output directory (`<work>/output/<id>`).
pub fn default_output_dir(work_dir: &Path, resource_id: ResourceId) -> PathBuf {
    work_dir.join("output").join(resource_id.to_string())
}

/// Default export file (`<work>/output/<id>/exports/presentation.<ext>`).
pub fn default_export_path(work_dir: &Path, resource_id: ResourceId, format: ExportFormat) -> PathBuf {
    default_output_dir(work_dir, resource_id)
        .join("exports")
        .join(format!("presentation.{}", format.extension()))
}

/// Unique scratch directory for one build generation.
pub fn scratch_build_dir(work_dir: &Path, resource_id: ResourceId) -> PathBuf {
    let millis = chrono::Utc::now().timestamp_millis();
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    work_dir
        .join(".slidev-temp-build")
        .join(format!("{}-{}-{}", resource_id, millis, &nonce[..8]))
}

/// Default URL base the built site is served from.
pub fn default_build_base(resource_id: ResourceId) -> String {
    format!("/api/build/{}/", resource_id)
}
