//! Preview request and response types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Caller-supplied identity of one presentation.
pub type ResourceId = u64;

fn default_remote() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPreviewRequest {
    pub slide_id: ResourceId,
    pub slides_path: PathBuf,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_remote")]
    pub remote: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPreviewResult {
    pub port: u16,
    pub already_running: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPreviewRequest {
    pub slide_id: ResourceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopPreviewResult {
    pub success: bool,
}

/// Snapshot of one live preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub slide_id: ResourceId,
    pub port: u16,
    pub pid: u32,
    /// Milliseconds since the Unix epoch.
    pub started_at: i64,
}
