//! Resolves resource ids to build output and export files on disk.
//!
//! The filesystem is authoritative. Cached paths are only returned while
//! they still exist; otherwise the conventional location is probed and, if
//! present, adopted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::build::ExportFormat;
use crate::instance::ResourceId;
use crate::paths::{default_export_path, default_output_dir};

pub struct ArtifactLocator {
    work_dir: PathBuf,
    builds: RwLock<HashMap<ResourceId, PathBuf>>,
    exports: RwLock<HashMap<(ResourceId, ExportFormat), PathBuf>>,
}

impl ArtifactLocator {
    pub fn new(work_dir: PathBuf) -> Self {
        Self {
            work_dir,
            builds: RwLock::new(HashMap::new()),
            exports: RwLock::new(HashMap::new()),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn record_build(&self, resource_id: ResourceId, dir: PathBuf) {
        let mut builds = self.builds.write().unwrap_or_else(|e| e.into_inner());
        builds.insert(resource_id, dir);
    }

    pub fn record_export(&self, resource_id: ResourceId, format: ExportFormat, file: PathBuf) {
        let mut exports = self.exports.write().unwrap_or_else(|e| e.into_inner());
        exports.insert((resource_id, format), file);
    }

    pub fn resolve_build_base(&self, resource_id: ResourceId) -> Option<PathBuf> {
        resolve_cached(
            &self.builds,
            resource_id,
            default_output_dir(&self.work_dir, resource_id),
        )
    }

    pub fn resolve_export_file(&self, resource_id: ResourceId, format: ExportFormat) -> Option<PathBuf> {
        resolve_cached(
            &self.exports,
            (resource_id, format),
            default_export_path(&self.work_dir, resource_id, format),
        )
    }

    pub fn clear(&self) {
        self.builds
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.exports
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

fn resolve_cached<K>(cache: &RwLock<HashMap<K, PathBuf>>, key: K, fallback: PathBuf) -> Option<PathBuf>
where
    K: std::hash::Hash + Eq,
{
    let cached = {
        let map = cache.read().unwrap_or_else(|e| e.into_inner());
        map.get(&key).cloned()
    };
    if let Some(path) = cached {
        if path.exists() {
            return Some(path);
        }
    }

    if !fallback.exists() {
        return None;
    }
    let mut map = cache.write().unwrap_or_else(|e| e.into_inner());
    map.insert(key, fallback.clone());
    Some(fallback)
}
