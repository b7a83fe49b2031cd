//! One-shot `slidev build` / `slidev export` runs.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use walkdir::WalkDir;

use super::types::{BuildRequest, BuildResult, ExportFormat, ExportRequest, ExportResult};
use crate::artifact::ArtifactLocator;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::instance::ResourceId;
use crate::paths::{default_build_base, default_export_path, default_output_dir, scratch_build_dir};
use crate::process::{force_kill, resolve_worker_command, ResolveEnv};
use crate::validation::{validate_absolute_path, validate_resource_id, validate_source_path};

/// Keep error details readable when the tool dumps a lot of output.
const MAX_STDERR_DETAIL: usize = 2000;

pub struct Orchestrator {
    env: ResolveEnv,
    timeout: Duration,
    locator: Arc<ArtifactLocator>,
}

impl Orchestrator {
    pub fn new(env: ResolveEnv, timeout: Duration, locator: Arc<ArtifactLocator>) -> Self {
        Self {
            env,
            timeout,
            locator,
        }
    }

    pub fn from_config(config: &AppConfig, locator: Arc<ArtifactLocator>) -> Self {
        Self::new(
            ResolveEnv {
                override_path: config.slidev_cli_path.clone(),
                work_dir: config.work_dir(),
            },
            config.build_timeout(),
            locator,
        )
    }

    /// Build the site into a scratch directory, then swap it into place.
    pub async fn build_project(&self, req: BuildRequest) -> Result<BuildResult> {
        validate_resource_id(req.slide_id)?;
        validate_source_path(&req.slides_path, "slidesPath")?;
        if let Some(dir) = &req.output_dir {
            validate_absolute_path(dir, "outputDir")?;
        }
        if let Some(dir) = &req.temp_dir {
            validate_absolute_path(dir, "tempDir")?;
        }

        let resource_id = req.slide_id;
        let work_dir = self.locator.work_dir();
        let base = req
            .base
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| default_build_base(resource_id));
        let owns_scratch = req.temp_dir.is_none();
        let scratch = req
            .temp_dir
            .unwrap_or_else(|| scratch_build_dir(work_dir, resource_id));
        if let Some(parent) = scratch.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let command = resolve_worker_command(&self.env);
        let args = command.args_with([
            OsString::from("build"),
            req.slides_path.clone().into_os_string(),
            "--base".into(),
            base.into(),
            "--out".into(),
            scratch.clone().into_os_string(),
        ]);

        let ran = self
            .run_tool("build", resource_id, &command.program, args, &req.slides_path)
            .await;
        if let Err(e) = ran {
            if owns_scratch {
                discard_dir(&scratch).await;
            }
            return Err(e);
        }
        if !scratch.is_dir() {
            return Err(AppError::build_failure(
                "slidev build reported success but produced no output",
            ));
        }

        let output_dir = req
            .output_dir
            .unwrap_or_else(|| default_output_dir(work_dir, resource_id));
        if let Err(e) = replace_dir(&scratch, &output_dir).await {
            log::error!(
                "Failed to publish build for {} to {}: {}",
                resource_id,
                output_dir.display(),
                e
            );
            if owns_scratch {
                discard_dir(&scratch).await;
            }
            return Err(e);
        }
        self.locator.record_build(resource_id, output_dir.clone());

        log::info!(
            "Build for {} published to {}",
            resource_id,
            output_dir.display()
        );
        Ok(BuildResult { output_dir })
    }

    /// Export to a single file and verify it was actually written.
    pub async fn export_presentation(&self, req: ExportRequest) -> Result<ExportResult> {
        validate_resource_id(req.slide_id)?;
        let format: ExportFormat = req.format.as_deref().unwrap_or("pdf").parse()?;
        validate_source_path(&req.slides_path, "slidesPath")?;
        if let Some(file) = &req.output_file {
            validate_absolute_path(file, "outputFile")?;
        }

        let resource_id = req.slide_id;
        let output_file = req.output_file.unwrap_or_else(|| {
            default_export_path(self.locator.work_dir(), resource_id, format)
        });
        if let Some(parent) = output_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::symlink_metadata(&output_file).await.is_ok() {
            tokio::fs::remove_file(&output_file).await?;
        }

        let command = resolve_worker_command(&self.env);
        let mut tail: Vec<OsString> = vec![
            "export".into(),
            req.slides_path.clone().into_os_string(),
            "--format".into(),
            format.extension().into(),
            "--output".into(),
            output_file.clone().into_os_string(),
        ];
        if req.dark {
            tail.push("--dark".into());
        }
        let args = command.args_with(tail);

        self.run_tool("export", resource_id, &command.program, args, &req.slides_path)
            .await?;

        if !output_file.is_file() {
            log::error!(
                "slidev export for {} exited cleanly but wrote nothing",
                resource_id
            );
            return Err(AppError::generation_failure(format!(
                "Export file was not generated ({format})"
            )));
        }

        self.locator
            .record_export(resource_id, format, output_file.clone());
        Ok(ExportResult {
            output_file,
            format,
        })
    }

    async fn run_tool(
        &self,
        action: &str,
        resource_id: ResourceId,
        program: &OsString,
        args: Vec<OsString>,
        source: &Path,
    ) -> Result<()> {
        let cwd = source.parent().unwrap_or_else(|| Path::new("."));
        log::info!(
            "Running slidev {} for {}: {:?} {:?}",
            action,
            resource_id,
            program,
            args
        );

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| {
            log::error!("Failed to run slidev {} for {}: {}", action, resource_id, e);
            AppError::build_failure(format!("Failed to run slidev {action}: {e}"))
        })?;
        let pid = child.id();

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                log::error!("slidev {} for {} failed: {}", action, resource_id, e);
                return Err(AppError::build_failure(format!(
                    "slidev {action} failed: {e}"
                )));
            }
            Err(_) => {
                log::error!(
                    "slidev {} for {} timed out after {:?}",
                    action,
                    resource_id,
                    self.timeout
                );
                if let Some(pid) = pid {
                    if let Err(e) = force_kill(pid) {
                        log::warn!("Failed to kill timed-out slidev {}: {}", action, e);
                    }
                }
                return Err(AppError::build_failure(format!(
                    "slidev {action} timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            log::debug!("[slidev {} {} stdout] {}", action, resource_id, stdout.trim());
        }
        if !stderr.trim().is_empty() {
            log::warn!("[slidev {} {} stderr] {}", action, resource_id, stderr.trim());
        }

        if !output.status.success() {
            log::error!(
                "slidev {} for {} exited with {}",
                action,
                resource_id,
                output.status
            );
            return Err(AppError::build_failure(format!(
                "slidev {action} exited with {}",
                output.status
            ))
            .with_detail("stderr", stderr_tail(&stderr)));
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= MAX_STDERR_DETAIL {
        return trimmed.to_string();
    }
    let mut cut = trimmed.len() - MAX_STDERR_DETAIL;
    while !trimmed.is_char_boundary(cut) {
        cut += 1;
    }
    trimmed[cut..].to_string()
}

async fn discard_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            log::warn!("Failed to remove scratch dir {}: {}", dir.display(), e);
        }
    }
}

/// Replace `dest` with `src`: remove any previous output, then move.
async fn replace_dir(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::symlink_metadata(dest).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(dest).await?,
        Ok(_) => tokio::fs::remove_file(dest).await?,
        Err(_) => {}
    }

    if let Err(e) = tokio::fs::rename(src, dest).await {
        // Different filesystems: fall back to copy + delete.
        log::debug!("rename failed ({}), copying build output instead", e);
        let (from, to) = (src.to_path_buf(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .map_err(|e| AppError::internal(format!("Copy task failed: {e}")))??;
        discard_dir(src).await;
    }
    Ok(())
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::internal(e.to_string()))?;
        let target: PathBuf = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
