//! Cover screenshots of a running preview via a headless browser.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::instance::{InstanceRegistry, ResourceId, StartPreviewRequest};
use crate::process::force_kill;
use crate::validation::{validate_absolute_path, validate_resource_id, validate_source_path};

#[cfg(target_os = "windows")]
const DEFAULT_BROWSER: &str = "chrome.exe";
#[cfg(not(target_os = "windows"))]
const DEFAULT_BROWSER: &str = "chromium";

/// Milliseconds of virtual time the page gets to settle before capture.
const RENDER_BUDGET_MS: u32 = 5000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRequest {
    pub slide_id: ResourceId,
    pub slides_path: PathBuf,
    pub cover_path: PathBuf,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotResult {
    pub cover_path: PathBuf,
}

pub struct ScreenshotCapturer {
    registry: Arc<InstanceRegistry>,
    browser: OsString,
    width: u32,
    height: u32,
    timeout: Duration,
}

impl ScreenshotCapturer {
    pub fn new(config: &AppConfig, registry: Arc<InstanceRegistry>) -> Self {
        let browser = config
            .screenshot
            .browser_path
            .clone()
            .map(PathBuf::into_os_string)
            .unwrap_or_else(|| OsString::from(DEFAULT_BROWSER));
        Self {
            registry,
            browser,
            width: config.screenshot.width,
            height: config.screenshot.height,
            timeout: config.build_timeout(),
        }
    }

    pub async fn capture(&self, req: ScreenshotRequest) -> Result<ScreenshotResult> {
        validate_resource_id(req.slide_id)?;
        validate_source_path(&req.slides_path, "slidesPath")?;
        validate_absolute_path(&req.cover_path, "coverPath")?;
        let width = req.width.unwrap_or(self.width);
        let height = req.height.unwrap_or(self.height);
        if width == 0 || height == 0 {
            return Err(AppError::invalid_argument("Viewport size must be non-zero"));
        }

        if let Some(parent) = req.cover_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let preview = self
            .registry
            .start_preview(StartPreviewRequest {
                slide_id: req.slide_id,
                slides_path: req.slides_path,
                port: None,
                remote: true,
            })
            .await?;

        self.shoot(req.slide_id, preview.port, &req.cover_path, width, height)
            .await?;
        Ok(ScreenshotResult {
            cover_path: req.cover_path,
        })
    }

    async fn shoot(
        &self,
        resource_id: ResourceId,
        port: u16,
        cover: &Path,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if tokio::fs::symlink_metadata(cover).await.is_ok() {
            tokio::fs::remove_file(cover).await?;
        }

        let args = browser_args(port, cover, width, height);
        log::info!(
            "Capturing cover for {} from port {} into {}",
            resource_id,
            port,
            cover.display()
        );

        let mut cmd = Command::new(&self.browser);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| {
            log::error!("Failed to launch browser for {}: {}", resource_id, e);
            AppError::generation_failure(format!("Failed to launch browser: {e}"))
        })?;
        let pid = child.id();

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AppError::generation_failure(format!(
                    "Browser failed: {e}"
                )))
            }
            Err(_) => {
                log::error!("Screenshot for {} timed out", resource_id);
                if let Some(pid) = pid {
                    if let Err(e) = force_kill(pid) {
                        log::warn!("Failed to kill timed-out browser: {}", e);
                    }
                }
                return Err(AppError::generation_failure(format!(
                    "Screenshot timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            log::debug!("[browser {} stderr] {}", resource_id, stderr.trim());
        }
        if !output.status.success() {
            log::warn!(
                "Browser for {} exited with {}",
                resource_id,
                output.status
            );
        }

        if !cover.is_file() {
            return Err(AppError::generation_failure(
                "Screenshot image was not generated",
            ));
        }
        Ok(())
    }
}

fn browser_args(port: u16, cover: &Path, width: u32, height: u32) -> Vec<OsString> {
    let mut screenshot = OsString::from("--screenshot=");
    screenshot.push(cover.as_os_str());
    vec![
        "--headless=new".into(),
        "--no-sandbox".into(),
        "--disable-gpu".into(),
        "--hide-scrollbars".into(),
        "--force-dark-mode".into(),
        "--blink-settings=preferredColorScheme=0".into(),
        format!("--virtual-time-budget={RENDER_BUDGET_MS}").into(),
        format!("--window-size={width},{height}").into(),
        screenshot,
        format!("http://localhost:{port}").into(),
    ]
}
