use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Environment variable naming an optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "SLIDEV_BACKEND_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub screenshot: ScreenshotConfig,
    /// Explicit path to the slidev executable.
    #[serde(default)]
    pub slidev_cli_path: Option<PathBuf>,
    /// Root for default output, export and scratch locations.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_max_port")]
    pub max_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_build_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotConfig {
    #[serde(default = "default_screenshot_width")]
    pub width: u32,
    #[serde(default = "default_screenshot_height")]
    pub height: u32,
    #[serde(default)]
    pub browser_path: Option<PathBuf>,
}

fn default_server_port() -> u16 {
    5310
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_base_port() -> u16 {
    5500
}

fn default_max_port() -> u16 {
    6500
}

fn default_build_timeout_ms() -> u64 {
    120_000
}

fn default_screenshot_width() -> u32 {
    1280
}

fn default_screenshot_height() -> u32 {
    720
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            bind_addr: default_bind_addr(),
            preview: PreviewConfig::default(),
            build: BuildConfig::default(),
            screenshot: ScreenshotConfig::default(),
            slidev_cli_path: None,
            work_dir: None,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            max_port: default_max_port(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_build_timeout_ms(),
        }
    }
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            width: default_screenshot_width(),
            height: default_screenshot_height(),
            browser_path: None,
        }
    }
}

impl AppConfig {
    /// Effective working directory, falling back to the process cwd.
    pub fn work_dir(&self) -> PathBuf {
        match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.build.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.preview.base_port == 0 || self.preview.max_port == 0 {
            return Err(AppError::invalid_argument("Preview ports must be non-zero"));
        }
        if self.preview.base_port > self.preview.max_port {
            return Err(AppError::invalid_argument(format!(
                "Preview port range is empty: {}-{}",
                self.preview.base_port, self.preview.max_port
            )));
        }
        if self.build.timeout_ms == 0 {
            return Err(AppError::invalid_argument("Build timeout must be non-zero"));
        }
        Ok(())
    }

    /// Apply overrides from a variable lookup. Values that fail to parse keep
    /// the current setting.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "PORT", &mut self.server_port);
        if let Some(addr) = lookup("BIND_ADDR").filter(|v| !v.trim().is_empty()) {
            self.bind_addr = addr.trim().to_string();
        }
        override_parsed(&lookup, "PREVIEW_BASE_PORT", &mut self.preview.base_port);
        override_parsed(&lookup, "PREVIEW_MAX_PORT", &mut self.preview.max_port);
        override_parsed(&lookup, "SLIDEV_BUILD_TIMEOUT", &mut self.build.timeout_ms);
        override_parsed(&lookup, "SCREENSHOT_WIDTH", &mut self.screenshot.width);
        override_parsed(&lookup, "SCREENSHOT_HEIGHT", &mut self.screenshot.height);
        override_path(&lookup, "SLIDEV_CLI_PATH", &mut self.slidev_cli_path);
        override_path(&lookup, "SCREENSHOT_BROWSER", &mut self.screenshot.browser_path);
        override_path(&lookup, "SLIDEV_WORK_DIR", &mut self.work_dir);
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("Ignoring unparseable {}={:?}", key, raw),
        }
    }
}

fn override_path<F>(lookup: &F, key: &str, target: &mut Option<PathBuf>)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key).filter(|v| !v.trim().is_empty()) {
        *target = Some(PathBuf::from(raw.trim()));
    }
}

fn load_config_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::invalid_argument(format!("Failed to read config file: {e}")))?;
    Ok(toml::from_str(&content)?)
}

/// Load configuration: `.env`, then the optional TOML file, then environment
/// overrides.
pub fn load_config() -> Result<AppConfig> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            log::warn!("Failed to load .env: {e}");
        }
    }

    let mut config = match std::env::var_os(CONFIG_FILE_ENV) {
        Some(path) => load_config_file(Path::new(&path))?,
        None => AppConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
