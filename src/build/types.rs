//! Build and export request/response types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::instance::ResourceId;

/// Supported export output kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Pptx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Pptx => "pptx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "pptx" => Ok(Self::Pptx),
            other => Err(AppError::invalid_argument(format!(
                "Unsupported export format: {other}"
            ))
            .with_detail("format", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub slide_id: ResourceId,
    pub slides_path: PathBuf,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub output_dir: PathBuf,
}

/// `format` stays a raw string so unknown values are rejected by the
/// orchestrator with a proper error rather than by the JSON decoder.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub slide_id: ResourceId,
    pub slides_path: PathBuf,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub dark: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub output_file: PathBuf,
    pub format: ExportFormat,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn format_parsing_is_case_insensitive() {
        assert_eq!("PDF".parse::<ExportFormat>().unwrap(), ExportFormat::Pdf);
        assert_eq!(" pptx ".parse::<ExportFormat>().unwrap(), ExportFormat::Pptx);
        let err = "csv".parse::<ExportFormat>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn export_request_defaults() {
        let req: ExportRequest =
            serde_json::from_str(r#"{"slideId": 3, "slidesPath": "/tmp/demo/slides.md"}"#).unwrap();
        assert_eq!(req.slide_id, 3);
        assert!(req.format.is_none());
        assert!(!req.dark);
    }
}
