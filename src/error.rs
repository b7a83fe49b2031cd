//! Application error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Application error carrying a classification, a human-readable message and
/// optional structured details.
#[derive(Debug)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    payload: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input
    InvalidArgument,
    /// No live instance, build output or export file
    NotFound,
    /// Requested path escapes its base directory
    PathTraversal,
    /// No free port left in the preview range
    ResourceExhausted,
    /// Worker process failed to become ready
    SpawnFailure,
    /// Build or export subprocess failed or timed out
    BuildFailure,
    /// Subprocess reported success but produced no output
    GenerationFailure,
    /// Anything unclassified
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidArgument => 1001,
            Self::NotFound => 1002,
            Self::PathTraversal => 1003,
            Self::ResourceExhausted => 2001,
            Self::SpawnFailure => 3001,
            Self::BuildFailure => 3002,
            Self::GenerationFailure => 3003,
            Self::Internal => 9999,
        }
    }

    /// HTTP status the routing layer answers with for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidArgument | Self::PathTraversal => 400,
            Self::NotFound => 404,
            Self::ResourceExhausted
            | Self::SpawnFailure
            | Self::BuildFailure
            | Self::GenerationFailure
            | Self::Internal => 500,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            payload: HashMap::new(),
        }
    }

    /// Attach a structured detail entry.
    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn path_traversal(requested: &str) -> Self {
        Self::new(
            ErrorKind::PathTraversal,
            format!("Illegal path: {requested}"),
        )
        .with_detail("path", requested)
    }

    pub fn resource_exhausted(base: u16, max: u16) -> Self {
        Self::new(ErrorKind::ResourceExhausted, "No available port")
            .with_detail("range", format!("{base}-{max}"))
    }

    pub fn spawn_failure(resource_id: u64, port: u16, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::SpawnFailure,
            format!("Preview for {resource_id} failed to start on port {port}"),
        )
        .with_detail("detail", detail)
    }

    pub fn build_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BuildFailure, message)
    }

    pub fn generation_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GenerationFailure, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn payload(&self) -> &HashMap<String, String> {
        &self.payload
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}: {}", self.kind, self.message)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {} ({})", self.kind, self.message, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 3)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("kind", &self.kind)?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_argument(format!("Invalid config file: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::internal(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_kind() {
        assert_eq!(AppError::invalid_argument("x").kind().status_code(), 400);
        assert_eq!(AppError::path_traversal("../a").kind().status_code(), 400);
        assert_eq!(AppError::not_found("x").kind().status_code(), 404);
        assert_eq!(
            AppError::resource_exhausted(5500, 5501).kind().status_code(),
            500
        );
        assert_eq!(AppError::spawn_failure(1, 5500, "t").kind().status_code(), 500);
        assert_eq!(AppError::build_failure("x").kind().status_code(), 500);
        assert_eq!(AppError::generation_failure("x").kind().status_code(), 500);
    }

    #[test]
    fn serializes_code_and_payload() {
        let err = AppError::path_traversal("../../etc/passwd");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], 1003);
        assert_eq!(value["kind"], "path_traversal");
        assert_eq!(value["payload"]["path"], "../../etc/passwd");
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err: AppError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err: AppError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
