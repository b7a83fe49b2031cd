//! Build and export orchestration.

mod orchestrator;
mod types;

pub use orchestrator::Orchestrator;
pub use types::{BuildRequest, BuildResult, ExportFormat, ExportRequest, ExportResult};
