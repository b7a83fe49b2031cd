//! Build and export artifacts on disk.

mod locator;
mod sandbox;

pub use locator::ArtifactLocator;
pub use sandbox::{resolve_within_base, ArtifactReader, FileEntry};
