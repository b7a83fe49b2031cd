use std::sync::Arc;

use crate::artifact::{ArtifactLocator, ArtifactReader};
use crate::build::Orchestrator;
use crate::capture::ScreenshotCapturer;
use crate::config::AppConfig;
use crate::instance::InstanceRegistry;

/// Everything the HTTP handlers share.
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<InstanceRegistry>,
    pub orchestrator: Orchestrator,
    pub capturer: ScreenshotCapturer,
    pub reader: ArtifactReader,
    pub locator: Arc<ArtifactLocator>,
}

impl AppState {
    /// Must be called from within a Tokio runtime.
    pub fn new(config: AppConfig) -> Self {
        let locator = Arc::new(ArtifactLocator::new(config.work_dir()));
        let registry = Arc::new(InstanceRegistry::from_config(&config));
        Self {
            orchestrator: Orchestrator::from_config(&config, Arc::clone(&locator)),
            capturer: ScreenshotCapturer::new(&config, Arc::clone(&registry)),
            reader: ArtifactReader::new(Arc::clone(&locator)),
            registry,
            locator,
            config,
        }
    }

    /// Stop every preview and forget cached artifact locations.
    pub async fn shutdown(&self) {
        log::info!("Shutting down, stopping all previews");
        self.registry.shutdown_all().await;
        self.locator.clear();
    }
}
