//! Worker process management: ports, OS-level control, executable resolution
//! and supervision.

mod control;
mod port;
mod resolver;
mod supervisor;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::instance::ResourceId;

pub use control::{
    force_kill, graceful_shutdown, is_process_alive, port_is_bindable, terminate, wait_for_port,
};
pub use port::PortAllocator;
pub use resolver::{resolve_worker_command, ResolveEnv, WorkerCommand};
#[cfg(test)]
pub(crate) use supervisor::watch_exit;
pub use supervisor::Supervisor;

/// How long a freshly spawned worker gets to start accepting connections.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for graceful shutdown before force killing.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Prompt printed by npx/slidev when it offers an on-demand install.
pub const INSTALL_PROMPT: &str = "do you want to install it now";

/// Sent by a supervising task when its worker exits, whoever caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitNotice {
    pub resource_id: ResourceId,
    pub pid: u32,
}

/// Everything needed to launch one preview worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub resource_id: ResourceId,
    pub source_path: PathBuf,
    pub port: u16,
    pub remote: bool,
}

/// One live supervised worker.
#[derive(Debug, Clone)]
pub struct Instance {
    pub resource_id: ResourceId,
    pub port: u16,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    /// Set by the exit watcher once `wait()` returns.
    pub(crate) exited: Arc<AtomicBool>,
}

impl Instance {
    pub(crate) fn new(resource_id: ResourceId, port: u16, pid: u32, exited: Arc<AtomicBool>) -> Self {
        Self {
            resource_id,
            port,
            pid,
            started_at: Utc::now(),
            exited,
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Non-destructive liveness check.
    pub fn is_alive(&self) -> bool {
        !self.has_exited() && is_process_alive(self.pid)
    }
}

/// Starts a worker and returns once it is ready to serve.
///
/// Implementations must arrange for an [`ExitNotice`] to be sent on `exits`
/// when the worker terminates.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(
        &self,
        spec: LaunchSpec,
        exits: mpsc::UnboundedSender<ExitNotice>,
    ) -> Result<Instance>;
}
