//! Resource id to live preview instance tracking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::types::{
    InstanceInfo, ResourceId, StartPreviewRequest, StartPreviewResult, StopPreviewResult,
};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::process::{
    graceful_shutdown, terminate, ExitNotice, Instance, LaunchSpec, Launcher, PortAllocator,
    ResolveEnv, Supervisor,
};
use crate::validation::{validate_resource_id, validate_source_path};

struct RegistryState {
    instances: HashMap<ResourceId, Instance>,
    ports: PortAllocator,
}

impl RegistryState {
    /// Remove the entry for `resource_id` if it still belongs to `pid`,
    /// releasing its port. Every removal path goes through here.
    fn remove_matching(&mut self, resource_id: ResourceId, pid: Option<u32>) -> Option<Instance> {
        let matches = self
            .instances
            .get(&resource_id)
            .is_some_and(|inst| pid.map_or(true, |pid| inst.pid == pid));
        if !matches {
            return None;
        }
        let removed = self.instances.remove(&resource_id)?;
        self.ports.release(removed.port);
        Some(removed)
    }
}

/// Single owner of preview instances and their port reservations.
///
/// Start and stop for the same resource id are serialized; different ids
/// never wait on each other beyond short map updates.
pub struct InstanceRegistry {
    state: Arc<Mutex<RegistryState>>,
    gates: Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>,
    launcher: Arc<dyn Launcher>,
    exits: mpsc::UnboundedSender<ExitNotice>,
}

impl InstanceRegistry {
    /// Must be called from within a Tokio runtime: spawns the exit listener.
    pub fn new(launcher: Arc<dyn Launcher>, ports: PortAllocator) -> Self {
        let state = Arc::new(Mutex::new(RegistryState {
            instances: HashMap::new(),
            ports,
        }));
        let (exits, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_exit_listener(Arc::clone(&state), rx));

        Self {
            state,
            gates: Mutex::new(HashMap::new()),
            launcher,
            exits,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let supervisor = Supervisor::new(ResolveEnv {
            override_path: config.slidev_cli_path.clone(),
            work_dir: config.work_dir(),
        });
        Self::new(
            Arc::new(supervisor),
            PortAllocator::new(config.preview.base_port, config.preview.max_port),
        )
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn gate(&self, resource_id: ResourceId) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(gates.entry(resource_id).or_default())
    }

    /// Drop the gate for `resource_id` once no other caller holds it and no
    /// instance is registered. Call after the gate's guard is released.
    fn release_gate(&self, resource_id: ResourceId, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        // One count for the map, one for `gate`.
        if Arc::strong_count(&gate) <= 2
            && !self.lock_state().instances.contains_key(&resource_id)
        {
            gates.remove(&resource_id);
        }
    }

    /// Probe candidate ports without holding the state lock, then reserve
    /// the first bindable one that is still free.
    async fn reserve_port(&self, preferred: Option<u16>) -> Result<u16> {
        let (candidates, probe) = {
            let state = self.lock_state();
            (state.ports.candidates(preferred), state.ports.probe())
        };
        let state = Arc::clone(&self.state);
        let picked = tokio::task::spawn_blocking(move || {
            candidates.into_iter().find(|&port| {
                probe(port)
                    && state
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .ports
                        .try_reserve(port)
            })
        })
        .await
        .map_err(|e| AppError::internal(format!("Port scan failed: {e}")))?;

        match picked {
            Some(port) => {
                if preferred.is_some_and(|p| p != 0 && p != port) {
                    log::debug!("Preferred port {:?} unavailable, using {}", preferred, port);
                }
                Ok(port)
            }
            None => Err(self.lock_state().ports.exhausted()),
        }
    }

    /// Start a preview, or report the one already running.
    pub async fn start_preview(&self, req: StartPreviewRequest) -> Result<StartPreviewResult> {
        validate_resource_id(req.slide_id)?;
        validate_source_path(&req.slides_path, "slidesPath")?;

        let resource_id = req.slide_id;
        let gate = self.gate(resource_id);
        let result = {
            let _serialized = gate.lock().await;
            self.start_serialized(req).await
        };
        self.release_gate(resource_id, gate);
        result
    }

    async fn start_serialized(&self, req: StartPreviewRequest) -> Result<StartPreviewResult> {
        let resource_id = req.slide_id;
        let existing = self.lock_state().instances.get(&resource_id).cloned();
        if let Some(instance) = existing {
            if instance.is_alive() {
                return Ok(StartPreviewResult {
                    port: instance.port,
                    already_running: true,
                });
            }
            log::info!(
                "Evicting dead preview {} (pid: {}, port: {})",
                resource_id,
                instance.pid,
                instance.port
            );
            self.lock_state()
                .remove_matching(resource_id, Some(instance.pid));
        }

        let port = self.reserve_port(req.port).await?;
        let spec = LaunchSpec {
            resource_id,
            source_path: req.slides_path,
            port,
            remote: req.remote,
        };

        let instance = match self.launcher.launch(spec, self.exits.clone()).await {
            Ok(instance) => instance,
            Err(e) => {
                self.lock_state().ports.release(port);
                return Err(e);
            }
        };

        let mut state = self.lock_state();
        // An exit notice that raced ahead of this insert was ignored.
        if instance.has_exited() {
            state.ports.release(port);
            drop(state);
            return Err(AppError::spawn_failure(
                resource_id,
                port,
                "Worker exited right after becoming ready",
            ));
        }
        state.instances.insert(resource_id, instance);
        drop(state);

        Ok(StartPreviewResult {
            port,
            already_running: false,
        })
    }

    /// Stop a preview. Stopping an unknown id succeeds.
    pub async fn stop_preview(&self, resource_id: ResourceId) -> Result<StopPreviewResult> {
        validate_resource_id(resource_id)?;

        let gate = self.gate(resource_id);
        {
            let _serialized = gate.lock().await;
            let removed = self.lock_state().remove_matching(resource_id, None);
            if let Some(instance) = removed {
                log::info!(
                    "Stopping preview {} (pid: {}, port: {})",
                    resource_id,
                    instance.pid,
                    instance.port
                );
                terminate(instance.pid);
            }
        }
        self.release_gate(resource_id, gate);

        Ok(StopPreviewResult { success: true })
    }

    /// Snapshot of live instances, in map order.
    pub fn list(&self) -> Vec<InstanceInfo> {
        self.lock_state()
            .instances
            .values()
            .map(|inst| InstanceInfo {
                slide_id: inst.resource_id,
                port: inst.port,
                pid: inst.pid,
                started_at: inst.started_at.timestamp_millis(),
            })
            .collect()
    }

    pub fn port_of(&self, resource_id: ResourceId) -> Option<u16> {
        self.lock_state()
            .instances
            .get(&resource_id)
            .map(|inst| inst.port)
    }

    pub fn reserved_port_count(&self) -> usize {
        self.lock_state().ports.reserved_count()
    }

    /// Terminate every instance and forget all state. Individual failures are
    /// logged and do not stop the loop.
    pub async fn shutdown_all(&self) {
        let entries: Vec<Instance> = {
            let mut state = self.lock_state();
            state.ports.clear();
            state.instances.drain().map(|(_, inst)| inst).collect()
        };
        self.gates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        if entries.is_empty() {
            return;
        }
        for inst in &entries {
            log::info!(
                "Stopping preview {} (pid: {}, port: {})",
                inst.resource_id,
                inst.pid,
                inst.port
            );
        }

        let pids: Vec<u32> = entries.iter().map(|inst| inst.pid).collect();
        if let Err(e) = tokio::task::spawn_blocking(move || graceful_shutdown(&pids)).await {
            log::error!("Failed to wait for preview shutdown: {}", e);
        }
    }
}

async fn run_exit_listener(
    state: Arc<Mutex<RegistryState>>,
    mut rx: mpsc::UnboundedReceiver<ExitNotice>,
) {
    while let Some(notice) = rx.recv().await {
        let removed = state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove_matching(notice.resource_id, Some(notice.pid));
        if let Some(instance) = removed {
            log::info!(
                "Preview {} exited on its own, released port {}",
                instance.resource_id,
                instance.port
            );
        }
    }
}
