//! Runtime supervisor
//!
//! Owns worker existence underneath the session layer: the startup orphan
//! sweep, launch with readiness probing, and idempotent stop/remove. The
//! sweep is the only code path allowed to touch a previous generation's
//! worker, and it always stops before removing.

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::ipc::IpcBridge;
use crate::registry::{Conversation, MountMode};
use crate::runtime::{BindMount, ContainerRuntime, LaunchSpec, WorkerState};
use std::path::PathBuf;
use std::sync::Arc;

/// Workspace mount point inside the worker
const WORKSPACE_MOUNT: &str = "/workspace";

/// IPC mount point inside the worker
const IPC_MOUNT: &str = "/ipc";

/// A live worker handle
#[derive(Debug, Clone)]
pub struct Worker {
    /// Runtime container id
    pub id: String,
    /// Container name (prefix + conversation slug + generation)
    pub name: String,
    /// Owning conversation address
    pub conversation_id: String,
    /// Generation token minted at launch
    pub generation: u64,
    /// Launch timestamp, milliseconds since the UNIX epoch
    pub launched_at: i64,
}

/// Outcome of an orphan sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrphanSweep {
    /// Running orphans that were stopped
    pub stopped: usize,
    /// Orphans removed (running and stopped)
    pub removed: usize,
}

/// Lists, launches, stops and removes worker containers
pub struct RuntimeSupervisor {
    runtime: Arc<dyn ContainerRuntime>,
    bridge: Arc<IpcBridge>,
    config: RuntimeConfig,
}

impl RuntimeSupervisor {
    /// Create a supervisor over the given control surface.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        bridge: Arc<IpcBridge>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            runtime,
            bridge,
            config,
        }
    }

    /// Name prefix marking containers owned by this dispatcher.
    pub fn owner_prefix(&self) -> String {
        format!("{}-", self.config.worker_prefix)
    }

    /// Container name for a conversation's worker at a generation.
    pub fn worker_name(&self, conversation_id: &str, generation: u64) -> String {
        format!(
            "{}-{}-g{}",
            self.config.worker_prefix,
            crate::slug(conversation_id),
            generation
        )
    }

    /// List all owned workers via the structured control surface.
    pub async fn list_workers(&self) -> Result<Vec<crate::runtime::WorkerRecord>> {
        self.runtime.list(&self.owner_prefix()).await
    }

    /// Reclaim every owned worker left over from a previous supervisor
    /// generation: stop the running ones, then remove all of them.
    ///
    /// Idempotent; zero matches is a no-op. Must run to completion before
    /// any new worker is launched.
    pub async fn reclaim_orphans(&self) -> Result<OrphanSweep> {
        let records = self.list_workers().await?;
        if records.is_empty() {
            tracing::info!("Orphan sweep: no owned workers found");
            return Ok(OrphanSweep::default());
        }

        let running: Vec<String> = records
            .iter()
            .filter(|r| r.state == WorkerState::Running)
            .map(|r| r.id.clone())
            .collect();
        let all: Vec<String> = records.iter().map(|r| r.id.clone()).collect();

        tracing::warn!(
            total = all.len(),
            running = running.len(),
            "Orphan sweep: reclaiming workers from a previous generation"
        );

        self.runtime.stop(&running).await?;
        self.runtime.remove(&all).await?;

        Ok(OrphanSweep {
            stopped: running.len(),
            removed: all.len(),
        })
    }

    /// Launch a worker for a conversation at the given generation.
    ///
    /// Returns once the worker's IPC channel is observably ready, or fails
    /// with `LaunchFailure` after the configured probe budget; a
    /// half-launched container is torn down before returning the error.
    pub async fn launch(&self, conversation: &Conversation, generation: u64) -> Result<Worker> {
        let ipc_dir = self.bridge.prepare(&conversation.id).await?;
        std::fs::create_dir_all(&conversation.workspace)?;

        let spec = self.launch_spec(conversation, generation, ipc_dir);
        tracing::info!(
            conversation_id = %conversation.id,
            generation,
            name = %spec.name,
            image = %spec.image,
            "Launching worker"
        );

        let id = self.runtime.run(&spec).await?;
        let worker = Worker {
            id,
            name: spec.name,
            conversation_id: conversation.id.clone(),
            generation,
            launched_at: chrono::Utc::now().timestamp_millis(),
        };

        for _ in 0..self.config.readiness_probes {
            if self.bridge.worker_ready(&conversation.id, generation).await {
                tracing::info!(
                    conversation_id = %conversation.id,
                    generation,
                    "Worker ready"
                );
                return Ok(worker);
            }
            if !self.runtime.is_running(&worker.id).await? {
                self.teardown(&worker).await;
                return Err(Error::LaunchFailure(format!(
                    "worker {} exited before becoming ready",
                    worker.name
                )));
            }
            tokio::time::sleep(self.config.readiness_interval()).await;
        }

        self.teardown(&worker).await;
        Err(Error::LaunchFailure(format!(
            "worker {} not ready after {} probes",
            worker.name, self.config.readiness_probes
        )))
    }

    /// Stop a worker; already-stopped workers succeed silently.
    pub async fn stop(&self, worker: &Worker) -> Result<()> {
        self.runtime.stop(std::slice::from_ref(&worker.id)).await
    }

    /// Remove a worker; already-removed workers succeed silently.
    pub async fn remove(&self, worker: &Worker) -> Result<()> {
        self.runtime.remove(std::slice::from_ref(&worker.id)).await
    }

    /// Whether a worker's container is still running.
    pub async fn is_running(&self, worker: &Worker) -> Result<bool> {
        self.runtime.is_running(&worker.id).await
    }

    /// Stop-then-remove, logging rather than failing. Used on error paths
    /// and drains where the worker is already being discarded.
    pub async fn teardown(&self, worker: &Worker) {
        if let Err(e) = self.stop(worker).await {
            tracing::warn!(name = %worker.name, "Failed to stop worker: {}", e);
        }
        if let Err(e) = self.remove(worker).await {
            tracing::warn!(name = %worker.name, "Failed to remove worker: {}", e);
        }
    }

    fn launch_spec(
        &self,
        conversation: &Conversation,
        generation: u64,
        ipc_dir: PathBuf,
    ) -> LaunchSpec {
        let mut mounts = vec![
            BindMount {
                host_path: conversation.workspace.clone(),
                container_path: PathBuf::from(WORKSPACE_MOUNT),
                read_only: false,
            },
            BindMount {
                host_path: ipc_dir,
                container_path: PathBuf::from(IPC_MOUNT),
                read_only: false,
            },
        ];
        for entry in &conversation.mounts {
            mounts.push(BindMount {
                host_path: entry.host_path.clone(),
                container_path: entry.host_path.clone(),
                read_only: entry.mode == MountMode::ReadOnly,
            });
        }

        LaunchSpec {
            name: self.worker_name(&conversation.id, generation),
            image: self.config.image.clone(),
            env: vec![
                ("BURROW_CONVERSATION".to_string(), conversation.id.clone()),
                ("BURROW_GENERATION".to_string(), generation.to_string()),
                ("BURROW_IPC_DIR".to_string(), IPC_MOUNT.to_string()),
                ("BURROW_WORKSPACE".to_string(), WORKSPACE_MOUNT.to_string()),
            ],
            mounts,
            memory_limit: self.config.memory_limit.clone(),
            cpu_limit: self.config.cpu_limit,
            no_network: self.config.no_network,
        }
    }
}
