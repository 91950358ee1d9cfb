//! Worker container runtime
//!
//! The control surface over worker containers is abstracted behind
//! [`ContainerRuntime`]; [`DockerRuntime`] drives the docker CLI, and tests
//! use an in-process mock runtime. The [`RuntimeSupervisor`] on top owns
//! orphan reclamation, launch readiness and idempotent teardown.

mod docker;
mod supervisor;

#[cfg(test)]
pub mod mock;

pub use docker::DockerRuntime;
pub use supervisor::{OrphanSweep, RuntimeSupervisor, Worker};

use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// Coarse container state as reported by the runtime listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Container process is running
    Running,
    /// Container exists but is not running
    Stopped,
}

/// One structured record from the runtime listing
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    /// Runtime container id
    pub id: String,
    /// Container name (carries the owning prefix and generation)
    pub name: String,
    /// Coarse state
    pub state: WorkerState,
}

/// A bind mount for a worker container
#[derive(Debug, Clone)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub read_only: bool,
}

/// Everything needed to start one worker container
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Container name; embeds the owning prefix, conversation and generation
    pub name: String,
    /// Image reference
    pub image: String,
    /// Environment variables
    pub env: Vec<(String, String)>,
    /// Bind mounts (workspace, IPC directory, allowlisted paths)
    pub mounts: Vec<BindMount>,
    /// Memory limit (runtime syntax, e.g. "2g")
    pub memory_limit: Option<String>,
    /// CPU quota
    pub cpu_limit: Option<f64>,
    /// Disable networking
    pub no_network: bool,
}

/// Abstracted container-runtime control surface
///
/// Listing must come from a structured, machine-parseable mode; malformed
/// output is a `RuntimeQuery` error, never an empty result. Stop and remove
/// are idempotent.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers whose name starts with `name_prefix`.
    async fn list(&self, name_prefix: &str) -> Result<Vec<WorkerRecord>>;

    /// Start a container, returning its runtime id.
    async fn run(&self, spec: &LaunchSpec) -> Result<String>;

    /// Stop containers; stopping an already-stopped or missing container
    /// succeeds silently.
    async fn stop(&self, ids: &[String]) -> Result<()>;

    /// Remove containers; removing an already-removed container succeeds
    /// silently.
    async fn remove(&self, ids: &[String]) -> Result<()>;

    /// Whether a container is currently running. Missing containers are
    /// not running.
    async fn is_running(&self, id: &str) -> Result<bool>;
}
