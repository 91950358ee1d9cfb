//! Burrow configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main Burrow configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BurrowConfig {
    /// Container-runtime configuration
    pub runtime: RuntimeConfig,

    /// Dispatch and session-lifecycle configuration
    pub dispatch: DispatchConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

/// Container-runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Container CLI binary ("docker" or a compatible drop-in)
    pub cli: String,

    /// Worker image reference
    pub image: String,

    /// Name prefix marking containers owned by this dispatcher
    pub worker_prefix: String,

    /// Memory limit passed to the runtime (e.g. "2g"), if any
    pub memory_limit: Option<String>,

    /// CPU quota passed to the runtime, if any
    pub cpu_limit: Option<f64>,

    /// Disable networking inside workers
    pub no_network: bool,

    /// Maximum readiness probes after launch before giving up
    pub readiness_probes: u32,

    /// Interval between readiness probes in milliseconds
    pub readiness_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cli: "docker".to_string(),
            image: "ghcr.io/a3s-lab/burrow-worker:latest".to_string(),
            worker_prefix: "burrow".to_string(),
            memory_limit: Some("2g".to_string()),
            cpu_limit: Some(2.0),
            no_network: false,
            readiness_probes: 150,
            readiness_interval_ms: 200,
        }
    }
}

impl RuntimeConfig {
    /// Interval between readiness probes.
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }
}

/// Dispatch and session-lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Budget for one request/response cycle in seconds
    pub timeout_secs: u64,

    /// Poll interval for response envelopes in milliseconds
    pub poll_interval_ms: u64,

    /// Idle time before a worker is drained, in seconds
    pub idle_timeout_secs: u64,

    /// Consecutive launch failures tolerated before a conversation
    /// is marked degraded
    pub max_launch_attempts: u32,

    /// Per-conversation FIFO queue capacity
    pub queue_capacity: usize,

    /// Number of recent stored messages included as context
    pub context_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_ms: 100,
            idle_timeout_secs: 900,
            max_launch_attempts: 3,
            queue_capacity: 32,
            context_limit: 50,
        }
    }
}

impl DispatchConfig {
    /// Budget for one request/response cycle.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Poll interval for response envelopes.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Idle time before a worker is drained.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all Burrow state
    pub base_dir: PathBuf,

    /// Per-conversation workspace directories
    pub workspaces_dir: PathBuf,

    /// Per-conversation IPC directories
    pub ipc_dir: PathBuf,

    /// Registry, generation and message-store state
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs_next::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("burrow");

        Self {
            workspaces_dir: base.join("workspaces"),
            ipc_dir: base.join("ipc"),
            state_dir: base.join("state"),
            base_dir: base,
        }
    }
}

impl StorageConfig {
    /// Create all configured directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.base_dir,
            &self.workspaces_dir,
            &self.ipc_dir,
            &self.state_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
