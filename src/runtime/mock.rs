//! In-process mock runtime
//!
//! Stands in for the container runtime in tests: launched "containers" are
//! tokio tasks that publish the ready marker and answer request envelopes by
//! echoing, so the whole dispatch path can be exercised without docker.

use crate::error::{Error, Result};
use crate::ipc::{DispatchResponse, IpcBridge};
use crate::runtime::{ContainerRuntime, LaunchSpec, WorkerRecord, WorkerState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct MockContainer {
    name: String,
    running: bool,
    worker: Option<JoinHandle<()>>,
}

/// Mock container runtime with scriptable worker behavior
pub struct MockRuntime {
    bridge: Arc<IpcBridge>,
    containers: Mutex<HashMap<String, MockContainer>>,
    next_id: AtomicU64,
    auto_ready: Mutex<bool>,
    respond: Mutex<bool>,
    exit_on_launch: Mutex<bool>,
    fail_run: Mutex<bool>,
    reply_delays: Arc<Mutex<HashMap<String, Duration>>>,
    last_spec: Mutex<Option<LaunchSpec>>,
}

impl MockRuntime {
    pub fn new(bridge: Arc<IpcBridge>) -> Self {
        Self {
            bridge,
            containers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            auto_ready: Mutex::new(true),
            respond: Mutex::new(true),
            exit_on_launch: Mutex::new(false),
            fail_run: Mutex::new(false),
            reply_delays: Arc::new(Mutex::new(HashMap::new())),
            last_spec: Mutex::new(None),
        }
    }

    /// Whether launched workers publish their ready marker.
    pub async fn set_auto_ready(&self, value: bool) {
        *self.auto_ready.lock().await = value;
    }

    /// Whether launched workers answer request envelopes.
    pub async fn set_respond(&self, value: bool) {
        *self.respond.lock().await = value;
    }

    /// Launched containers exit immediately (before readiness).
    pub async fn set_exit_on_launch(&self, value: bool) {
        *self.exit_on_launch.lock().await = value;
    }

    /// `run` calls fail outright.
    pub async fn set_fail_run(&self, value: bool) {
        *self.fail_run.lock().await = value;
    }

    /// Delay before a conversation's worker answers.
    pub async fn set_reply_delay(&self, conversation_id: &str, delay: Duration) {
        self.reply_delays
            .lock()
            .await
            .insert(conversation_id.to_string(), delay);
    }

    /// Pre-seed a container, as if left over from a previous process.
    pub async fn seed(&self, name: &str, running: bool) {
        self.containers.lock().await.insert(
            name.to_string(),
            MockContainer {
                name: name.to_string(),
                running,
                worker: None,
            },
        );
    }

    /// Whether a container with this id still exists.
    pub async fn exists(&self, id: &str) -> bool {
        self.containers.lock().await.contains_key(id)
    }

    /// Simulate an unexpected worker exit.
    pub async fn kill(&self, id: &str) {
        let mut containers = self.containers.lock().await;
        if let Some(container) = containers.get_mut(id) {
            container.running = false;
            if let Some(worker) = container.worker.take() {
                worker.abort();
            }
        }
    }

    /// The most recent launch spec passed to `run`.
    pub async fn last_spec(&self) -> Option<LaunchSpec> {
        self.last_spec.lock().await.clone()
    }

    fn spec_env(spec: &LaunchSpec, key: &str) -> Option<String> {
        spec.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn spawn_worker(
        bridge: Arc<IpcBridge>,
        reply_delays: Arc<Mutex<HashMap<String, Duration>>>,
        conversation_id: String,
        generation: u64,
        respond: bool,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if bridge
                .publish_ready(&conversation_id, generation)
                .await
                .is_err()
            {
                return;
            }
            if !respond {
                return;
            }
            loop {
                match bridge.next_request(&conversation_id).await {
                    Ok(Some(request)) if request.generation == generation => {
                        let delay = reply_delays
                            .lock()
                            .await
                            .get(&conversation_id)
                            .copied()
                            .unwrap_or(Duration::ZERO);
                        tokio::time::sleep(delay).await;

                        let content = request
                            .messages
                            .last()
                            .map(|m| m.content.clone())
                            .unwrap_or_default();
                        let response = DispatchResponse {
                            correlation_id: request.correlation_id,
                            conversation_id: conversation_id.clone(),
                            generation,
                            reply: Some(format!("echo: {}", content)),
                            error: None,
                            completed_at: chrono::Utc::now().timestamp_millis(),
                        };
                        let _ = bridge.publish_response(&response).await;
                    }
                    _ => tokio::time::sleep(Duration::from_millis(5)).await,
                }
            }
        })
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list(&self, name_prefix: &str) -> Result<Vec<WorkerRecord>> {
        let containers = self.containers.lock().await;
        let mut records: Vec<WorkerRecord> = containers
            .iter()
            .filter(|(_, c)| c.name.starts_with(name_prefix))
            .map(|(id, c)| WorkerRecord {
                id: id.clone(),
                name: c.name.clone(),
                state: if c.running {
                    WorkerState::Running
                } else {
                    WorkerState::Stopped
                },
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn run(&self, spec: &LaunchSpec) -> Result<String> {
        if *self.fail_run.lock().await {
            return Err(Error::LaunchFailure("mock run failure".to_string()));
        }
        *self.last_spec.lock().await = Some(spec.clone());

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let exited = *self.exit_on_launch.lock().await;

        let worker = if !exited && *self.auto_ready.lock().await {
            let conversation_id = Self::spec_env(spec, "BURROW_CONVERSATION")
                .ok_or_else(|| Error::Internal("mock: missing conversation env".to_string()))?;
            let generation = Self::spec_env(spec, "BURROW_GENERATION")
                .and_then(|g| g.parse().ok())
                .ok_or_else(|| Error::Internal("mock: missing generation env".to_string()))?;
            Some(Self::spawn_worker(
                self.bridge.clone(),
                self.reply_delays.clone(),
                conversation_id,
                generation,
                *self.respond.lock().await,
            ))
        } else {
            None
        };

        self.containers.lock().await.insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                running: !exited,
                worker,
            },
        );
        Ok(id)
    }

    async fn stop(&self, ids: &[String]) -> Result<()> {
        let mut containers = self.containers.lock().await;
        for id in ids {
            if let Some(container) = containers.get_mut(id) {
                container.running = false;
                if let Some(worker) = container.worker.take() {
                    worker.abort();
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<()> {
        let mut containers = self.containers.lock().await;
        for id in ids {
            if let Some(container) = containers.remove(id) {
                if let Some(worker) = container.worker {
                    worker.abort();
                }
            }
        }
        Ok(())
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        Ok(self
            .containers
            .lock()
            .await
            .get(id)
            .map(|c| c.running)
            .unwrap_or(false))
    }
}
