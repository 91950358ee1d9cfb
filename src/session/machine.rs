//! Per-conversation session state machine
//!
//! Each conversation with traffic owns one tokio task holding the only
//! worker handle for that conversation's workspace. Dispatches are queued
//! FIFO into the task; different conversations never block one another.

use crate::channel::InboundMessage;
use crate::config::DispatchConfig;
use crate::error::{Error, Result};
use crate::ipc::{DispatchRequest, IpcBridge};
use crate::registry::Conversation;
use crate::runtime::{RuntimeSupervisor, Worker};
use crate::session::GenerationLedger;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No worker; next dispatch launches one
    Idle,
    /// Worker launching, readiness pending
    Launching,
    /// Worker live, no dispatch in flight
    Ready,
    /// Dispatch in flight
    Busy,
    /// Worker being stopped
    Draining,
    /// Worker stopped and removed; next dispatch relaunches
    Terminated,
    /// Worker exited unexpectedly; next dispatch relaunches
    Crashed,
    /// Relaunch budget exhausted; dispatches fail fast until the
    /// conversation is re-registered
    Degraded,
}

/// Result of one successful dispatch
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Agent reply text
    pub reply: String,
    /// Generation of the answering worker
    pub generation: u64,
    /// Correlation id of the resolved cycle
    pub correlation_id: String,
}

struct DispatchJob {
    conversation: Conversation,
    messages: Vec<InboundMessage>,
    context: Vec<InboundMessage>,
    reply_tx: oneshot::Sender<Result<DispatchOutcome>>,
}

struct SessionHandle {
    queue: mpsc::Sender<DispatchJob>,
    shutdown: watch::Sender<bool>,
    state: Arc<RwLock<SessionState>>,
    task: tokio::task::JoinHandle<()>,
}

/// Owns the conversation → session-task map and the dispatch entry point
pub struct SessionCoordinator {
    supervisor: Arc<RuntimeSupervisor>,
    bridge: Arc<IpcBridge>,
    config: DispatchConfig,
    ledger: Arc<GenerationLedger>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionCoordinator {
    /// Create a coordinator over the given supervisor and bridge.
    pub fn new(
        supervisor: Arc<RuntimeSupervisor>,
        bridge: Arc<IpcBridge>,
        config: DispatchConfig,
        ledger: Arc<GenerationLedger>,
    ) -> Self {
        Self {
            supervisor,
            bridge,
            config,
            ledger,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch one request/response cycle for a conversation.
    ///
    /// Queued FIFO behind any in-flight dispatch for the same conversation;
    /// independent of every other conversation.
    pub async fn dispatch(
        &self,
        conversation: &Conversation,
        messages: Vec<InboundMessage>,
        context: Vec<InboundMessage>,
    ) -> Result<DispatchOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = DispatchJob {
            conversation: conversation.clone(),
            messages,
            context,
            reply_tx,
        };

        let queue = {
            let mut sessions = self.sessions.lock().await;
            let handle = sessions
                .entry(conversation.id.clone())
                .or_insert_with(|| self.spawn_session(&conversation.id));
            handle.queue.clone()
        };

        queue.send(job).await.map_err(|_| Error::Cancelled)?;
        reply_rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Current session state (Idle when the conversation has no task yet).
    pub async fn state(&self, conversation_id: &str) -> SessionState {
        let sessions = self.sessions.lock().await;
        match sessions.get(conversation_id) {
            Some(handle) => *handle.state.read().await,
            None => SessionState::Idle,
        }
    }

    /// Latest minted generation for a conversation.
    pub fn latest_generation(&self, conversation_id: &str) -> u64 {
        self.ledger.latest(conversation_id)
    }

    /// Cancel a conversation's queued and in-flight dispatches and drain
    /// its worker. Called on deregistration.
    pub async fn deregister(&self, conversation_id: &str) {
        let handle = self.sessions.lock().await.remove(conversation_id);
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
            let _ = handle.task.await;
            tracing::info!(conversation_id, "Session deregistered");
        }
    }

    /// Drain every live session. Called on process shutdown.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, SessionHandle)> =
            self.sessions.lock().await.drain().collect();
        let drains = handles.into_iter().map(|(conversation_id, handle)| async move {
            let _ = handle.shutdown.send(true);
            let _ = handle.task.await;
            tracing::info!(conversation_id = %conversation_id, "Session drained");
        });
        futures::future::join_all(drains).await;
    }

    fn spawn_session(&self, conversation_id: &str) -> SessionHandle {
        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(RwLock::new(SessionState::Idle));

        let task = SessionTask {
            conversation_id: conversation_id.to_string(),
            supervisor: self.supervisor.clone(),
            bridge: self.bridge.clone(),
            config: self.config.clone(),
            ledger: self.ledger.clone(),
            state: state.clone(),
        };
        let task = tokio::spawn(task.run(queue_rx, shutdown_rx));

        tracing::debug!(conversation_id, "Session task started");
        SessionHandle {
            queue: queue_tx,
            shutdown: shutdown_tx,
            state,
            task,
        }
    }
}

/// The owning task for one conversation's worker
struct SessionTask {
    conversation_id: String,
    supervisor: Arc<RuntimeSupervisor>,
    bridge: Arc<IpcBridge>,
    config: DispatchConfig,
    ledger: Arc<GenerationLedger>,
    state: Arc<RwLock<SessionState>>,
}

impl SessionTask {
    async fn run(
        self,
        mut queue: mpsc::Receiver<DispatchJob>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut worker: Option<Worker> = None;
        let mut launch_failures: u32 = 0;
        let mut last_activity = tokio::time::Instant::now();
        // Separate receiver so an in-flight dispatch can observe shutdown
        // while the loop's own receiver is parked in the select.
        let mut shutdown_inflight = shutdown.clone();

        loop {
            let idle_deadline = last_activity + self.config.idle_timeout();
            tokio::select! {
                _ = shutdown.changed() => {
                    self.cancel_queued(&mut queue).await;
                    self.drain(&mut worker).await;
                    self.set_state(SessionState::Terminated).await;
                    return;
                }
                maybe_job = queue.recv() => {
                    let Some(job) = maybe_job else {
                        self.drain(&mut worker).await;
                        self.set_state(SessionState::Terminated).await;
                        return;
                    };
                    let cancelled = self
                        .serve(job, &mut worker, &mut launch_failures, &mut shutdown_inflight)
                        .await;
                    last_activity = tokio::time::Instant::now();
                    if cancelled {
                        self.cancel_queued(&mut queue).await;
                        self.drain(&mut worker).await;
                        self.set_state(SessionState::Terminated).await;
                        return;
                    }
                }
                _ = tokio::time::sleep_until(idle_deadline), if worker.is_some() => {
                    tracing::info!(
                        conversation_id = %self.conversation_id,
                        "Idle timeout, draining worker"
                    );
                    self.drain(&mut worker).await;
                    self.set_state(SessionState::Terminated).await;
                }
            }
        }
    }

    /// Serve one dispatch. Returns true when cancelled by shutdown.
    async fn serve(
        &self,
        job: DispatchJob,
        worker: &mut Option<Worker>,
        launch_failures: &mut u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let DispatchJob {
            conversation,
            messages,
            context,
            reply_tx,
        } = job;

        if *launch_failures >= self.config.max_launch_attempts {
            let _ = reply_tx.send(Err(Error::LaunchFailure(format!(
                "conversation {} is degraded after {} launch failures; re-register to reset",
                conversation.id, launch_failures
            ))));
            return false;
        }

        if worker.is_none() {
            self.set_state(SessionState::Launching).await;
            let generation = match self.ledger.mint(&conversation.id) {
                Ok(generation) => generation,
                Err(e) => {
                    self.set_state(SessionState::Idle).await;
                    let _ = reply_tx.send(Err(e));
                    return false;
                }
            };

            match self.supervisor.launch(&conversation, generation).await {
                Ok(launched) => {
                    // A fresh worker must never observe a previous
                    // generation's traffic.
                    let _ = self.bridge.discard_stale(&conversation.id, generation).await;
                    *worker = Some(launched);
                    *launch_failures = 0;
                    self.set_state(SessionState::Ready).await;
                }
                Err(e) => {
                    *launch_failures += 1;
                    if *launch_failures >= self.config.max_launch_attempts {
                        tracing::warn!(
                            conversation_id = %conversation.id,
                            failures = *launch_failures,
                            "Relaunch budget exhausted, marking conversation degraded"
                        );
                        self.set_state(SessionState::Degraded).await;
                    } else {
                        self.set_state(SessionState::Idle).await;
                    }
                    let _ = reply_tx.send(Err(e));
                    return false;
                }
            }
        }

        let Some(current) = worker.clone() else {
            let _ = reply_tx.send(Err(Error::Internal(
                "no worker available after launch".to_string(),
            )));
            return false;
        };
        self.set_state(SessionState::Busy).await;

        let request = DispatchRequest::new(
            conversation.id.clone(),
            current.generation,
            messages,
            context,
        );
        if let Err(e) = self.bridge.send(&request).await {
            self.set_state(SessionState::Ready).await;
            let _ = reply_tx.send(Err(e));
            return false;
        }

        let result = tokio::select! {
            result = self.bridge.await_response(
                &conversation.id,
                current.generation,
                &request.correlation_id,
                self.config.timeout(),
            ) => result,
            _ = shutdown.changed() => {
                let _ = reply_tx.send(Err(Error::Cancelled));
                return true;
            }
        };

        match result {
            Ok(response) => {
                self.set_state(SessionState::Ready).await;
                let outcome = match response.error {
                    Some(failure) => Err(Error::Internal(format!("worker failure: {}", failure))),
                    None => Ok(DispatchOutcome {
                        reply: response.reply.unwrap_or_default(),
                        generation: response.generation,
                        correlation_id: response.correlation_id,
                    }),
                };
                let _ = reply_tx.send(outcome);
            }
            Err(timeout @ Error::Timeout { .. }) => {
                if self.supervisor.is_running(&current).await.unwrap_or(false) {
                    // The worker may simply be slow; not assumed dead.
                    self.set_state(SessionState::Ready).await;
                    let _ = reply_tx.send(Err(timeout));
                } else {
                    tracing::warn!(
                        conversation_id = %conversation.id,
                        generation = current.generation,
                        "Worker exited while a dispatch was in flight"
                    );
                    self.set_state(SessionState::Crashed).await;
                    self.supervisor.teardown(&current).await;
                    *worker = None;
                    self.set_state(SessionState::Idle).await;
                    let _ = reply_tx.send(Err(Error::CrashExit(format!(
                        "worker {} exited unexpectedly",
                        current.name
                    ))));
                }
            }
            Err(mismatch @ Error::GenerationMismatch { .. }) => {
                // A newer generation owns the channel; this handle is stale.
                *worker = None;
                self.set_state(SessionState::Idle).await;
                let _ = reply_tx.send(Err(mismatch));
            }
            Err(e) => {
                // Transport fault: worker left as-is for the next attempt.
                self.set_state(SessionState::Ready).await;
                let _ = reply_tx.send(Err(e));
            }
        }
        false
    }

    async fn drain(&self, worker: &mut Option<Worker>) {
        if let Some(current) = worker.take() {
            self.set_state(SessionState::Draining).await;
            self.supervisor.teardown(&current).await;
        }
    }

    async fn cancel_queued(&self, queue: &mut mpsc::Receiver<DispatchJob>) {
        queue.close();
        while let Ok(job) = queue.try_recv() {
            let _ = job.reply_tx.send(Err(Error::Cancelled));
        }
    }

    async fn set_state(&self, state: SessionState) {
        *self.state.write().await = state;
    }
}
