//! File-based request/response bridge
//!
//! One directory per conversation, bind-mounted into the worker at launch.
//! The dispatcher publishes `<correlation>.req.json`, the worker answers with
//! `<correlation>.resp.json` and signals readiness through `ready.json`.
//!
//! Generation filtering: a response carrying an older generation than the
//! conversation's current one belongs to a stale worker and is deleted
//! without delivery; a newer generation observed while waiting means a fresh
//! worker owns the channel and the in-flight call fails.

use crate::error::{Error, Result};
use crate::ipc::envelope::{
    DispatchRequest, DispatchResponse, ReadyMarker, READY_MARKER, REQUEST_SUFFIX, RESPONSE_SUFFIX,
};
use std::path::PathBuf;
use std::time::Duration;

/// Directory-based IPC bridge
pub struct IpcBridge {
    root: PathBuf,
    poll_interval: Duration,
}

impl IpcBridge {
    /// Create a bridge rooted at `root` (one subdirectory per conversation).
    pub fn new(root: PathBuf, poll_interval: Duration) -> Self {
        Self {
            root,
            poll_interval,
        }
    }

    /// IPC directory for a conversation.
    pub fn conversation_dir(&self, conversation_id: &str) -> PathBuf {
        self.root.join(crate::slug(conversation_id))
    }

    /// Create a conversation's IPC directory.
    pub async fn prepare(&self, conversation_id: &str) -> Result<PathBuf> {
        let dir = self.conversation_dir(conversation_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::ChannelWrite(format!("create IPC dir: {}", e)))?;
        Ok(dir)
    }

    /// Whether the worker for `generation` has published its ready marker.
    pub async fn worker_ready(&self, conversation_id: &str, generation: u64) -> bool {
        let path = self.conversation_dir(conversation_id).join(READY_MARKER);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<ReadyMarker>(&bytes)
                .map(|m| m.generation == generation)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Publish a request envelope, atomically from the reader's perspective.
    pub async fn send(&self, request: &DispatchRequest) -> Result<()> {
        let dir = self.prepare(&request.conversation_id).await?;
        let body = serde_json::to_vec_pretty(request)
            .map_err(|e| Error::ChannelWrite(format!("encode request: {}", e)))?;

        let tmp = dir.join(format!("{}.tmp", request.correlation_id));
        let path = dir.join(format!("{}{}", request.correlation_id, REQUEST_SUFFIX));
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| Error::ChannelWrite(format!("write request envelope: {}", e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::ChannelWrite(format!("publish request envelope: {}", e)))?;

        tracing::debug!(
            conversation_id = %request.conversation_id,
            correlation_id = %request.correlation_id,
            generation = request.generation,
            "Request envelope published"
        );
        Ok(())
    }

    /// Await the response matching `correlation_id` under the given
    /// generation.
    ///
    /// Stale-generation envelopes observed along the way are discarded.
    /// Completes with `Timeout` at or after `timeout`, never earlier.
    pub async fn await_response(
        &self,
        conversation_id: &str,
        generation: u64,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<DispatchResponse> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(response) = self
                .scan_responses(conversation_id, generation, correlation_id)
                .await?
            {
                return Ok(response);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(Error::Timeout {
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Delete every envelope whose generation is not `current_generation`.
    ///
    /// Called after a launch so a fresh worker never observes a previous
    /// generation's traffic.
    pub async fn discard_stale(
        &self,
        conversation_id: &str,
        current_generation: u64,
    ) -> Result<usize> {
        let dir = self.conversation_dir(conversation_id);
        let mut discarded = 0;

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::ChannelRead(format!("scan IPC dir: {}", e))),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::ChannelRead(format!("scan IPC dir: {}", e)))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_envelope =
                name.ends_with(REQUEST_SUFFIX) || name.ends_with(RESPONSE_SUFFIX);
            if !is_envelope {
                continue;
            }

            let stale = match tokio::fs::read(entry.path()).await {
                Ok(bytes) => serde_json::from_slice::<serde_json::Value>(&bytes)
                    .ok()
                    .and_then(|v| v.get("generation").and_then(|g| g.as_u64()))
                    .map(|g| g != current_generation)
                    .unwrap_or(true),
                Err(_) => continue,
            };
            if stale {
                let _ = tokio::fs::remove_file(entry.path()).await;
                discarded += 1;
            }
        }

        if discarded > 0 {
            tracing::debug!(
                conversation_id,
                current_generation,
                discarded,
                "Discarded stale envelopes"
            );
        }
        Ok(discarded)
    }

    /// Take the next pending request envelope, if any.
    ///
    /// Worker-side of the channel; used by in-process workers and tests.
    pub async fn next_request(&self, conversation_id: &str) -> Result<Option<DispatchRequest>> {
        let dir = self.conversation_dir(conversation_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::ChannelRead(format!("scan IPC dir: {}", e))),
        };

        let mut pending: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::ChannelRead(format!("scan IPC dir: {}", e)))?
        {
            if entry.file_name().to_string_lossy().ends_with(REQUEST_SUFFIX) {
                pending.push(entry.path());
            }
        }
        pending.sort();

        let Some(path) = pending.into_iter().next() else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::ChannelRead(format!("read request envelope: {}", e)))?;
        let request: DispatchRequest = serde_json::from_slice(&bytes)
            .map_err(|e| Error::ChannelRead(format!("decode request envelope: {}", e)))?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| Error::ChannelRead(format!("consume request envelope: {}", e)))?;
        Ok(Some(request))
    }

    /// Publish a response envelope, atomically from the reader's perspective.
    ///
    /// Worker-side of the channel; used by in-process workers and tests.
    pub async fn publish_response(&self, response: &DispatchResponse) -> Result<()> {
        let dir = self.prepare(&response.conversation_id).await?;
        let body = serde_json::to_vec_pretty(response)
            .map_err(|e| Error::ChannelWrite(format!("encode response: {}", e)))?;

        let tmp = dir.join(format!("{}.resp.tmp", response.correlation_id));
        let path = dir.join(format!("{}{}", response.correlation_id, RESPONSE_SUFFIX));
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| Error::ChannelWrite(format!("write response envelope: {}", e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::ChannelWrite(format!("publish response envelope: {}", e)))?;
        Ok(())
    }

    /// Publish the ready marker for a generation.
    ///
    /// Worker-side of the channel; used by in-process workers and tests.
    pub async fn publish_ready(&self, conversation_id: &str, generation: u64) -> Result<()> {
        let dir = self.prepare(conversation_id).await?;
        let body = serde_json::to_vec(&ReadyMarker { generation })
            .map_err(|e| Error::ChannelWrite(format!("encode ready marker: {}", e)))?;

        let tmp = dir.join("ready.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| Error::ChannelWrite(format!("write ready marker: {}", e)))?;
        tokio::fs::rename(&tmp, dir.join(READY_MARKER))
            .await
            .map_err(|e| Error::ChannelWrite(format!("publish ready marker: {}", e)))?;
        Ok(())
    }

    async fn scan_responses(
        &self,
        conversation_id: &str,
        generation: u64,
        correlation_id: &str,
    ) -> Result<Option<DispatchResponse>> {
        let dir = self.conversation_dir(conversation_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::ChannelRead(format!("scan IPC dir: {}", e))),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::ChannelRead(format!("scan IPC dir: {}", e)))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(RESPONSE_SUFFIX) {
                continue;
            }

            let bytes = tokio::fs::read(entry.path())
                .await
                .map_err(|e| Error::ChannelRead(format!("read response envelope: {}", e)))?;
            let response: DispatchResponse = serde_json::from_slice(&bytes)
                .map_err(|e| Error::ChannelRead(format!("decode response envelope: {}", e)))?;

            if response.generation < generation {
                // Stale worker's answer. Never delivered.
                tracing::debug!(
                    conversation_id,
                    stale_generation = response.generation,
                    current_generation = generation,
                    "Discarding stale response envelope"
                );
                let _ = tokio::fs::remove_file(entry.path()).await;
                continue;
            }
            if response.generation > generation {
                return Err(Error::GenerationMismatch {
                    expected: generation,
                    observed: response.generation,
                });
            }
            if response.correlation_id == correlation_id {
                tokio::fs::remove_file(entry.path())
                    .await
                    .map_err(|e| Error::ChannelRead(format!("consume response envelope: {}", e)))?;
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}
