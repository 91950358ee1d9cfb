//! Persistent message store collaborator
//!
//! The core treats the store as durable and available; failures surface as
//! [`Error::Store`](crate::Error::Store) without retry.

use crate::channel::InboundMessage;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Durable per-conversation message history
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one message to a conversation's history.
    async fn append_message(&self, conversation_id: &str, message: &InboundMessage) -> Result<()>;

    /// Load up to `limit` most recent messages, oldest first.
    async fn load_recent_context(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>>;
}

/// JSONL-file message store, one file per conversation.
pub struct JsonlMessageStore {
    dir: PathBuf,
}

impl JsonlMessageStore {
    /// Create a store rooted at `dir` (created on first append).
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn file_for(&self, conversation_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", crate::slug(conversation_id)))
    }
}

#[async_trait]
impl MessageStore for JsonlMessageStore {
    async fn append_message(&self, conversation_id: &str, message: &InboundMessage) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Store(format!("create store dir: {}", e)))?;

        let mut line = serde_json::to_string(message)
            .map_err(|e| Error::Store(format!("encode message: {}", e)))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(conversation_id))
            .await
            .map_err(|e| Error::Store(format!("open history file: {}", e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Store(format!("append message: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Store(format!("flush message: {}", e)))?;

        Ok(())
    }

    async fn load_recent_context(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>> {
        let path = self.file_for(conversation_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Store(format!("read history file: {}", e))),
        };

        let mut messages = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let msg: InboundMessage = serde_json::from_str(line)
                .map_err(|e| Error::Store(format!("decode history line: {}", e)))?;
            messages.push(msg);
        }

        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }
}
