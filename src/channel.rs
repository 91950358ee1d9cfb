//! Channel port
//!
//! The messaging-platform adapter lives outside this crate; it feeds inbound
//! batches into the [`MessageRouter`](crate::session::MessageRouter) and
//! receives replies and failure notices through the [`ChannelPort`] trait
//! defined here.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single inbound (or stored) conversational message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel-specific sender address
    pub sender: String,

    /// Message text
    pub content: String,

    /// Arrival timestamp, milliseconds since the UNIX epoch
    pub timestamp: i64,
}

impl InboundMessage {
    /// Create a message stamped with the current time.
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Outbound side of the channel adapter
#[async_trait]
pub trait ChannelPort: Send + Sync {
    /// Deliver an agent reply to a conversation.
    async fn send_reply(&self, conversation_id: &str, text: &str) -> Result<()>;

    /// Deliver a user-visible failure notice to a conversation.
    async fn send_failure_notice(&self, conversation_id: &str, reason: &str) -> Result<()>;
}

/// Channel port that prints JSON lines to stdout.
///
/// Used by the `run` subcommand, where an external adapter process drives the
/// engine over stdio.
pub struct StdioChannel;

#[derive(Serialize)]
struct OutboundLine<'a> {
    conversation_id: &'a str,
    kind: &'a str,
    text: &'a str,
}

#[async_trait]
impl ChannelPort for StdioChannel {
    async fn send_reply(&self, conversation_id: &str, text: &str) -> Result<()> {
        let line = serde_json::to_string(&OutboundLine {
            conversation_id,
            kind: "reply",
            text,
        })?;
        println!("{}", line);
        Ok(())
    }

    async fn send_failure_notice(&self, conversation_id: &str, reason: &str) -> Result<()> {
        let line = serde_json::to_string(&OutboundLine {
            conversation_id,
            kind: "failure",
            text: reason,
        })?;
        println!("{}", line);
        Ok(())
    }
}
