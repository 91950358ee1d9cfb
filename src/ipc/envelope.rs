//! IPC envelope types
//!
//! Envelopes are keyed by (conversation, generation, correlation id,
//! direction); direction is carried in the file suffix, the rest in the body.

use crate::channel::InboundMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// File suffix for request envelopes
pub const REQUEST_SUFFIX: &str = ".req.json";

/// File suffix for response envelopes
pub const RESPONSE_SUFFIX: &str = ".resp.json";

/// Marker file the worker publishes once its IPC loop is serving
pub const READY_MARKER: &str = "ready.json";

/// One dispatch request to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Unique per call
    pub correlation_id: String,

    /// Owning conversation address
    pub conversation_id: String,

    /// Generation token of the worker this request is addressed to
    pub generation: u64,

    /// Messages that activated this dispatch, in arrival order
    pub messages: Vec<InboundMessage>,

    /// Recent conversation history, oldest first
    pub context: Vec<InboundMessage>,

    /// Creation timestamp, milliseconds since the UNIX epoch
    pub created_at: i64,
}

impl DispatchRequest {
    /// Build a request with a fresh correlation id.
    pub fn new(
        conversation_id: impl Into<String>,
        generation: u64,
        messages: Vec<InboundMessage>,
        context: Vec<InboundMessage>,
    ) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            generation,
            messages,
            context,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// The worker's answer to one dispatch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    /// Correlation id of the request being answered
    pub correlation_id: String,

    /// Owning conversation address
    pub conversation_id: String,

    /// Generation token of the answering worker
    pub generation: u64,

    /// Agent reply text on success
    pub reply: Option<String>,

    /// Failure indicator from the worker
    pub error: Option<String>,

    /// Completion timestamp, milliseconds since the UNIX epoch
    pub completed_at: i64,
}

/// Generation payload of the worker's ready marker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyMarker {
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_correlation_ids_are_unique() {
        let a = DispatchRequest::new("123@c.us", 1, vec![], vec![]);
        let b = DispatchRequest::new("123@c.us", 1, vec![], vec![]);
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn test_response_serde() {
        let resp = DispatchResponse {
            correlation_id: "corr-1".to_string(),
            conversation_id: "123@c.us".to_string(),
            generation: 2,
            reply: Some("done".to_string()),
            error: None,
            completed_at: 42,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: DispatchResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.generation, 2);
        assert_eq!(back.reply.as_deref(), Some("done"));
    }
}
