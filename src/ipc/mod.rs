//! Directory-based IPC with worker containers
//!
//! Requests and responses are independent addressable JSON files under a
//! per-conversation directory that is bind-mounted into the worker. Writes
//! are atomic from the reader's perspective (write-to-temp then rename) and
//! responses are consumed at most once.

mod bridge;
mod envelope;

pub use bridge::IpcBridge;
pub use envelope::{
    DispatchRequest, DispatchResponse, ReadyMarker, READY_MARKER, REQUEST_SUFFIX, RESPONSE_SUFFIX,
};
