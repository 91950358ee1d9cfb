//! Burrow - Per-Conversation Sandboxed Agent Dispatcher
//!
//! Burrow turns inbound conversational messages into isolated, per-conversation
//! compute sessions: each registered conversation gets its own sandboxed worker
//! container with a scoped filesystem view, runs an agent against the
//! conversation's message history, and returns a reply.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Burrow Dispatcher                      │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                    Message Router                      │  │
//! │  │  - Persist inbound batches                             │  │
//! │  │  - Apply the trigger matcher                           │  │
//! │  │  - Forward replies / failure notices                   │  │
//! │  └───────────────────────────┬────────────────────────────┘  │
//! │  ┌───────────────────────────▼────────────────────────────┐  │
//! │  │                 Session State Machine                  │  │
//! │  │  - One task + FIFO queue per conversation              │  │
//! │  │  - Single worker per workspace (central invariant)     │  │
//! │  │  - Generation tokens minted at launch                  │  │
//! │  └───────────────────────────┬────────────────────────────┘  │
//! │  ┌──────────────────────┐ ┌──▼─────────────────────────────┐ │
//! │  │  Runtime Supervisor  │ │           IPC Bridge           │ │
//! │  │  - Orphan sweep      │ │  - Atomic envelope publish     │ │
//! │  │  - Launch/readiness  │ │  - Bounded response matching   │ │
//! │  │  - Stop/remove       │ │  - Stale-generation discard    │ │
//! │  └──────────┬───────────┘ └──┬─────────────────────────────┘ │
//! └─────────────┼────────────────┼───────────────────────────────┘
//!               │ container CLI  │ bind-mounted directory
//! ┌─────────────▼────────────────▼───────────────────────────────┐
//! │             Worker container (one per conversation)          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`session`]: per-conversation lifecycle, generation ledger and routing
//! - [`runtime`]: container-runtime control surface and supervisor
//! - [`ipc`]: directory-based request/response bridge
//! - [`registry`]: conversation registration and mount allowlists
//! - [`trigger`]: trigger-word matching
//! - [`channel`]: channel port (the messaging adapter's seam)
//! - [`store`]: persistent message-history collaborator
//! - [`config`]: configuration management

pub mod channel;
pub mod config;
pub mod error;
pub mod ipc;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod store;
pub mod trigger;

pub use config::BurrowConfig;
pub use error::{Error, Result};

/// Sanitize a conversation address for container names and file paths.
///
/// Keeps `[A-Za-z0-9_.-]`, maps everything else to `-`.
pub fn slug(conversation_id: &str) -> String {
    conversation_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
