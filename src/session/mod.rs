//! Session orchestration
//!
//! Per-conversation lifecycle, generation minting and the inbound message
//! router sitting between the channel port and the worker runtime.

mod generation;
mod machine;
mod router;

pub use generation::GenerationLedger;
pub use machine::{DispatchOutcome, SessionCoordinator, SessionState};
pub use router::MessageRouter;
