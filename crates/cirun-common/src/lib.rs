//! Shared domain types and collaborator contracts for the cirun engine.
//!
//! Everything the orchestrator persists or exchanges with page agents is
//! defined here, so agent implementations and the engine agree on one
//! vocabulary:
//! - `run`: the persisted run state model (base data, queue, retry/closing
//!   markers)
//! - `message`: the request/acknowledge protocol between agents, the UI,
//!   and the orchestrator
//! - `contract`: the seams the orchestrator drives - durable store, timer
//!   service, page navigator

pub mod contract;
pub mod message;
pub mod run;

pub use contract::{PageNavigator, StateStore, TimerKind, TimerService};
pub use message::{Ack, Message};
pub use run::{
    ClosingState, ItemData, ItemOverride, Origin, ParsedUpdate, PendingAdvance, Queue, RetryState,
    RunBase, RunPhase, TabId, WindowId,
};
