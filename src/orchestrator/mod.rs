pub mod engine;
pub mod pages;

pub use engine::{Event, Orchestrator, OrchestratorHandle};
