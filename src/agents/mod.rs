//! Page agent contracts and the simulated agents that stand in for them.
//!
//! Real agents run inside loaded pages, read current-step data from the
//! store, do one unit of DOM work, and report back over the message
//! channel. Their DOM mechanics live out of process; this module fixes
//! the contract they follow and provides a scripted simulation of it for
//! rehearsal runs and tests.

pub mod contract;
pub mod sim;

pub use contract::ListVerdict;
pub use sim::{SimNavigator, SimWorld};
