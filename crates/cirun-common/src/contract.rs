//! Contracts for the orchestrator's external collaborators.
//!
//! The engine never talks to a real browser, clock, or disk directly; it
//! drives these three seams. Implementations live in the `cirun` crate
//! (file-backed store, tokio timers, tracing navigator) and in test code
//! (in-memory store, recording mocks).

use crate::run::{Origin, TabId};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Durable, process-wide key-value store. The sole source of truth for
/// run state: the engine re-reads it at the top of every handler and
/// never trusts values captured before an await.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn put(&self, key: &str, value: Value) -> Result<()>;
    /// Remove a set of keys; missing keys are not an error.
    async fn remove(&self, keys: &[&str]) -> Result<()>;
}

/// The kinds of one-shot wake-up the engine arms. Keying timers by kind
/// makes "clear everything pending for this run" a pair of cancels rather
/// than ad hoc bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Delayed advance to the next queue item.
    Advance,
    /// Re-navigation to the list page after an undecided verdict.
    ListRetry,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::Advance => "advance",
            TimerKind::ListRetry => "list_retry",
        }
    }
}

/// One-shot wake-ups at an absolute time, delivered back to the engine as
/// events. Re-arming a kind replaces the previous timer of that kind; the
/// `run_id` travels with the fire event so a superseded run's timer can
/// be rejected at consumption time.
#[async_trait]
pub trait TimerService: Send + Sync {
    async fn schedule(&self, kind: TimerKind, run_id: &str, at: DateTime<Utc>) -> Result<()>;
    async fn cancel(&self, kind: TimerKind) -> Result<()>;
}

/// Drives the single reusable worker tab. Only the orchestrator requests
/// navigation; page agents read and report but never steer the tab.
#[async_trait]
pub trait PageNavigator: Send + Sync {
    /// Open `url`, reusing the given tab when it still exists. Returns the
    /// tab now showing the page.
    async fn navigate(&self, reuse: Option<TabId>, url: &str) -> Result<TabId>;
    async fn close(&self, tab: TabId) -> Result<()>;
    /// Return focus to the context that started the run.
    async fn focus(&self, origin: Origin) -> Result<()>;
    /// Surface the running/stopped indicator.
    async fn set_indicator(&self, running: bool) -> Result<()>;
}
