//! Timer service implementations.
//!
//! `TokioTimers` arms real one-shot sleeps that feed the engine's event
//! queue; `MockTimers` records what would have been armed so tests can
//! fire wake-ups deterministically.

use crate::orchestrator::Event;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirun_common::{TimerKind, TimerService};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Real timers: one spawned sleep task per kind. Re-arming a kind aborts
/// the previous task, so at most one wake-up per kind is ever in flight.
pub struct TokioTimers {
    events: mpsc::Sender<Event>,
    tasks: Mutex<HashMap<TimerKind, JoinHandle<()>>>,
}

impl TokioTimers {
    pub fn new(events: mpsc::Sender<Event>) -> Self {
        Self {
            events,
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TimerService for TokioTimers {
    async fn schedule(&self, kind: TimerKind, run_id: &str, at: DateTime<Utc>) -> Result<()> {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let events = self.events.clone();
        let run_id = run_id.to_string();
        debug!(kind = kind.as_str(), %run_id, ?delay, "arming timer");

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::TimerFired { kind, run_id }).await;
        });

        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| anyhow!("timer registry poisoned"))?;
        if let Some(previous) = tasks.insert(kind, task) {
            previous.abort();
        }
        Ok(())
    }

    async fn cancel(&self, kind: TimerKind) -> Result<()> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| anyhow!("timer registry poisoned"))?;
        if let Some(task) = tasks.remove(&kind) {
            task.abort();
            debug!(kind = kind.as_str(), "cancelled timer");
        }
        Ok(())
    }
}

/// A timer that was (or would have been) armed.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTimer {
    pub kind: TimerKind,
    pub run_id: String,
    pub at: DateTime<Utc>,
}

/// Recording timer service for tests. `armed` is append-only history;
/// `current` reflects replace-on-rearm / cancel semantics.
#[derive(Debug, Default)]
pub struct MockTimers {
    armed: Mutex<Vec<ScheduledTimer>>,
    current: Mutex<HashMap<TimerKind, ScheduledTimer>>,
    cancelled: Mutex<Vec<TimerKind>>,
}

impl MockTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every schedule call ever made, in order.
    pub fn armed(&self) -> Vec<ScheduledTimer> {
        self.armed.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn armed_count(&self, kind: TimerKind) -> usize {
        self.armed().iter().filter(|t| t.kind == kind).count()
    }

    /// The timer currently pending for a kind, if any.
    pub fn pending(&self, kind: TimerKind) -> Option<ScheduledTimer> {
        self.current
            .lock()
            .ok()
            .and_then(|map| map.get(&kind).cloned())
    }

    pub fn cancelled(&self) -> Vec<TimerKind> {
        self.cancelled.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TimerService for MockTimers {
    async fn schedule(&self, kind: TimerKind, run_id: &str, at: DateTime<Utc>) -> Result<()> {
        let entry = ScheduledTimer {
            kind,
            run_id: run_id.to_string(),
            at,
        };
        self.armed
            .lock()
            .map_err(|_| anyhow!("timer registry poisoned"))?
            .push(entry.clone());
        self.current
            .lock()
            .map_err(|_| anyhow!("timer registry poisoned"))?
            .insert(kind, entry);
        Ok(())
    }

    async fn cancel(&self, kind: TimerKind) -> Result<()> {
        self.current
            .lock()
            .map_err(|_| anyhow!("timer registry poisoned"))?
            .remove(&kind);
        self.cancelled
            .lock()
            .map_err(|_| anyhow!("timer registry poisoned"))?
            .push(kind);
        Ok(())
    }
}
