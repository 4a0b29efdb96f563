//! Persisted run state model.
//!
//! Every type here is written to the durable store as JSON. The engine is
//! the only writer; page agents only read. Fields added after the first
//! release must carry `#[serde(default)]` so older persisted runs keep
//! loading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a browser tab managed by the navigator.
pub type TabId = u64;
/// Identifier of a browser window.
pub type WindowId = u64;

/// A named sub-pass over the item queue when two-pass mode is enabled.
///
/// Absent phase means a plain single-pass run. The closure detour is not a
/// phase; it is marked by the presence of [`ClosingState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// First pass: add the affected-CI relationship on every item.
    Affect,
    /// Second (or only) pass: update the record fields on every item.
    Update,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Affect => "affect",
            RunPhase::Update => "update",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-item field overrides. An override value wins over the run default
/// for that item only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOverride {
    /// Change number override; items carrying a different change number
    /// than their neighbors form a closure boundary inside one run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_desc: Option<String>,
}

impl ItemOverride {
    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        self.chg.is_none()
            && self.current_status.is_none()
            && self.to_client.is_none()
            && self.contact.is_none()
            && self.location.is_none()
            && self.other_desc.is_none()
    }

    /// Overlay `other` on top of self; fields set in `other` win.
    pub fn merge(&mut self, other: &ItemOverride) {
        if other.chg.is_some() {
            self.chg = other.chg.clone();
        }
        if other.current_status.is_some() {
            self.current_status = other.current_status.clone();
        }
        if other.to_client.is_some() {
            self.to_client = other.to_client.clone();
        }
        if other.contact.is_some() {
            self.contact = other.contact.clone();
        }
        if other.location.is_some() {
            self.location = other.location.clone();
        }
        if other.other_desc.is_some() {
            self.other_desc = other.other_desc.clone();
        }
    }
}

/// Data shared by every item of a multi-item run. Immutable once the run
/// starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunBase {
    pub run_id: String,
    /// Default change number for items without an override.
    pub chg: String,
    #[serde(default)]
    pub current_status: String,
    #[serde(default)]
    pub to_client: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub other_desc: String,
    /// Per-item overrides keyed by item identifier (uppercased).
    #[serde(default)]
    pub overrides: HashMap<String, ItemOverride>,
}

impl RunBase {
    /// Materialize the record for one item: defaults overlaid with that
    /// item's override entry.
    pub fn resolve(&self, item: &str) -> ItemData {
        let ov = self.overrides.get(item).cloned().unwrap_or_default();
        ItemData {
            run_id: self.run_id.clone(),
            item: item.to_string(),
            chg: ov.chg.unwrap_or_else(|| self.chg.clone()),
            current_status: ov
                .current_status
                .unwrap_or_else(|| self.current_status.clone()),
            to_client: ov.to_client.unwrap_or_else(|| self.to_client.clone()),
            contact: ov.contact.unwrap_or_else(|| self.contact.clone()),
            location: ov.location.unwrap_or_else(|| self.location.clone()),
            other_desc: ov.other_desc.unwrap_or_else(|| self.other_desc.clone()),
        }
    }

    /// The change number an item resolves to, without materializing the
    /// full record.
    pub fn chg_for(&self, item: &str) -> String {
        self.overrides
            .get(item)
            .and_then(|ov| ov.chg.clone())
            .unwrap_or_else(|| self.chg.clone())
    }
}

/// The materialized per-item record page agents consume. Recomputed on
/// every queue advance; agents never mutate it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemData {
    pub run_id: String,
    pub item: String,
    pub chg: String,
    #[serde(default)]
    pub current_status: String,
    #[serde(default)]
    pub to_client: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub other_desc: String,
}

/// Ordered item list plus current position, scoped to one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub items: Vec<String>,
    pub index: usize,
    pub run_id: String,
}

impl Queue {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The item at the current position, if in bounds.
    pub fn current(&self) -> Option<&str> {
        self.items.get(self.index).map(String::as_str)
    }
}

/// Per-run counter for list-page retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryState {
    pub run_id: String,
    pub count: u32,
    pub last_attempt_at: DateTime<Utc>,
}

/// Marks that the run has diverted into the change-task closure sub-flow.
/// Exists only while closure is in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosingState {
    pub run_id: String,
    /// Item that was being processed when closure began.
    pub item: String,
    /// Change number the closure operates on.
    pub chg: String,
    pub started_at: DateTime<Utc>,
    /// Queue index to resume at once closure completes. For a run with no
    /// queue this is 0 and the run finishes instead of resuming.
    pub resume_index: u32,
}

/// A delayed advance to the next queue item, consumed by the wake-up
/// handler of the corresponding timer. Single-use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAdvance {
    pub index: usize,
    pub run_id: String,
    pub scheduled_at: DateTime<Utc>,
}

/// Browser context that initiated the run; focus returns here when the
/// run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub tab: TabId,
    pub window: WindowId,
}

/// Structured result of parsing a pasted update request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedUpdate {
    /// Subject-ish first line, kept for display only.
    #[serde(default)]
    pub header: String,
    /// Change number found anywhere in the document.
    #[serde(default)]
    pub chg: String,
    #[serde(default)]
    pub mode: String,
    /// First item identifier; convenience for single-item input.
    #[serde(default)]
    pub item: String,
    /// All item identifiers in order of first appearance.
    #[serde(default)]
    pub items: Vec<String>,
    /// Per-item field overrides parsed from sectioned blocks.
    #[serde(default)]
    pub overrides: HashMap<String, ItemOverride>,
    #[serde(default)]
    pub current_status: String,
    #[serde(default)]
    pub to_client: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub other_desc: String,
}
