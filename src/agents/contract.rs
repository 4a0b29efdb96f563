//! What each page agent owes the orchestrator.
//!
//! - list agent: decides [`ListVerdict`] for the scoped query. On a match
//!   it clicks into the record itself (a page-level navigation the engine
//!   observes only indirectly); on no-rows it sends `open_add_page`; when
//!   undecided it sends `request_list_retry` instead of guessing.
//! - record-form and add-page agents: fill fields from the current item
//!   data and send `finished_one` when the item's work is complete.
//! - closure agents: walk change request → change task, then send
//!   `close_task_done` echoing the persisted resume index; on failure
//!   they send the same message with a `skipped` reason.

use serde::{Deserialize, Serialize};

/// The list page's conclusion about the scoped query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ListVerdict {
    /// A row matching both the item and the change number exists.
    Match,
    /// The table rendered with zero rows; the record must be created.
    NoRows,
    /// The table never appeared, or rows were still rendering when the
    /// scan budget ran out. Guessing here risks a duplicate record or a
    /// silently skipped one, so the agent asks for another look.
    Undecided { reason: String },
}

impl ListVerdict {
    pub fn undecided(reason: impl Into<String>) -> Self {
        ListVerdict::Undecided {
            reason: reason.into(),
        }
    }
}
