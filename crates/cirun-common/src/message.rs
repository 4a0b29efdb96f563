//! Message protocol between page agents, the UI surface, and the
//! orchestrator.
//!
//! Fire-and-acknowledge semantics: every request gets exactly one [`Ack`].
//! Lifecycle messages (`start_run`, `stop_now`) are always honored; the
//! rest are only honored while the lifecycle flag is set, and anything
//! carrying a `run_id` is dropped silently when the identity no longer
//! matches the active run.

use crate::run::{Origin, ParsedUpdate};
use serde::{Deserialize, Serialize};

/// Requests the orchestrator consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Begin (`value = true`) or end the run lifecycle.
    StartRun { value: bool },
    /// Abort immediately and close the worker tab.
    StopNow,
    /// Begin processing a parsed update request.
    RunUpdate {
        data: ParsedUpdate,
        #[serde(default)]
        origin: Option<Origin>,
    },
    /// Navigate the worker tab to the record-creation form. Emitted by the
    /// list agent when the scoped query clearly has no rows.
    OpenAddPage,
    /// One item's work is complete; advance the queue or finish.
    FinishedOne {
        #[serde(default)]
        run_id: Option<String>,
    },
    /// The list agent could not decide match/no-match within its scan
    /// budget and wants another look instead of guessing.
    RequestListRetry {
        #[serde(default)]
        run_id: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    /// The closure pages are done (or gave up); rejoin the main loop at
    /// `resume_index`.
    CloseTaskDone {
        #[serde(default)]
        run_id: Option<String>,
        #[serde(default)]
        resume_index: Option<u32>,
        /// Present when closure was abandoned rather than completed; the
        /// reason lands in the review log and the loop resumes anyway.
        #[serde(default)]
        skipped: Option<String>,
    },
}

/// Acknowledgment for a single request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_use_snake_case_tags() {
        let json = serde_json::to_string(&Message::StartRun { value: true }).unwrap();
        assert_eq!(json, r#"{"type":"start_run","value":true}"#);

        let json = serde_json::to_string(&Message::OpenAddPage).unwrap();
        assert_eq!(json, r#"{"type":"open_add_page"}"#);
    }

    #[test]
    fn finished_one_run_id_is_optional() {
        let msg: Message = serde_json::from_str(r#"{"type":"finished_one"}"#).unwrap();
        assert_eq!(msg, Message::FinishedOne { run_id: None });
    }

    #[test]
    fn close_task_done_roundtrip() {
        let msg = Message::CloseTaskDone {
            run_id: Some("r1".into()),
            resume_index: Some(2),
            skipped: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn ack_error_omitted_when_ok() {
        let json = serde_json::to_string(&Ack::ok()).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);
        let json = serde_json::to_string(&Ack::err("stopped")).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"stopped"}"#);
    }
}
