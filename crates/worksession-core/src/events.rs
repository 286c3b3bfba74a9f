use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{CompletionKind, SessionState, WorkSession};

/// Every state change of the session controller produces an Event.
/// Hosts print or forward them; the history ledger consumes completions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionStarted {
        session_id: Uuid,
        task_id: String,
        planned_ms: u64,
        at: DateTime<Utc>,
    },
    SessionPaused {
        session_id: Uuid,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    SessionResumed {
        session_id: Uuid,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    /// Carries the finalized session so it can be recorded.
    SessionCompleted {
        session: WorkSession,
        kind: CompletionKind,
        at: DateTime<Utc>,
    },
    CompletionAcknowledged {
        session_id: Uuid,
        at: DateTime<Utc>,
    },
    SessionReset {
        at: DateTime<Utc>,
    },
    StateSnapshot {
        state: SessionState,
        session_id: Option<Uuid>,
        task_id: Option<String>,
        remaining_ms: u64,
        planned_ms: u64,
        progress: f64,
        display: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn is_completion(&self) -> bool {
        matches!(self, Event::SessionCompleted { .. })
    }
}
