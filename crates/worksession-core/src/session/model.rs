use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a session reached `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// The planned duration ran out.
    Expired,
    /// `end()` was called before the budget was used up, or a new session
    /// replaced this one.
    EndedEarly,
}

/// One timed work interval bound to a task.
///
/// `started_at` is the anchor of the current running stretch and moves on
/// every resume; `created_at` is the first start and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSession {
    pub id: Uuid,
    pub task_id: String,
    pub planned_ms: u64,
    /// Work time committed by pauses and completion. Excludes the in-flight
    /// stretch since `started_at` while running.
    pub accumulated_ms: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion: Option<CompletionKind>,
}

impl WorkSession {
    pub fn new(task_id: impl Into<String>, planned_ms: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task_id.into(),
            planned_ms,
            accumulated_ms: 0,
            created_at: now,
            started_at: now,
            paused_at: None,
            completed_at: None,
            completion: None,
        }
    }

    /// Budget left once committed work is subtracted.
    pub fn uncommitted_budget_ms(&self) -> u64 {
        self.planned_ms.saturating_sub(self.accumulated_ms)
    }

    /// Whether the committed work covers the whole plan.
    pub fn is_fulfilled(&self) -> bool {
        self.accumulated_ms >= self.planned_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_empty() {
        let now = Utc::now();
        let s = WorkSession::new("task-1", 60_000, now);
        assert_eq!(s.accumulated_ms, 0);
        assert_eq!(s.created_at, s.started_at);
        assert_eq!(s.uncommitted_budget_ms(), 60_000);
        assert!(!s.is_fulfilled());
    }

    #[test]
    fn fulfilled_once_worked_covers_plan() {
        let mut s = WorkSession::new("task-1", 60_000, Utc::now());
        s.accumulated_ms = 60_000;
        assert!(s.is_fulfilled());
        assert_eq!(s.uncommitted_budget_ms(), 0);
    }
}
