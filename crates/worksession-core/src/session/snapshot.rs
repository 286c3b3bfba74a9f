//! Persisted projection of the controller state.
//!
//! The blob is camelCase JSON. Every committed transition rewrites it whole
//! with a bumped `revision`. Reading is strict: anything that does not
//! describe a coherent state is rejected and the caller falls back to `Idle`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{CompletionKind, WorkSession};
use super::state::{ControllerState, SessionState};
use crate::error::PersistenceError;

/// Current snapshot layout. Bump when the blob changes incompatibly.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub schema_version: u32,
    /// Incremented on every committed write.
    #[serde(default)]
    pub revision: u64,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub planned_duration_ms: u64,
    #[serde(default)]
    pub accumulated_worked_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionKind>,
    #[serde(default)]
    pub acknowledged: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaProbe {
    schema_version: u32,
}

impl SessionSnapshot {
    pub fn capture(state: &ControllerState, revision: u64) -> Self {
        let mut snap = Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            revision,
            state: state.tag(),
            session_id: None,
            task_id: None,
            planned_duration_ms: 0,
            accumulated_worked_ms: 0,
            created_at: None,
            started_at: None,
            paused_at: None,
            completed_at: None,
            completion: None,
            acknowledged: false,
        };
        if let Some(s) = state.session() {
            snap.session_id = Some(s.id);
            snap.task_id = Some(s.task_id.clone());
            snap.planned_duration_ms = s.planned_ms;
            snap.accumulated_worked_ms = s.accumulated_ms;
            snap.created_at = Some(s.created_at);
            snap.started_at = Some(s.started_at);
            snap.paused_at = s.paused_at;
            snap.completed_at = s.completed_at;
            snap.completion = s.completion;
        }
        if let ControllerState::Completed { acknowledged, .. } = state {
            snap.acknowledged = *acknowledged;
        }
        snap
    }

    /// # Errors
    /// Returns an error if the snapshot cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a stored blob, checking the schema version before the body.
    ///
    /// # Errors
    /// Returns [`PersistenceError::Decode`] for malformed JSON or missing
    /// required fields and [`PersistenceError::UnsupportedSchema`] for blobs
    /// written by another layout.
    pub fn decode(blob: &[u8]) -> Result<Self, PersistenceError> {
        let probe: SchemaProbe = serde_json::from_slice(blob)?;
        if probe.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(PersistenceError::UnsupportedSchema {
                found: probe.schema_version,
                expected: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        Ok(serde_json::from_slice(blob)?)
    }

    /// Rebuild the controller state this snapshot describes.
    ///
    /// # Errors
    /// Returns [`PersistenceError::Inconsistent`] when a non-idle snapshot is
    /// missing session fields or carries impossible values.
    pub fn into_state(self) -> Result<ControllerState, PersistenceError> {
        if self.state == SessionState::Idle {
            return Ok(ControllerState::Idle);
        }

        let inconsistent = |what: &str| {
            PersistenceError::Inconsistent(format!("{} snapshot {what}", self.state))
        };
        let id = self.session_id.ok_or_else(|| inconsistent("has no sessionId"))?;
        let task_id = self.task_id.clone().ok_or_else(|| inconsistent("has no taskId"))?;
        let started_at = self.started_at.ok_or_else(|| inconsistent("has no startedAt"))?;
        if self.planned_duration_ms == 0 {
            return Err(inconsistent("has a zero planned duration"));
        }
        if self.accumulated_worked_ms > self.planned_duration_ms {
            return Err(inconsistent("has more work than planned"));
        }

        let session = WorkSession {
            id,
            task_id,
            planned_ms: self.planned_duration_ms,
            accumulated_ms: self.accumulated_worked_ms,
            created_at: self.created_at.unwrap_or(started_at),
            started_at,
            paused_at: self.paused_at,
            completed_at: self.completed_at,
            completion: self.completion,
        };

        match self.state {
            SessionState::Running => Ok(ControllerState::Running(session)),
            SessionState::Paused => Ok(ControllerState::Paused(session)),
            SessionState::Completed => {
                if session.completed_at.is_none() {
                    return Err(inconsistent("has no completedAt"));
                }
                Ok(ControllerState::Completed {
                    session,
                    acknowledged: self.acknowledged,
                })
            }
            SessionState::Idle => Ok(ControllerState::Idle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn running() -> ControllerState {
        ControllerState::Running(WorkSession::new("task-7", 1_500_000, Utc::now()))
    }

    #[test]
    fn running_snapshot_restores_same_state() {
        let state = running();
        let blob = SessionSnapshot::capture(&state, 3).encode().unwrap();
        let snap = SessionSnapshot::decode(&blob).unwrap();
        assert_eq!(snap.revision, 3);
        assert_eq!(snap.into_state().unwrap(), state);
    }

    #[test]
    fn blob_uses_camel_case_fields() {
        let blob = SessionSnapshot::capture(&running(), 1).encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&blob).unwrap();
        assert_eq!(json["schemaVersion"], 1);
        assert_eq!(json["state"], "running");
        assert_eq!(json["taskId"], "task-7");
        assert_eq!(json["plannedDurationMs"], 1_500_000);
        assert!(json.get("pausedAt").is_none());
    }

    #[test]
    fn completed_keeps_acknowledgement() {
        let mut session = WorkSession::new("t", 60_000, Utc::now());
        session.accumulated_ms = 60_000;
        session.completed_at = Some(session.started_at + Duration::seconds(60));
        session.completion = Some(CompletionKind::Expired);
        let state = ControllerState::Completed {
            session,
            acknowledged: true,
        };
        let blob = SessionSnapshot::capture(&state, 9).encode().unwrap();
        let restored = SessionSnapshot::decode(&blob).unwrap().into_state().unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            SessionSnapshot::decode(b"\x00\x01not json"),
            Err(PersistenceError::Decode(_))
        ));
        assert!(matches!(
            SessionSnapshot::decode(br#"{"state":"running"}"#),
            Err(PersistenceError::Decode(_))
        ));
    }

    #[test]
    fn future_schema_is_rejected() {
        let err = SessionSnapshot::decode(br#"{"schemaVersion":7,"state":"idle"}"#).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::UnsupportedSchema { found: 7, expected: 1 }
        ));
    }

    #[test]
    fn running_without_anchor_is_inconsistent() {
        let blob = br#"{"schemaVersion":1,"state":"running","sessionId":"67e55044-10b1-426f-9247-bb680e5fe0c8","taskId":"t","plannedDurationMs":1000}"#;
        let err = SessionSnapshot::decode(blob).unwrap().into_state().unwrap_err();
        assert!(matches!(err, PersistenceError::Inconsistent(_)));
    }

    #[test]
    fn idle_ignores_leftover_fields() {
        let blob = br#"{"schemaVersion":1,"state":"idle","taskId":"stale"}"#;
        let state = SessionSnapshot::decode(blob).unwrap().into_state().unwrap();
        assert_eq!(state, ControllerState::Idle);
    }
}
