use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::WorkSession;
use crate::clock::elapsed_ms;

/// Tag of a [`ControllerState`], used in events, errors and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Completed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// The single tracked session and where it is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running(WorkSession),
    /// The session's `accumulated_ms` holds everything worked up to the pause.
    Paused(WorkSession),
    Completed {
        session: WorkSession,
        /// The host has shown the completion prompt.
        acknowledged: bool,
    },
}

impl ControllerState {
    pub fn tag(&self) -> SessionState {
        match self {
            ControllerState::Idle => SessionState::Idle,
            ControllerState::Running(_) => SessionState::Running,
            ControllerState::Paused(_) => SessionState::Paused,
            ControllerState::Completed { .. } => SessionState::Completed,
        }
    }

    pub fn session(&self) -> Option<&WorkSession> {
        match self {
            ControllerState::Idle => None,
            ControllerState::Running(s) | ControllerState::Paused(s) => Some(s),
            ControllerState::Completed { session, .. } => Some(session),
        }
    }

    /// `max(0, planned - accumulated - in_flight)` where the in-flight stretch
    /// only counts while running. A clock that went backwards contributes zero.
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> u64 {
        match self {
            ControllerState::Idle => 0,
            ControllerState::Running(s) => {
                let in_flight = elapsed_ms(s.started_at, now).unwrap_or(0);
                s.uncommitted_budget_ms().saturating_sub(in_flight)
            }
            ControllerState::Paused(s) => s.uncommitted_budget_ms(),
            ControllerState::Completed { session, .. } => session.uncommitted_budget_ms(),
        }
    }

    /// Work done so far including the in-flight stretch, capped at the plan.
    pub fn worked_ms(&self, now: DateTime<Utc>) -> u64 {
        match self.session() {
            Some(s) => s.planned_ms.saturating_sub(self.remaining_ms(now)),
            None => 0,
        }
    }

    /// 0.0 ..= 1.0 share of the plan already worked.
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        match self.session() {
            Some(s) if s.planned_ms > 0 => {
                (1.0 - self.remaining_ms(now) as f64 / s.planned_ms as f64).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }
}
