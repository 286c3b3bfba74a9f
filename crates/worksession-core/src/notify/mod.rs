//! One-shot completion alerts.
//!
//! Alerts are fire-and-forget. A scheduler that fails only costs the user a
//! push notification; completion itself is always detected by the controller
//! from timestamps.

mod db;

pub use db::DbAlertScheduler;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulingError;

/// Identifier of the single completion alert. There is never more than one
/// session, so there is never more than one alert.
pub const COMPLETION_ALERT_ID: &str = "session-complete";

/// User-facing notification text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
}

impl Default for NotificationPayload {
    fn default() -> Self {
        Self {
            title: "Timer Complete!".into(),
            body: "Your work session has finished.".into(),
        }
    }
}

/// An alert pinned to an absolute time, as stored by [`DbAlertScheduler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledAlert {
    pub id: String,
    pub fire_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

/// Schedules and cancels one-shot alerts with the platform.
///
/// `fire_after` is relative to the call; implementations must pin it to an
/// absolute time immediately so later suspension does not delay it.
pub trait NotificationScheduler: Send {
    /// # Errors
    /// Returns an error if permission is missing or the platform call fails.
    fn schedule(
        &mut self,
        id: &str,
        fire_after: Duration,
        payload: &NotificationPayload,
    ) -> Result<(), SchedulingError>;

    /// Cancel a pending alert. Cancelling an unknown or already-fired alert
    /// is a no-op.
    fn cancel(&mut self, id: &str);
}

/// Scheduler for hosts without notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScheduler;

impl NotificationScheduler for NoopScheduler {
    fn schedule(
        &mut self,
        _id: &str,
        _fire_after: Duration,
        _payload: &NotificationPayload,
    ) -> Result<(), SchedulingError> {
        Ok(())
    }

    fn cancel(&mut self, _id: &str) {}
}

/// A call seen by a [`RecordingScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCall {
    Schedule {
        id: String,
        fire_after: Duration,
        payload: NotificationPayload,
    },
    Cancel {
        id: String,
    },
}

/// Keeps every call in memory. Clones share the log, so a test can hand one
/// clone to the controller and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingScheduler {
    calls: Arc<Mutex<Vec<SchedulerCall>>>,
    failure: Arc<Mutex<Option<SchedulingError>>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `schedule` fail with `error`; `None` restores success.
    pub fn fail_with(&self, error: Option<SchedulingError>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }

    pub fn calls(&self) -> Vec<SchedulerCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The delay of the most recent successful `schedule` not followed by a cancel.
    pub fn pending(&self) -> Option<Duration> {
        let mut pending = None;
        for call in self.calls() {
            match call {
                SchedulerCall::Schedule { fire_after, .. } => pending = Some(fire_after),
                SchedulerCall::Cancel { .. } => pending = None,
            }
        }
        pending
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl NotificationScheduler for RecordingScheduler {
    fn schedule(
        &mut self,
        id: &str,
        fire_after: Duration,
        payload: &NotificationPayload,
    ) -> Result<(), SchedulingError> {
        if let Some(err) = self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(err);
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SchedulerCall::Schedule {
                id: id.to_string(),
                fire_after,
                payload: payload.clone(),
            });
        Ok(())
    }

    fn cancel(&mut self, id: &str) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SchedulerCall::Cancel { id: id.to_string() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_scheduler_tracks_pending() {
        let recorder = RecordingScheduler::new();
        let mut handle = recorder.clone();
        let payload = NotificationPayload::default();

        handle
            .schedule(COMPLETION_ALERT_ID, Duration::from_secs(60), &payload)
            .unwrap();
        assert_eq!(recorder.pending(), Some(Duration::from_secs(60)));

        handle.cancel(COMPLETION_ALERT_ID);
        handle.cancel(COMPLETION_ALERT_ID);
        assert_eq!(recorder.pending(), None);
        assert_eq!(recorder.calls().len(), 3);
    }

    #[test]
    fn recording_scheduler_can_fail() {
        let recorder = RecordingScheduler::new();
        recorder.fail_with(Some(SchedulingError::PermissionDenied));
        let mut handle = recorder.clone();
        let err = handle
            .schedule(COMPLETION_ALERT_ID, Duration::from_secs(1), &NotificationPayload::default())
            .unwrap_err();
        assert_eq!(err, SchedulingError::PermissionDenied);
        assert!(recorder.calls().is_empty());
    }
}
