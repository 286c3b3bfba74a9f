//! Session controller: the single-session state machine.
//!
//! Remaining time is always re-derived from wall-clock timestamps; ticks only
//! refresh the displayed value. Every transition is committed by writing a
//! snapshot first and updating memory second, so the store never lags or
//! leads what callers observe.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running <-> Paused
//!           |           |
//!           +-> Completed <-+    (tick / reconcile / end)
//! any -> Idle                    (reset)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut controller = SessionController::new(clock, store, scheduler).open();
//! controller.start("task-42", Duration::from_secs(25 * 60))?;
//! // on every foreground transition:
//! controller.reconcile()?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::format::format_clock;
use super::model::{CompletionKind, WorkSession};
use super::snapshot::SessionSnapshot;
use super::state::{ControllerState, SessionState};
use crate::clock::{elapsed_ms, ms_to_duration, Clock};
use crate::error::{PersistenceError, SessionError};
use crate::events::Event;
use crate::feedback::{FeedbackCue, NoFeedback, SessionFeedback};
use crate::notify::{NotificationPayload, NotificationScheduler, COMPLETION_ALERT_ID};
use crate::storage::SnapshotStore;

/// Owns the one tracked session and its collaborators.
///
/// Not internally synchronized: hosts serialize calls (see
/// [`SessionRuntime`](crate::SessionRuntime)).
pub struct SessionController {
    clock: Arc<dyn Clock>,
    store: Box<dyn SnapshotStore>,
    scheduler: Box<dyn NotificationScheduler>,
    feedback: Box<dyn SessionFeedback>,
    payload: NotificationPayload,
    state: ControllerState,
    /// Revision of the last committed snapshot.
    revision: u64,
    /// Remaining time as of the last tick or reconcile, for display.
    observed_remaining_ms: u64,
    events: Vec<Event>,
}

impl SessionController {
    /// A controller in `Idle` that has not looked at the store yet.
    /// Call [`open`](Self::open) to restore a previous process's session.
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Box<dyn SnapshotStore>,
        scheduler: Box<dyn NotificationScheduler>,
    ) -> Self {
        Self {
            clock,
            store,
            scheduler,
            feedback: Box::new(NoFeedback),
            payload: NotificationPayload::default(),
            state: ControllerState::Idle,
            revision: 0,
            observed_remaining_ms: 0,
            events: Vec::new(),
        }
    }

    pub fn with_feedback(mut self, feedback: Box<dyn SessionFeedback>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn with_payload(mut self, payload: NotificationPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Cold start: load the stored snapshot, restore it and reconcile.
    ///
    /// Never fails. An unreadable snapshot is logged, removed and replaced
    /// by `Idle`; a completion that cannot be persisted yet is retried on
    /// the next reconcile.
    pub fn open(mut self) -> Self {
        let blob = match self.store.load() {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "could not read session snapshot; starting idle");
                None
            }
        };
        if !self.restore(blob.as_deref()) {
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "could not clear unreadable session snapshot");
            }
        }
        if let Err(e) = self.reconcile() {
            warn!(error = %e, "reconcile after restore did not commit");
        }
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn tag(&self) -> SessionState {
        self.state.tag()
    }

    pub fn session(&self) -> Option<&WorkSession> {
        self.state.session()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Remaining time right now, read from the clock.
    pub fn remaining_ms(&self) -> u64 {
        self.state.remaining_ms(self.clock.now())
    }

    /// Remaining time as of the last tick or reconcile.
    pub fn observed_remaining_ms(&self) -> u64 {
        self.observed_remaining_ms
    }

    pub fn progress(&self) -> f64 {
        self.state.progress(self.clock.now())
    }

    /// A completed session the host has not shown to the user yet.
    pub fn needs_acknowledgement(&self) -> bool {
        matches!(
            self.state,
            ControllerState::Completed {
                acknowledged: false,
                ..
            }
        )
    }

    /// Build a full state snapshot event for display.
    pub fn snapshot(&self) -> Event {
        let now = self.clock.now();
        let remaining_ms = self.state.remaining_ms(now);
        let session = self.state.session();
        Event::StateSnapshot {
            state: self.state.tag(),
            session_id: session.map(|s| s.id),
            task_id: session.map(|s| s.task_id.clone()),
            remaining_ms,
            planned_ms: session.map(|s| s.planned_ms).unwrap_or(0),
            progress: self.state.progress(now),
            display: format_clock(remaining_ms),
            at: now,
        }
    }

    /// Every event produced since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin a session for `task_id`. An active session is ended first so
    /// its partial work is kept.
    ///
    /// # Errors
    /// [`SessionError::InvalidDuration`] for a zero plan, or
    /// [`SessionError::Persistence`] if the snapshot could not be written.
    pub fn start(
        &mut self,
        task_id: impl Into<String>,
        planned: Duration,
    ) -> Result<Event, SessionError> {
        let planned_ms = u64::try_from(planned.as_millis()).unwrap_or(u64::MAX);
        if planned_ms == 0 {
            return Err(SessionError::InvalidDuration);
        }

        if matches!(self.state, ControllerState::Running(_) | ControllerState::Paused(_)) {
            info!("ending active session before starting a new one");
            self.end()?;
        }

        let now = self.clock.now();
        let session = WorkSession::new(task_id, planned_ms, now);
        let event = Event::SessionStarted {
            session_id: session.id,
            task_id: session.task_id.clone(),
            planned_ms,
            at: now,
        };
        info!(session_id = %session.id, task_id = %session.task_id, planned_ms, "session started");

        self.commit(ControllerState::Running(session))?;
        self.observed_remaining_ms = planned_ms;
        self.schedule_alert(planned_ms);
        Ok(self.emit(event))
    }

    /// Fold the running stretch into the committed work and stop the clock.
    ///
    /// A session whose budget already ran out completes instead.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] unless running.
    pub fn pause(&mut self) -> Result<Event, SessionError> {
        let ControllerState::Running(current) = &self.state else {
            return Err(self.invalid("pause"));
        };
        let now = self.clock.now();
        let in_flight = self.in_flight_ms(current, now);
        if in_flight >= current.uncommitted_budget_ms() {
            return self.complete_expired();
        }

        let mut session = current.clone();
        session.accumulated_ms += in_flight;
        session.paused_at = Some(now);
        let remaining_ms = session.uncommitted_budget_ms();
        let event = Event::SessionPaused {
            session_id: session.id,
            remaining_ms,
            at: now,
        };

        self.commit(ControllerState::Paused(session))?;
        self.observed_remaining_ms = remaining_ms;
        self.scheduler.cancel(COMPLETION_ALERT_ID);
        self.feedback.cue(FeedbackCue::Paused);
        info!(remaining_ms, "session paused");
        Ok(self.emit(event))
    }

    /// Re-anchor the clock at now and re-arm the alert for what is left.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] unless paused.
    pub fn resume(&mut self) -> Result<Event, SessionError> {
        let ControllerState::Paused(current) = &self.state else {
            return Err(self.invalid("resume"));
        };
        let now = self.clock.now();
        let mut session = current.clone();
        session.started_at = now;
        session.paused_at = None;
        let remaining_ms = session.uncommitted_budget_ms();
        let event = Event::SessionResumed {
            session_id: session.id,
            remaining_ms,
            at: now,
        };

        self.commit(ControllerState::Running(session))?;
        self.observed_remaining_ms = remaining_ms;
        self.schedule_alert(remaining_ms);
        self.feedback.cue(FeedbackCue::Resumed);
        info!(remaining_ms, "session resumed");
        Ok(self.emit(event))
    }

    /// Refresh the displayed remaining time and detect expiry.
    ///
    /// # Errors
    /// [`SessionError::Persistence`] if the completion could not be committed.
    pub fn tick(&mut self) -> Result<Option<Event>, SessionError> {
        let remaining_ms = self.state.remaining_ms(self.clock.now());
        self.observed_remaining_ms = remaining_ms;
        if self.tag() == SessionState::Running && remaining_ms == 0 {
            return self.complete_expired().map(Some);
        }
        debug!(remaining_ms, "tick");
        Ok(None)
    }

    /// Re-derive the state from stored timestamps after a gap in execution.
    ///
    /// Completes an expired running session exactly once; further calls
    /// are no-ops.
    ///
    /// # Errors
    /// [`SessionError::Persistence`] if the completion could not be committed.
    pub fn reconcile(&mut self) -> Result<Option<Event>, SessionError> {
        let now = self.clock.now();
        if let ControllerState::Running(session) = &self.state {
            let in_flight = self.in_flight_ms(session, now);
            if in_flight >= session.uncommitted_budget_ms() {
                info!(session_id = %session.id, "session expired while away");
                return self.complete_expired().map(Some);
            }
        }
        self.observed_remaining_ms = self.state.remaining_ms(now);
        debug!(state = %self.tag(), remaining_ms = self.observed_remaining_ms, "reconciled");
        Ok(None)
    }

    /// Finish the session now, keeping whatever was worked.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] unless running or paused.
    pub fn end(&mut self) -> Result<Event, SessionError> {
        let now = self.clock.now();
        let mut session = match &self.state {
            ControllerState::Running(current) => {
                let in_flight = self.in_flight_ms(current, now);
                if in_flight >= current.uncommitted_budget_ms() {
                    return self.complete_expired();
                }
                let mut session = current.clone();
                session.accumulated_ms += in_flight;
                session
            }
            ControllerState::Paused(current) => current.clone(),
            _ => return Err(self.invalid("end")),
        };
        session.paused_at = None;
        session.completed_at = Some(now);
        session.completion = Some(CompletionKind::EndedEarly);
        let event = Event::SessionCompleted {
            session: session.clone(),
            kind: CompletionKind::EndedEarly,
            at: now,
        };
        info!(session_id = %session.id, worked_ms = session.accumulated_ms, "session ended early");

        self.commit(ControllerState::Completed {
            session,
            acknowledged: false,
        })?;
        self.observed_remaining_ms = 0;
        self.scheduler.cancel(COMPLETION_ALERT_ID);
        self.feedback.cue(FeedbackCue::Ended);
        Ok(self.emit(event))
    }

    /// Mark a completed session as shown to the user.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] unless completed.
    pub fn acknowledge(&mut self) -> Result<Event, SessionError> {
        let ControllerState::Completed { session, .. } = &self.state else {
            return Err(self.invalid("acknowledge"));
        };
        let event = Event::CompletionAcknowledged {
            session_id: session.id,
            at: self.clock.now(),
        };
        let session = session.clone();
        self.commit(ControllerState::Completed {
            session,
            acknowledged: true,
        })?;
        Ok(self.emit(event))
    }

    /// Drop any session and the stored snapshot.
    ///
    /// # Errors
    /// [`SessionError::Persistence`] if the snapshot could not be removed;
    /// the controller keeps its state in that case, or takes the stored one
    /// if another process changed it.
    pub fn reset(&mut self) -> Result<Event, SessionError> {
        if let Err(e) = self.store.clear() {
            if matches!(e, PersistenceError::Conflict) {
                self.adopt_stored();
            }
            return Err(e.into());
        }
        self.scheduler.cancel(COMPLETION_ALERT_ID);
        self.state = ControllerState::Idle;
        self.observed_remaining_ms = 0;
        info!("session reset");
        let event = Event::SessionReset {
            at: self.clock.now(),
        };
        Ok(self.emit(event))
    }

    /// Seed the controller from a stored blob. Missing, malformed or
    /// inconsistent snapshots yield `Idle`. Run [`reconcile`](Self::reconcile)
    /// afterwards before using the controller.
    pub fn restore_from_snapshot(&mut self, blob: Option<&[u8]>) -> SessionState {
        self.restore(blob);
        self.tag()
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Returns `false` when a blob was present but rejected.
    fn restore(&mut self, blob: Option<&[u8]>) -> bool {
        let (restored, accepted) = match blob {
            None => {
                debug!("no session snapshot stored");
                (None, true)
            }
            Some(bytes) => match SessionSnapshot::decode(bytes) {
                Ok(snapshot) => {
                    let revision = snapshot.revision;
                    match snapshot.into_state() {
                        Ok(state) => (Some((state, revision)), true),
                        Err(e) => {
                            warn!(error = %e, "discarding inconsistent session snapshot");
                            (None, false)
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "discarding unreadable session snapshot");
                    (None, false)
                }
            },
        };

        let (state, revision) = restored.unwrap_or((ControllerState::Idle, 0));
        self.state = state;
        self.revision = revision;
        self.observed_remaining_ms = self.state.remaining_ms(self.clock.now());
        info!(state = %self.tag(), revision, "session restored");
        accepted
    }

    /// Write `next` and only then adopt it.
    fn commit(&mut self, next: ControllerState) -> Result<(), SessionError> {
        let revision = self.revision + 1;
        let blob = SessionSnapshot::capture(&next, revision)
            .encode()
            .map_err(PersistenceError::from)?;
        if let Err(e) = self.store.save(&blob) {
            if matches!(e, PersistenceError::Conflict) {
                self.adopt_stored();
            }
            return Err(e.into());
        }
        self.state = next;
        self.revision = revision;
        Ok(())
    }

    /// Another process committed since our last read. Its state wins.
    fn adopt_stored(&mut self) {
        warn!(
            revision = self.revision,
            "session snapshot changed by another process; reloading"
        );
        match self.store.load() {
            Ok(blob) => {
                self.restore(blob.as_deref());
            }
            Err(e) => warn!(error = %e, "could not reload session snapshot"),
        }
    }

    /// The budget ran out while running. The session is credited with the
    /// full plan and `completed_at` is the instant it ran out, which may be
    /// long before the host noticed. The pending alert is left alone: it
    /// fires at that same instant.
    fn complete_expired(&mut self) -> Result<Event, SessionError> {
        let ControllerState::Running(current) = &self.state else {
            return Err(self.invalid("complete"));
        };
        let mut session = current.clone();
        let ran_out_at: DateTime<Utc> = session
            .started_at
            .checked_add_signed(ms_to_duration(session.uncommitted_budget_ms()))
            .unwrap_or_else(|| self.clock.now());
        session.accumulated_ms = session.planned_ms;
        session.completed_at = Some(ran_out_at);
        session.completion = Some(CompletionKind::Expired);
        let event = Event::SessionCompleted {
            session: session.clone(),
            kind: CompletionKind::Expired,
            at: ran_out_at,
        };
        info!(session_id = %session.id, "session completed");

        self.commit(ControllerState::Completed {
            session,
            acknowledged: false,
        })?;
        self.observed_remaining_ms = 0;
        self.feedback.cue(FeedbackCue::Completed);
        Ok(self.emit(event))
    }

    fn in_flight_ms(&self, session: &WorkSession, now: DateTime<Utc>) -> u64 {
        elapsed_ms(session.started_at, now).unwrap_or_else(|skew| {
            warn!(
                behind_ms = skew.behind_ms,
                "wall clock is behind the session anchor; counting no elapsed time"
            );
            0
        })
    }

    fn schedule_alert(&mut self, after_ms: u64) {
        let fire_after = Duration::from_millis(after_ms);
        if let Err(e) = self
            .scheduler
            .schedule(COMPLETION_ALERT_ID, fire_after, &self.payload)
        {
            warn!(error = %e, "completion alert not scheduled");
        }
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            operation,
            state: self.tag(),
        }
    }

    fn emit(&mut self, event: Event) -> Event {
        self.events.push(event.clone());
        event
    }
}
