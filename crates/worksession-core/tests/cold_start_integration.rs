//! End-to-end: SQLite-backed snapshot, alerts and history across relaunches.

use std::sync::Arc;
use std::time::Duration;

use worksession_core::{
    Clock, CompletionKind, Config, Database, DbAlertScheduler, Event, FocusPolicy, KvSnapshotStore,
    ManualClock, PersistenceError, SessionController, SessionError, SessionState,
    COMPLETION_ALERT_ID,
};

fn launch(db: &Database, clock: &ManualClock) -> SessionController {
    let clock: Arc<ManualClock> = Arc::new(clock.clone());
    SessionController::new(
        clock.clone(),
        Box::new(KvSnapshotStore::new(db.clone())),
        Box::new(DbAlertScheduler::new(db.clone(), clock)),
    )
    .with_payload(Config::default().notification_payload())
    .open()
}

fn record_completions(db: &Database, controller: &mut SessionController) -> usize {
    let mut recorded = 0;
    for event in controller.drain_events() {
        if let Event::SessionCompleted { session, .. } = event {
            db.record_session(&session).unwrap();
            recorded += 1;
        }
    }
    recorded
}

#[test]
fn session_expires_while_process_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worksession.db");
    let clock = ManualClock::starting_now();

    {
        let db = Database::open_at(&path).unwrap();
        let mut c = launch(&db, &clock);
        c.start("task-7", Duration::from_secs(25 * 60)).unwrap();
        let pending = db.pending_alerts().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, COMPLETION_ALERT_ID);
        assert_eq!(pending[0].title, "Timer Complete!");
    }

    clock.advance_secs(40 * 60);

    let db = Database::open_at(&path).unwrap();
    let mut c = launch(&db, &clock);
    assert_eq!(c.tag(), SessionState::Completed);
    assert!(c.needs_acknowledgement());
    assert_eq!(record_completions(&db, &mut c), 1);

    let due = db.take_due_alerts(clock.now()).unwrap();
    assert_eq!(due.len(), 1);
    assert!(db.take_due_alerts(clock.now()).unwrap().is_empty());

    let history = db.list_sessions(Some("task-7"), 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].completion, CompletionKind::Expired);
    assert_eq!(history[0].worked_ms, 25 * 60_000);

    // A further launch finds the completion already handled.
    let mut again = launch(&db, &clock);
    assert_eq!(record_completions(&db, &mut again), 0);
}

#[test]
fn pause_cancels_alert_and_resume_rearms_it() {
    let db = Database::open_memory().unwrap();
    let clock = ManualClock::starting_now();
    let mut c = launch(&db, &clock);

    c.start("task-1", Duration::from_secs(600)).unwrap();
    clock.advance_secs(120);
    c.pause().unwrap();
    assert!(db.pending_alerts().unwrap().is_empty());

    clock.advance_secs(3600);
    c.resume().unwrap();
    let pending = db.pending_alerts().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].fire_at, clock.now() + chrono::Duration::seconds(480));
}

#[test]
fn focus_stats_follow_partial_session_policy() {
    let db = Database::open_memory().unwrap();
    let clock = ManualClock::starting_now();
    let mut c = launch(&db, &clock);

    c.start("task-1", Duration::from_secs(600)).unwrap();
    clock.advance_secs(600);
    c.tick().unwrap();

    c.start("task-2", Duration::from_secs(600)).unwrap();
    clock.advance_secs(240);
    c.end().unwrap();
    assert_eq!(record_completions(&db, &mut c), 2);

    let counted = db.focus_stats(FocusPolicy::default(), clock.now()).unwrap();
    assert_eq!(counted.total_sessions, 2);
    assert_eq!(counted.fulfilled_sessions, 1);
    assert_eq!(counted.focus_ms, 840_000);

    let strict = FocusPolicy {
        count_partial_sessions: false,
    };
    assert_eq!(db.focus_stats(strict, clock.now()).unwrap().focus_ms, 600_000);
    assert_eq!(db.task_worked_ms("task-2").unwrap(), 240_000);
}

#[test]
fn reset_leaves_nothing_behind() {
    let db = Database::open_memory().unwrap();
    let clock = ManualClock::starting_now();
    let mut c = launch(&db, &clock);
    c.start("task-1", Duration::from_secs(600)).unwrap();
    c.reset().unwrap();

    assert!(db.pending_alerts().unwrap().is_empty());
    assert!(db.kv_get_blob(KvSnapshotStore::DEFAULT_KEY).unwrap().is_none());
    assert_eq!(launch(&db, &clock).tag(), SessionState::Idle);
}

#[test]
fn stale_controller_cannot_overwrite_newer_snapshot() {
    let db = Database::open_memory().unwrap();
    let clock = ManualClock::starting_now();
    let mut watcher = launch(&db, &clock);
    watcher.start("task-1", Duration::from_secs(600)).unwrap();

    // A second invocation pauses while the first is still holding the session.
    let mut other = launch(&db, &clock);
    clock.advance_secs(120);
    other.pause().unwrap();

    clock.advance_secs(600);
    let err = watcher.tick().unwrap_err();
    assert!(matches!(err, SessionError::Persistence(PersistenceError::Conflict)));
    assert_eq!(watcher.tag(), SessionState::Paused);
    assert_eq!(watcher.remaining_ms(), 480_000);
    assert!(!watcher.drain_events().iter().any(Event::is_completion));

    let relaunched = launch(&db, &clock);
    assert_eq!(relaunched.tag(), SessionState::Paused);
    assert_eq!(relaunched.remaining_ms(), 480_000);
    assert!(db.pending_alerts().unwrap().is_empty());
}

#[test]
fn stale_reset_does_not_drop_newer_session() {
    let db = Database::open_memory().unwrap();
    let clock = ManualClock::starting_now();
    let mut stale = launch(&db, &clock);

    let mut other = launch(&db, &clock);
    other.start("task-2", Duration::from_secs(600)).unwrap();

    assert!(stale.reset().is_err());
    assert_eq!(stale.tag(), SessionState::Running);
    assert_eq!(launch(&db, &clock).tag(), SessionState::Running);

    // Having caught up, the same controller can reset.
    stale.reset().unwrap();
    assert_eq!(launch(&db, &clock).tag(), SessionState::Idle);
}
