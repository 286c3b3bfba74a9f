pub mod config;
pub mod history;
pub mod session;
pub mod stats;

use std::sync::Arc;

use chrono::Utc;
use worksession_core::{
    Clock, Config, CoreError, Database, DbAlertScheduler, Event, FeedbackCue, KvSnapshotStore,
    NoopScheduler, NotificationScheduler, SessionController, SessionFeedback, SystemClock,
};

/// Everything one invocation needs besides the controller itself.
pub struct Host {
    pub db: Database,
    pub config: Config,
}

impl Host {
    /// Open the database and config and bring the stored session up to date.
    /// A session that expired since the last invocation completes here.
    pub fn open() -> Result<(Self, SessionController), CoreError> {
        let db = Database::open()?;
        let config = Config::load_or_default();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let scheduler: Box<dyn NotificationScheduler> = if config.notifications.enabled {
            Box::new(DbAlertScheduler::new(db.clone(), Arc::clone(&clock)))
        } else {
            Box::new(NoopScheduler)
        };
        let controller = SessionController::new(
            clock,
            Box::new(KvSnapshotStore::new(db.clone())),
            scheduler,
        )
        .with_payload(config.notification_payload())
        .with_feedback(Box::new(TerminalBell {
            enabled: config.notifications.sound,
        }))
        .open();

        Ok((Self { db, config }, controller))
    }

    /// Write finished sessions to the history ledger.
    pub fn record(&self, events: &[Event]) -> Result<(), CoreError> {
        for event in events {
            if let Event::SessionCompleted { session, .. } = event {
                let record = self.db.record_session(session)?;
                tracing::info!(
                    session_id = %record.id,
                    worked_ms = record.worked_ms,
                    "session recorded"
                );
            }
        }
        Ok(())
    }

    /// Show alerts whose time has come. Alerts are printed to stderr so
    /// stdout stays machine readable.
    pub fn deliver_alerts(&self) -> Result<(), CoreError> {
        for alert in self.db.take_due_alerts(Utc::now())? {
            eprintln!("{}: {}", alert.title, alert.body);
        }
        Ok(())
    }
}

/// Rings the terminal bell when a session finishes.
struct TerminalBell {
    enabled: bool,
}

impl SessionFeedback for TerminalBell {
    fn cue(&mut self, cue: FeedbackCue) {
        if self.enabled && matches!(cue, FeedbackCue::Completed | FeedbackCue::Ended) {
            eprint!("\x07");
        }
    }
}
