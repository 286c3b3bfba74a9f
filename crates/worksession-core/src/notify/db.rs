use std::sync::Arc;
use std::time::Duration;

use super::{NotificationPayload, NotificationScheduler, ScheduledAlert};
use crate::clock::Clock;
use crate::error::SchedulingError;
use crate::storage::Database;

/// Pins alerts to an absolute time in the `scheduled_alerts` table.
///
/// Hosts that are not running when the alert is due (a one-shot CLI) deliver
/// it on their next start with [`Database::take_due_alerts`].
pub struct DbAlertScheduler {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl DbAlertScheduler {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

impl NotificationScheduler for DbAlertScheduler {
    fn schedule(
        &mut self,
        id: &str,
        fire_after: Duration,
        payload: &NotificationPayload,
    ) -> Result<(), SchedulingError> {
        let delay = chrono::Duration::from_std(fire_after)
            .map_err(|e| SchedulingError::Failed(e.to_string()))?;
        let now = self.clock.now();
        let fire_at = now.checked_add_signed(delay).ok_or_else(|| {
            SchedulingError::Failed(format!("fire time {fire_after:?} after {now} is out of range"))
        })?;
        let alert = ScheduledAlert {
            id: id.to_string(),
            fire_at,
            title: payload.title.clone(),
            body: payload.body.clone(),
        };
        self.db
            .upsert_alert(&alert)
            .map_err(|e| SchedulingError::Failed(e.to_string()))
    }

    fn cancel(&mut self, id: &str) {
        if let Err(e) = self.db.delete_alert(id) {
            tracing::warn!(alert_id = id, error = %e, "failed to cancel alert");
        }
    }
}
