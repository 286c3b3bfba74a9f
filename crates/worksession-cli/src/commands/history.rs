use clap::Subcommand;
use serde::Serialize;
use worksession_core::{format_duration, SessionRecord};

use super::Host;

#[derive(Subcommand)]
pub enum HistoryAction {
    /// List recorded sessions, newest first
    List {
        /// Only sessions for this task
        #[arg(long)]
        task: Option<String>,
        /// Maximum number of sessions
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Total time worked on a task
    Total {
        /// Task ID
        task: String,
    },
    /// Remove a recorded session
    Remove {
        /// Session ID
        id: String,
    },
}

#[derive(Serialize)]
struct HistoryRow<'a> {
    #[serde(flatten)]
    record: &'a SessionRecord,
    fulfilled: bool,
    worked: String,
}

pub fn run(action: HistoryAction) -> Result<(), Box<dyn std::error::Error>> {
    let (host, mut controller) = Host::open()?;
    host.record(&controller.drain_events())?;

    match action {
        HistoryAction::List { task, limit } => {
            let records = host.db.list_sessions(task.as_deref(), limit)?;
            let rows: Vec<HistoryRow<'_>> = records
                .iter()
                .map(|record| HistoryRow {
                    record,
                    fulfilled: record.is_fulfilled(),
                    worked: format_duration(record.worked_ms),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        HistoryAction::Total { task } => {
            let worked_ms = host.db.task_worked_ms(&task)?;
            let total = serde_json::json!({
                "task_id": task,
                "worked_ms": worked_ms,
                "worked": format_duration(worked_ms),
            });
            println!("{}", serde_json::to_string_pretty(&total)?);
        }
        HistoryAction::Remove { id } => {
            if !host.db.remove_session(&id)? {
                return Err(format!("no recorded session with id {id}").into());
            }
            println!("removed {id}");
        }
    }

    Ok(host.deliver_alerts()?)
}
