mod config;
pub mod database;
pub mod migrations;
pub mod store;

pub use config::{Config, NotificationsConfig, SessionConfig, StatsConfig};
pub use database::{Database, FocusPolicy, FocusStats, SessionRecord};
pub use store::{FileSnapshotStore, KvSnapshotStore, MemorySnapshotStore, SnapshotStore};

use std::path::PathBuf;

use crate::error::DatabaseError;

/// Returns the data directory, creating it if needed.
///
/// `WORKSESSION_DATA_DIR` overrides the location outright. Otherwise the
/// directory is `~/.config/worksession[-dev]/`, with `WORKSESSION_ENV=dev`
/// selecting the development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, DatabaseError> {
    let dir = match std::env::var_os("WORKSESSION_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("WORKSESSION_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("worksession-dev")
            } else {
                base_dir.join("worksession")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| DatabaseError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
