//! # Worksession Core Library
//!
//! Core logic for a pausable work-session timer bound to a task. The
//! standalone `worksession` CLI is a thin layer over this crate; any other
//! host (a desktop shell, a daemon) drives the same controller.
//!
//! ## Architecture
//!
//! - **Session controller**: a wall-clock state machine. Remaining time is
//!   always derived from stored timestamps, so a host that is suspended,
//!   killed or relaunched recovers the exact state with `reconcile()`.
//! - **Snapshot stores**: one versioned JSON blob, written before every
//!   in-memory transition.
//! - **Notifications**: a single completion alert, scheduled on start and
//!   resume and cancelled on pause, end and reset.
//! - **Storage**: SQLite history ledger and TOML configuration.
//!
//! ## Key Components
//!
//! - [`SessionController`]: the state machine
//! - [`SessionRuntime`]: tokio host running the display tick loop
//! - [`Database`]: completed-session ledger and focus statistics
//! - [`Config`]: application configuration management

pub mod clock;
pub mod error;
pub mod events;
pub mod feedback;
pub mod notify;
pub mod runtime;
pub mod session;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ClockSkewError, ConfigError, CoreError, DatabaseError, PersistenceError, SchedulingError,
    SessionError,
};
pub use events::Event;
pub use feedback::{FeedbackCue, NoFeedback, SessionFeedback};
pub use notify::{
    DbAlertScheduler, NoopScheduler, NotificationPayload, NotificationScheduler,
    COMPLETION_ALERT_ID,
};
pub use runtime::SessionRuntime;
pub use session::{
    format_clock, format_duration, CompletionKind, ControllerState, SessionController,
    SessionSnapshot, SessionState, WorkSession,
};
pub use storage::{
    Config, Database, FileSnapshotStore, FocusPolicy, FocusStats, KvSnapshotStore,
    MemorySnapshotStore, SessionRecord, SnapshotStore,
};
