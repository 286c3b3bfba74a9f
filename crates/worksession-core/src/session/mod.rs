//! The tracked work session: data model, state machine and snapshot format.

mod controller;
mod format;
mod model;
mod snapshot;
mod state;

pub use controller::SessionController;
pub use format::{format_clock, format_duration};
pub use model::{CompletionKind, WorkSession};
pub use snapshot::{SessionSnapshot, SNAPSHOT_SCHEMA_VERSION};
pub use state::{ControllerState, SessionState};
