//! Recurring class calendar: session generation, reconciliation against
//! persisted sessions, and the attendance hook that runs when a session's
//! status changes.
//!
//! Everything in here is pure. Callers load inputs from storage, call in,
//! and persist whatever comes back.

pub mod attendance;
pub mod generator;
pub mod holidays;
pub mod model;
pub mod reconcile;

pub use attendance::{on_session_status_change, AttendanceChanges, PlaceholderDefaults};
pub use generator::{generate_sessions, GenerateOptions};
pub use model::*;
pub use reconcile::{reconcile, snapshot_token, SessionDiff};
