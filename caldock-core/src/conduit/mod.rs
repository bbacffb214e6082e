//! The conduit: everything between the desktop store and the handheld.
//!
//! `session` drives the callback protocol; `transcode` and `recurrence`
//! translate individual components; `id_map`, `change_set`, `mode` and
//! `split` carry the per-pairing state the protocol runs on.

mod change_set;
mod id_map;
mod mode;
pub mod recurrence;
mod session;
mod split;
mod transcode;

pub use change_set::ChangeSet;
pub use id_map::IdentifierMap;
pub use mode::{decide, SyncMode};
pub use session::{
    Comparison, Conduit, LocalRecord, PassReport, RecordCursor, RecordHandle, SessionConfig,
    SessionState, SyncCounts, SyncSession,
};
pub use split::split_changes;
pub use transcode::{desktop_to_device, device_to_desktop, status_for, TranscodeOutcome};
