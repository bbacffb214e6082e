//! Sync engine between a directory of .ics files and a handheld datebook.
//!
//! The engine is driven from outside: a device transport opens a
//! [`conduit::SyncSession`] over a [`store::CalendarStore`] and walks the
//! callback protocol ([`conduit::Conduit`]) one record at a time. Everything
//! the pass needs between callbacks lives in the session; everything that
//! must survive between passes (the identifier map, the last-synced store
//! URI, per-token change snapshots) lives in the state directory.

pub mod conduit;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod ics;
pub mod store;

pub use config::ConduitConfig;
pub use error::{ConduitError, ConduitResult};
pub use event::{Classification, Event, EventTime, Recurrence, Reminder};
