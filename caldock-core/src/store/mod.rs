//! Desktop calendar store abstraction.
//!
//! The conduit engine talks to the desktop calendar through [`CalendarStore`]
//! and never touches files directly. [`DirStore`] is the production
//! implementation (a directory of `.ics` files); [`MemoryStore`] backs tests
//! and embedders that keep events elsewhere.

mod dir;
mod memory;
mod snapshot;

pub use dir::DirStore;
pub use memory::MemoryStore;
pub use snapshot::{hash_event, ChangeSnapshot};

use crate::error::ConduitResult;
use crate::event::Event;

/// What happened to a component since the last successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One change-log entry for one sync pass.
///
/// Deleted entries may have no component body: once a file is gone the store
/// only remembers that the UID used to exist.
#[derive(Debug, Clone)]
pub struct ChangeEntry {
    pub uid: String,
    pub kind: ChangeKind,
    pub event: Option<Event>,
}

impl ChangeEntry {
    pub fn added(event: Event) -> Self {
        ChangeEntry {
            uid: event.uid.clone(),
            kind: ChangeKind::Added,
            event: Some(event),
        }
    }

    pub fn modified(event: Event) -> Self {
        ChangeEntry {
            uid: event.uid.clone(),
            kind: ChangeKind::Modified,
            event: Some(event),
        }
    }

    pub fn deleted(uid: impl Into<String>) -> Self {
        ChangeEntry {
            uid: uid.into(),
            kind: ChangeKind::Deleted,
            event: None,
        }
    }
}

/// The desktop calendar store as the conduit sees it.
///
/// `changes_since`/`commit_changes` implement the "changes since the last
/// successful sync" query: each sync token owns an independent snapshot, so
/// several conduits (one per device) can track the same store without
/// stepping on each other.
pub trait CalendarStore {
    /// Stable identity of this store, recorded as the last-synced URI.
    fn uri(&self) -> String;

    /// Open the store. Failure here is fatal to a sync pass.
    fn open(&mut self) -> ConduitResult<()>;

    /// Every component currently in the store.
    fn events(&self) -> ConduitResult<Vec<Event>>;

    /// Look up one component by UID.
    fn get(&self, uid: &str) -> ConduitResult<Option<Event>>;

    fn create(&mut self, event: &Event) -> ConduitResult<()>;

    fn update(&mut self, uid: &str, event: &Event) -> ConduitResult<()>;

    /// Remove a component. Removing an absent UID is a no-op.
    fn delete(&mut self, uid: &str) -> ConduitResult<()>;

    /// Components added/modified/deleted since the last `commit_changes`
    /// for this token.
    fn changes_since(&self, token: &str) -> ConduitResult<Vec<ChangeEntry>>;

    /// Mark the store's current contents as fully synced for this token.
    fn commit_changes(&mut self, token: &str) -> ConduitResult<()>;
}
