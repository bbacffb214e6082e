//! In-memory calendar store, used by embedders and tests.

use std::collections::{BTreeMap, HashMap};

use crate::error::ConduitResult;
use crate::event::Event;
use crate::store::{hash_event, CalendarStore, ChangeEntry, ChangeKind, ChangeSnapshot};

/// A `CalendarStore` held entirely in memory. Change tokens map to the
/// set of event hashes seen at the last commit, so `changes_since`
/// behaves like the directory store without touching the filesystem.
#[derive(Default)]
pub struct MemoryStore {
    uri: String,
    events: BTreeMap<String, Event>,
    committed: HashMap<String, HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new(uri: impl Into<String>) -> Self {
        MemoryStore {
            uri: uri.into(),
            events: BTreeMap::new(),
            committed: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl CalendarStore for MemoryStore {
    fn uri(&self) -> String {
        self.uri.clone()
    }

    fn open(&mut self) -> ConduitResult<()> {
        Ok(())
    }

    fn events(&self) -> ConduitResult<Vec<Event>> {
        Ok(self.events.values().cloned().collect())
    }

    fn get(&self, uid: &str) -> ConduitResult<Option<Event>> {
        Ok(self.events.get(uid).cloned())
    }

    fn create(&mut self, event: &Event) -> ConduitResult<()> {
        self.events.insert(event.uid.clone(), event.clone());
        Ok(())
    }

    fn update(&mut self, uid: &str, event: &Event) -> ConduitResult<()> {
        self.events.remove(uid);
        self.events.insert(event.uid.clone(), event.clone());
        Ok(())
    }

    fn delete(&mut self, uid: &str) -> ConduitResult<()> {
        self.events.remove(uid);
        Ok(())
    }

    fn changes_since(&self, token: &str) -> ConduitResult<Vec<ChangeEntry>> {
        let entries = self.committed.get(token).cloned().unwrap_or_default();
        let snapshot = ChangeSnapshot::from_entries(entries);
        Ok(snapshot.diff(&self.events()?))
    }

    fn commit_changes(&mut self, token: &str) -> ConduitResult<()> {
        let hashes = self
            .events
            .values()
            .map(|event| (event.uid.clone(), hash_event(event)))
            .collect();
        self.committed.insert(token.to_string(), hashes);
        Ok(())
    }
}

/// Convenience for tests: apply a list of change entries to a store the
/// way a desktop application would.
pub fn apply_changes(store: &mut dyn CalendarStore, changes: &[ChangeEntry]) -> ConduitResult<()> {
    for change in changes {
        match (&change.kind, &change.event) {
            (ChangeKind::Added, Some(event)) => store.create(event)?,
            (ChangeKind::Modified, Some(event)) => store.update(&change.uid, event)?,
            (ChangeKind::Deleted, _) => store.delete(&change.uid)?,
            _ => {}
        }
    }
    Ok(())
}
