//! The set of desktop-side changes a sync pass still has to push.

use std::collections::BTreeMap;
use std::ops::Bound;

use tracing::debug;

use crate::conduit::IdentifierMap;
use crate::store::{ChangeEntry, ChangeKind};

/// Desktop changes indexed by UID for one sync pass. Entries are held in
/// UID order so iteration is deterministic; a cursor can keep walking
/// even while processed entries are cleared out from under it.
#[derive(Default)]
pub struct ChangeSet {
    entries: BTreeMap<String, ChangeEntry>,
    skipped_archived: usize,
}

impl ChangeSet {
    /// Index the store's changes. Changes to events whose device binding
    /// is archived are not pushed again; their deletions still are, so
    /// the binding can be retired.
    pub fn build(changes: Vec<ChangeEntry>, map: &IdentifierMap) -> ChangeSet {
        let mut set = ChangeSet::default();

        for change in changes {
            let archived = map
                .id_for(&change.uid)
                .is_some_and(|id| map.is_archived(id));
            if archived && change.kind != ChangeKind::Deleted {
                debug!(uid = %change.uid, "Skipping change to archived event");
                set.skipped_archived += 1;
                continue;
            }
            set.entries.insert(change.uid.clone(), change);
        }

        set
    }

    pub fn get(&self, uid: &str) -> Option<&ChangeEntry> {
        self.entries.get(uid)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.entries.contains_key(uid)
    }

    /// The first entry strictly after `uid`, or the first entry overall
    /// when no cursor position is given. Works whether or not the cursor
    /// entry itself has been cleared.
    pub fn next_after(&self, uid: Option<&str>) -> Option<&ChangeEntry> {
        match uid {
            None => self.entries.values().next(),
            Some(uid) => self
                .entries
                .range::<str, _>((Bound::Excluded(uid), Bound::Unbounded))
                .map(|(_, entry)| entry)
                .next(),
        }
    }

    /// Drop a processed entry. Clearing an absent UID is a no-op, so
    /// retrying a pass segment cannot fail here.
    pub fn clear(&mut self, uid: &str) -> bool {
        self.entries.remove(uid).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn skipped_archived(&self) -> usize {
        self.skipped_archived
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let mut added = 0;
        let mut modified = 0;
        let mut deleted = 0;
        for entry in self.entries.values() {
            match entry.kind {
                ChangeKind::Added => added += 1,
                ChangeKind::Modified => modified += 1,
                ChangeKind::Deleted => deleted += 1,
            }
        }
        (added, modified, deleted)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Classification, Event, EventTime};
    use chrono::NaiveDate;

    fn event(uid: &str) -> Event {
        Event {
            uid: uid.to_string(),
            summary: uid.to_uppercase(),
            description: None,
            location: None,
            start: EventTime::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
            end: EventTime::Date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()),
            classification: Classification::Public,
            category: None,
            recurrence: None,
            recurrence_id: None,
            reminders: vec![],
            updated: None,
        }
    }

    fn changes() -> Vec<ChangeEntry> {
        vec![
            ChangeEntry::added(event("a")),
            ChangeEntry::modified(event("b")),
            ChangeEntry::deleted("c"),
        ]
    }

    #[test]
    fn test_counts_by_kind() {
        let set = ChangeSet::build(changes(), &IdentifierMap::new());
        assert_eq!(set.counts(), (1, 1, 1));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut set = ChangeSet::build(changes(), &IdentifierMap::new());
        assert!(set.clear("b"));
        assert!(!set.clear("b"));
        assert!(!set.clear("never-existed"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.counts(), (1, 0, 1));
    }

    #[test]
    fn test_cursor_survives_clearing_its_entry() {
        let mut set = ChangeSet::build(changes(), &IdentifierMap::new());

        let first = set.next_after(None).unwrap().uid.clone();
        assert_eq!(first, "a");
        set.clear(&first);

        // The cursor still advances past the cleared position.
        let second = set.next_after(Some(&first)).unwrap().uid.clone();
        assert_eq!(second, "b");
        let third = set.next_after(Some(&second)).unwrap().uid.clone();
        assert_eq!(third, "c");
        assert!(set.next_after(Some(&third)).is_none());
    }

    #[test]
    fn test_archived_bindings_filter_all_but_deletions() {
        let mut map = IdentifierMap::new();
        map.insert(10, "a".into());
        map.insert(11, "c".into());
        map.set_archived(10, true);
        map.set_archived(11, true);

        let set = ChangeSet::build(changes(), &map);
        assert!(!set.contains("a"), "archived add must not be pushed");
        assert!(set.contains("b"));
        assert!(set.contains("c"), "deletion of archived event still flows");
        assert_eq!(set.skipped_archived(), 1);
    }
}
