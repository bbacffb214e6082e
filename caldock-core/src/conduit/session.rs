//! The sync session: one pass of the callback protocol.
//!
//! A session walks `Idle -> PreSync -> Iterating -> PostSync -> Idle` per
//! pass. The device transport drives it through the [`Conduit`] trait, one
//! synchronous call at a time; a fatal store or I/O error drops the session
//! into `Failed`, where every further call is refused and the previously
//! persisted identifier map stays as it was.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::conduit::{mode, split, transcode, ChangeSet, IdentifierMap, SyncMode};
use crate::device::{CategoryTable, DeviceRecord, RecordStatus};
use crate::error::{ConduitError, ConduitResult};
use crate::event::Event;
use crate::store::{CalendarStore, ChangeKind};

/// The callback surface the device transport drives. Each method is one
/// synchronous callback; none blocks longer than one record transcoding.
pub trait Conduit {
    /// Open the pass: load state, detect changes, decide the mode.
    fn pre_sync(&mut self) -> ConduitResult<SyncCounts>;

    /// Cursor over every desktop component.
    fn enumerate_all(&mut self) -> ConduitResult<RecordCursor>;
    fn next(&mut self, cursor: &mut RecordCursor) -> ConduitResult<Option<LocalRecord>>;

    /// Cursor over the pass's change set only.
    fn enumerate_changed(&mut self) -> ConduitResult<RecordCursor>;
    fn next_changed(&mut self, cursor: &mut RecordCursor) -> ConduitResult<Option<LocalRecord>>;

    /// Byte-exact comparison of the component's encoding against a device
    /// payload.
    fn compare(&mut self, local: RecordHandle, device_payload: &[u8]) -> ConduitResult<Comparison>;

    /// Decode a device record into a fresh desktop component; returns the
    /// new UID for mapping.
    fn add(&mut self, record: &DeviceRecord) -> ConduitResult<String>;

    /// Overwrite an existing desktop component with a device record.
    fn replace(&mut self, local: RecordHandle, record: &DeviceRecord) -> ConduitResult<()>;

    /// Remove the desktop component and purge its map binding. Also used
    /// to retire the binding of a component already deleted desktop-side.
    fn delete(&mut self, local: RecordHandle) -> ConduitResult<()>;

    /// Flip the archived bit on the component's binding; the desktop
    /// component itself stays.
    fn archive(&mut self, local: RecordHandle, flag: bool) -> ConduitResult<()>;

    /// Reverse lookup: device record ID to (materialized) local record.
    fn match_by_device_id(&mut self, device_id: u32) -> ConduitResult<Option<LocalRecord>>;

    /// Bind a device-assigned ID to this component.
    fn set_device_id(&mut self, local: RecordHandle, id: u32) -> ConduitResult<()>;

    /// Drop the component from the change set. Idempotent.
    fn clear_status(&mut self, local: RecordHandle) -> ConduitResult<()>;

    /// Forward transcode for upload.
    fn encode(&mut self, local: RecordHandle) -> ConduitResult<Vec<u8>>;

    /// Free the arena slot behind a handle.
    fn release(&mut self, local: RecordHandle) -> ConduitResult<()>;

    /// Close the pass: persist the map and the store identity, absorb the
    /// pass's own writes, drop per-pass state.
    fn post_sync(&mut self) -> ConduitResult<PassReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    PreSync,
    Iterating,
    PostSync,
    Failed,
}

/// Index into the session's per-pass record arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHandle(usize);

/// What the transport sees of a desktop component.
#[derive(Debug, Clone)]
pub struct LocalRecord {
    pub handle: RecordHandle,
    pub uid: String,
    /// The bound device record ID, or 0 when none is assigned yet.
    pub device_id: u32,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
}

/// Iteration state handed back to the transport; each cursor is
/// independent and owns its own position.
#[derive(Debug, Clone)]
pub enum RecordCursor {
    All { position: usize },
    Changed { last_uid: Option<String> },
}

/// What `pre_sync` tells the driver about the pass ahead.
#[derive(Debug, Clone, Copy)]
pub struct SyncCounts {
    pub mode: SyncMode,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    /// Total desktop components after splitting.
    pub total: usize,
}

/// Everything recoverable that happened during one pass.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub mode: SyncMode,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    /// Device records whose payload would not decode.
    pub skipped_decode: usize,
    /// UIDs pushed as non-repeating because their rule did not fit.
    pub degraded_recurrences: Vec<String>,
    /// Map bindings evicted by last-writer-wins collisions.
    pub mapping_conflicts: usize,
    /// Bindings on file after the pass.
    pub bindings: usize,
}

/// Per-pass session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Change-log token identifying this device pairing.
    pub token: String,
    pub timezone: Tz,
    pub split_multi_day: bool,
    /// Where the identifier map and last-synced URI live.
    pub state_dir: PathBuf,
    pub categories: CategoryTable,
}

struct TranscodedRecord {
    uid: String,
    /// `None` for components with no body (deleted desktop-side, or
    /// cleared by `delete`).
    event: Option<Event>,
    kind: Option<ChangeKind>,
}

/// A sync session over one desktop store.
pub struct SyncSession<S: CalendarStore> {
    store: S,
    config: SessionConfig,
    state: SessionState,
    map: IdentifierMap,
    /// Snapshot of the store at PreSync (after splitting), by UID.
    events: HashMap<String, Event>,
    /// UIDs of the snapshot in iteration order.
    all_uids: Vec<String>,
    changes: ChangeSet,
    arena: Vec<Option<TranscodedRecord>>,
    mode: SyncMode,
    touched_only: bool,
    report: PassReport,
}

impl<S: CalendarStore> SyncSession<S> {
    pub fn new(store: S, config: SessionConfig) -> Self {
        SyncSession {
            store,
            config,
            state: SessionState::Idle,
            map: IdentifierMap::new(),
            events: HashMap::new(),
            all_uids: Vec::new(),
            changes: ChangeSet::default(),
            arena: Vec::new(),
            mode: SyncMode::Slow,
            touched_only: false,
            report: PassReport::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// What the pass has recovered from so far. `post_sync` returns the
    /// final report and resets this.
    pub fn report(&self) -> &PassReport {
        &self.report
    }

    fn expect(&self, wanted: SessionState, op: &str) -> ConduitResult<()> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(ConduitError::Protocol(format!(
                "{} called in {:?} state",
                op, self.state
            )))
        }
    }

    /// Store and I/O failures mid-pass are unrecoverable; everything else
    /// is the caller's to retry or skip.
    fn guard<T>(&mut self, result: ConduitResult<T>) -> ConduitResult<T> {
        match result {
            Err(err @ (ConduitError::Io(_) | ConduitError::Store(_))) => {
                warn!(%err, "Fatal store error, abandoning the pass");
                self.state = SessionState::Failed;
                Err(err)
            }
            other => other,
        }
    }

    fn slot(&self, handle: RecordHandle) -> ConduitResult<&TranscodedRecord> {
        self.arena
            .get(handle.0)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| ConduitError::Protocol(format!("stale record handle {}", handle.0)))
    }

    /// Park a component in the arena and describe it to the transport.
    fn materialize(
        &mut self,
        uid: &str,
        kind: Option<ChangeKind>,
        event: Option<Event>,
    ) -> LocalRecord {
        let device_id = self.map.id_for(uid).unwrap_or(0);
        if device_id != 0 {
            self.map.touch(device_id);
        }
        let status = kind.map(transcode::status_for).unwrap_or_default();

        let handle = RecordHandle(self.arena.len());
        self.arena.push(Some(TranscodedRecord {
            uid: uid.to_string(),
            event,
            kind,
        }));

        LocalRecord {
            handle,
            uid: uid.to_string(),
            device_id,
            status,
        }
    }

    fn encode_slot(&mut self, handle: RecordHandle) -> ConduitResult<Vec<u8>> {
        let slot = self.slot(handle)?;
        let Some(event) = slot.event.clone() else {
            return Err(ConduitError::Protocol(format!(
                "record '{}' has no body to encode",
                slot.uid
            )));
        };
        let uid = slot.uid.clone();
        let status = slot.kind.map(transcode::status_for).unwrap_or_default();

        let device_id = self.map.id_for(&uid).unwrap_or(0);
        let outcome = transcode::desktop_to_device(
            &event,
            status,
            device_id,
            &self.config.categories,
            &self.config.timezone,
        )?;
        if outcome.degraded_recurrence && !self.report.degraded_recurrences.contains(&uid) {
            self.report.degraded_recurrences.push(uid);
        }
        Ok(outcome.record.payload)
    }

    fn decode_record(
        &mut self,
        record: &DeviceRecord,
        existing: Option<&Event>,
    ) -> ConduitResult<Event> {
        match transcode::device_to_desktop(
            record,
            existing,
            &self.config.categories,
            &self.config.timezone,
        ) {
            Ok(event) => Ok(event),
            Err(err @ ConduitError::RecordDecode(_)) => {
                warn!(id = record.id, %err, "Skipping unreadable device record");
                self.report.skipped_decode += 1;
                Err(err)
            }
            Err(other) => Err(other),
        }
    }

    fn run_pre_sync(&mut self) -> ConduitResult<SyncCounts> {
        self.store.open()?;
        self.map = IdentifierMap::load(&self.config.state_dir);

        let uri = self.store.uri();
        let last_uri = IdentifierMap::load_last_uri(&self.config.state_dir);
        if last_uri.as_deref() != Some(uri.as_str()) && !self.map.is_empty() {
            warn!(uri, "Bindings belong to a different store, starting over");
            self.map.clear();
        }
        self.mode = mode::decide(&self.map, last_uri.as_deref(), &uri);
        // A slow pass re-derives every binding it still needs; the rest
        // are shed at save time.
        self.touched_only = !self.mode.is_fast();

        let changes = self.store.changes_since(&self.config.token)?;
        let changes = split::split_changes(
            &mut self.store,
            &self.config.timezone,
            changes,
            self.config.split_multi_day,
        )?;

        // Snapshot after splitting so fragments take part in the pass.
        let events = self.store.events()?;
        self.all_uids = events.iter().map(|e| e.uid.clone()).collect();
        self.all_uids.sort();
        self.events = events.into_iter().map(|e| (e.uid.clone(), e)).collect();

        self.changes = ChangeSet::build(changes, &self.map);
        let (added, modified, deleted) = self.changes.counts();
        self.report = PassReport {
            mode: self.mode,
            added,
            modified,
            deleted,
            ..PassReport::default()
        };

        info!(
            mode = %self.mode,
            total = self.all_uids.len(),
            added,
            modified,
            deleted,
            "Pass opened"
        );
        Ok(SyncCounts {
            mode: self.mode,
            added,
            modified,
            deleted,
            total: self.all_uids.len(),
        })
    }

    fn run_post_sync(&mut self) -> ConduitResult<PassReport> {
        self.map.save(&self.config.state_dir, self.touched_only)?;
        IdentifierMap::save_last_uri(&self.config.state_dir, &self.store.uri())?;
        // The pass's own writes must not surface as changes next time.
        self.store.commit_changes(&self.config.token)?;

        self.arena.clear();
        self.events.clear();
        self.all_uids.clear();
        self.changes = ChangeSet::default();

        let mut report = std::mem::take(&mut self.report);
        report.mode = self.mode;
        report.bindings = self.map.len();
        info!(
            bindings = report.bindings,
            conflicts = report.mapping_conflicts,
            skipped = report.skipped_decode,
            "Pass closed"
        );
        Ok(report)
    }
}

impl<S: CalendarStore> Conduit for SyncSession<S> {
    fn pre_sync(&mut self) -> ConduitResult<SyncCounts> {
        self.expect(SessionState::Idle, "pre_sync")?;
        self.state = SessionState::PreSync;
        match self.run_pre_sync() {
            Ok(counts) => {
                self.state = SessionState::Iterating;
                Ok(counts)
            }
            Err(err) => {
                warn!(%err, "Pass failed to open");
                self.state = SessionState::Failed;
                Err(err)
            }
        }
    }

    fn enumerate_all(&mut self) -> ConduitResult<RecordCursor> {
        self.expect(SessionState::Iterating, "enumerate_all")?;
        Ok(RecordCursor::All { position: 0 })
    }

    fn next(&mut self, cursor: &mut RecordCursor) -> ConduitResult<Option<LocalRecord>> {
        self.expect(SessionState::Iterating, "next")?;
        let RecordCursor::All { position } = cursor else {
            return Err(ConduitError::Protocol(
                "next needs a cursor from enumerate_all".to_string(),
            ));
        };

        let Some(uid) = self.all_uids.get(*position).cloned() else {
            return Ok(None);
        };
        *position += 1;

        let event = self.events.get(&uid).cloned();
        let kind = self.changes.get(&uid).map(|entry| entry.kind);
        Ok(Some(self.materialize(&uid, kind, event)))
    }

    fn enumerate_changed(&mut self) -> ConduitResult<RecordCursor> {
        self.expect(SessionState::Iterating, "enumerate_changed")?;
        Ok(RecordCursor::Changed { last_uid: None })
    }

    fn next_changed(&mut self, cursor: &mut RecordCursor) -> ConduitResult<Option<LocalRecord>> {
        self.expect(SessionState::Iterating, "next_changed")?;
        let RecordCursor::Changed { last_uid } = cursor else {
            return Err(ConduitError::Protocol(
                "next_changed needs a cursor from enumerate_changed".to_string(),
            ));
        };

        let Some(entry) = self.changes.next_after(last_uid.as_deref()) else {
            return Ok(None);
        };
        let uid = entry.uid.clone();
        let kind = entry.kind;
        let event = entry.event.clone();

        *last_uid = Some(uid.clone());
        Ok(Some(self.materialize(&uid, Some(kind), event)))
    }

    fn compare(&mut self, local: RecordHandle, device_payload: &[u8]) -> ConduitResult<Comparison> {
        self.expect(SessionState::Iterating, "compare")?;
        let bytes = self.encode_slot(local)?;
        Ok(if bytes == device_payload {
            Comparison::Equal
        } else {
            Comparison::NotEqual
        })
    }

    fn add(&mut self, record: &DeviceRecord) -> ConduitResult<String> {
        self.expect(SessionState::Iterating, "add")?;
        let event = self.decode_record(record, None)?;
        let uid = event.uid.clone();

        let result = self.store.create(&event);
        self.guard(result)?;
        self.events.insert(uid.clone(), event);

        if record.id != 0 {
            self.report.mapping_conflicts += self.map.insert(record.id, uid.clone());
        }
        debug!(uid, id = record.id, "Device record added to the store");
        Ok(uid)
    }

    fn replace(&mut self, local: RecordHandle, record: &DeviceRecord) -> ConduitResult<()> {
        self.expect(SessionState::Iterating, "replace")?;
        let slot = self.slot(local)?;
        let uid = slot.uid.clone();
        let Some(existing) = slot.event.clone() else {
            return Err(ConduitError::Protocol(format!(
                "record '{}' has no body to replace",
                uid
            )));
        };

        let merged = self.decode_record(record, Some(&existing))?;
        let result = self.store.update(&uid, &merged);
        self.guard(result)?;

        self.events.insert(uid.clone(), merged.clone());
        if let Some(slot) = self.arena.get_mut(local.0).and_then(|s| s.as_mut()) {
            slot.event = Some(merged);
        }

        if record.id != 0 {
            self.report.mapping_conflicts += self.map.insert(record.id, uid);
        }
        Ok(())
    }

    fn delete(&mut self, local: RecordHandle) -> ConduitResult<()> {
        self.expect(SessionState::Iterating, "delete")?;
        let uid = self.slot(local)?.uid.clone();

        let result = self.store.delete(&uid);
        self.guard(result)?;

        self.map.remove_by_uid(&uid);
        self.changes.clear(&uid);
        self.events.remove(&uid);
        if let Some(slot) = self.arena.get_mut(local.0).and_then(|s| s.as_mut()) {
            slot.event = None;
        }
        debug!(uid, "Component deleted");
        Ok(())
    }

    fn archive(&mut self, local: RecordHandle, flag: bool) -> ConduitResult<()> {
        self.expect(SessionState::Iterating, "archive")?;
        let uid = self.slot(local)?.uid.clone();
        match self.map.id_for(&uid) {
            Some(id) => self.map.set_archived(id, flag),
            None => warn!(uid, "Archive requested for an unmapped component"),
        }
        Ok(())
    }

    fn match_by_device_id(&mut self, device_id: u32) -> ConduitResult<Option<LocalRecord>> {
        self.expect(SessionState::Iterating, "match_by_device_id")?;
        let Some(uid) = self.map.uid_for(device_id).map(String::from) else {
            return Ok(None);
        };
        let Some(event) = self.events.get(&uid).cloned() else {
            debug!(device_id, uid, "Binding points at a missing component");
            return Ok(None);
        };
        let kind = self.changes.get(&uid).map(|entry| entry.kind);
        Ok(Some(self.materialize(&uid, kind, Some(event))))
    }

    fn set_device_id(&mut self, local: RecordHandle, id: u32) -> ConduitResult<()> {
        self.expect(SessionState::Iterating, "set_device_id")?;
        let uid = self.slot(local)?.uid.clone();
        self.report.mapping_conflicts += self.map.insert(id, uid);
        Ok(())
    }

    fn clear_status(&mut self, local: RecordHandle) -> ConduitResult<()> {
        self.expect(SessionState::Iterating, "clear_status")?;
        let uid = self.slot(local)?.uid.clone();
        self.changes.clear(&uid);
        Ok(())
    }

    fn encode(&mut self, local: RecordHandle) -> ConduitResult<Vec<u8>> {
        self.expect(SessionState::Iterating, "encode")?;
        self.encode_slot(local)
    }

    fn release(&mut self, local: RecordHandle) -> ConduitResult<()> {
        self.expect(SessionState::Iterating, "release")?;
        if let Some(slot) = self.arena.get_mut(local.0) {
            *slot = None;
        }
        Ok(())
    }

    fn post_sync(&mut self) -> ConduitResult<PassReport> {
        self.expect(SessionState::Iterating, "post_sync")?;
        self.state = SessionState::PostSync;
        match self.run_post_sync() {
            Ok(report) => {
                self.state = SessionState::Idle;
                Ok(report)
            }
            Err(err) => {
                warn!(%err, "Pass failed to close");
                self.state = SessionState::Failed;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Classification, EventTime};
    use crate::store::{DirStore, MemoryStore};
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::path::Path;

    fn tz() -> Tz {
        "America/New_York".parse().unwrap()
    }

    fn config(state_dir: &Path) -> SessionConfig {
        SessionConfig {
            token: "palm-1".to_string(),
            timezone: tz(),
            split_multi_day: true,
            state_dir: state_dir.to_path_buf(),
            categories: CategoryTable::new(vec!["Unfiled".into(), "Work".into()]),
        }
    }

    fn event(uid: &str, summary: &str, day: u32) -> Event {
        Event {
            uid: uid.to_string(),
            summary: summary.to_string(),
            description: None,
            location: None,
            start: EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2024, 1, day, 14, 0, 0).unwrap()),
            end: EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2024, 1, day, 15, 0, 0).unwrap()),
            classification: Classification::Public,
            category: None,
            recurrence: None,
            recurrence_id: None,
            reminders: vec![],
            updated: None,
        }
    }

    /// A stand-in for the handheld's datebook database.
    #[derive(Default)]
    struct FakeDevice {
        records: BTreeMap<u32, DeviceRecord>,
        next_id: u32,
    }

    impl FakeDevice {
        fn install(&mut self, payload: Vec<u8>) -> u32 {
            self.next_id += 1;
            let id = self.next_id;
            self.records.insert(
                id,
                DeviceRecord {
                    id,
                    payload,
                    category: 0,
                    attr: RecordStatus::None,
                    archived: false,
                    secret: false,
                },
            );
            id
        }
    }

    /// Drive one pass the way a transport would: push every desktop
    /// change out to the fake device.
    fn push_changes(session: &mut SyncSession<MemoryStore>, device: &mut FakeDevice) -> PassReport {
        session.pre_sync().unwrap();
        let mut cursor = session.enumerate_changed().unwrap();
        while let Some(local) = session.next_changed(&mut cursor).unwrap() {
            match local.status {
                RecordStatus::New => {
                    let payload = session.encode(local.handle).unwrap();
                    let id = device.install(payload);
                    session.set_device_id(local.handle, id).unwrap();
                }
                RecordStatus::Modified => {
                    assert_ne!(local.device_id, 0, "modified record must be mapped");
                    let payload = session.encode(local.handle).unwrap();
                    device.records.get_mut(&local.device_id).unwrap().payload = payload;
                }
                RecordStatus::Deleted => {
                    device.records.remove(&local.device_id);
                    session.delete(local.handle).unwrap();
                }
                RecordStatus::None => unreachable!("changed records always carry a status"),
            }
            session.clear_status(local.handle).unwrap();
            session.release(local.handle).unwrap();
        }
        session.post_sync().unwrap()
    }

    #[test]
    fn test_first_pass_is_slow_then_fast() {
        let state = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new("mem://cal");
        store.create(&event("a", "Standup", 10)).unwrap();
        store.create(&event("b", "Review", 11)).unwrap();

        let mut device = FakeDevice::default();
        let mut session = SyncSession::new(store, config(state.path()));

        let counts = session.pre_sync().unwrap();
        assert_eq!(counts.mode, SyncMode::Slow);
        assert_eq!(counts.added, 2);
        assert_eq!(counts.total, 2);

        // Push both, then close. Protocol details as in push_changes.
        let mut cursor = session.enumerate_changed().unwrap();
        while let Some(local) = session.next_changed(&mut cursor).unwrap() {
            let payload = session.encode(local.handle).unwrap();
            let id = device.install(payload);
            session.set_device_id(local.handle, id).unwrap();
            session.clear_status(local.handle).unwrap();
            // Clearing an already-clear record must stay quiet.
            session.clear_status(local.handle).unwrap();
        }
        let report = session.post_sync().unwrap();
        assert_eq!(report.bindings, 2);
        assert_eq!(device.records.len(), 2);
        assert_eq!(session.state(), SessionState::Idle);

        // Nothing changed: the next pass is fast and quiet.
        let counts = session.pre_sync().unwrap();
        assert_eq!(counts.mode, SyncMode::Fast);
        assert_eq!(
            (counts.added, counts.modified, counts.deleted),
            (0, 0, 0)
        );
        session.post_sync().unwrap();
    }

    #[test]
    fn test_fast_pass_pushes_desktop_changes() {
        let state = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new("mem://cal");
        store.create(&event("a", "Standup", 10)).unwrap();
        store.create(&event("b", "Review", 11)).unwrap();

        let mut device = FakeDevice::default();
        let mut session = SyncSession::new(store, config(state.path()));
        push_changes(&mut session, &mut device);

        // Desktop edits between passes: modify a, delete b, add c.
        let store = &mut session.store;
        store.update("a", &event("a", "Standup (moved)", 12)).unwrap();
        store.delete("b").unwrap();
        store.create(&event("c", "Retro", 12)).unwrap();

        let report = push_changes(&mut session, &mut device);
        assert_eq!(report.mode, SyncMode::Fast);
        assert_eq!((report.added, report.modified, report.deleted), (1, 1, 1));
        assert_eq!(report.bindings, 2, "deleted binding was purged");
        assert_eq!(device.records.len(), 2);

        // The modified payload really reached the device.
        let decoded: Vec<String> = device
            .records
            .values()
            .map(|r| {
                crate::device::DatebookPayload::decode(&r.payload)
                    .unwrap()
                    .summary
            })
            .collect();
        assert!(decoded.contains(&"Standup (moved)".to_string()));
        assert!(decoded.contains(&"Retro".to_string()));
        assert!(!decoded.contains(&"Review".to_string()));
    }

    #[test]
    fn test_slow_pass_rebinds_by_content() {
        let first_state = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new("mem://cal");
        store.create(&event("a", "Standup", 10)).unwrap();
        store.create(&event("b", "Review", 11)).unwrap();

        let mut device = FakeDevice::default();
        let mut session = SyncSession::new(store, config(first_state.path()));
        push_changes(&mut session, &mut device);

        // The map is lost (fresh state dir) but the device still has both
        // records: a slow pass must re-derive the bindings by comparison
        // instead of duplicating events.
        let second_state = tempfile::tempdir().unwrap();
        let store = std::mem::replace(&mut session.store, MemoryStore::new("unused"));
        let mut session = SyncSession::new(store, config(second_state.path()));

        let counts = session.pre_sync().unwrap();
        assert_eq!(counts.mode, SyncMode::Slow);

        for record in device.records.values() {
            assert!(session.match_by_device_id(record.id).unwrap().is_none());

            let mut matched = false;
            let mut cursor = session.enumerate_all().unwrap();
            while let Some(local) = session.next(&mut cursor).unwrap() {
                if session.compare(local.handle, &record.payload).unwrap() == Comparison::Equal {
                    session.set_device_id(local.handle, record.id).unwrap();
                    session.clear_status(local.handle).unwrap();
                    matched = true;
                    break;
                }
            }
            assert!(matched, "device record should match an existing component");
        }

        let report = session.post_sync().unwrap();
        assert_eq!(report.bindings, 2);
        assert_eq!(session.store.len(), 2, "no duplicates from the slow pass");

        // The rebuilt map points at the right components.
        let map = IdentifierMap::load(second_state.path());
        assert_eq!(map.uid_for(1), Some("a"));
        assert_eq!(map.uid_for(2), Some("b"));
    }

    #[test]
    fn test_store_swap_clears_stale_bindings() {
        let state = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new("mem://cal");
        store.create(&event("a", "Standup", 10)).unwrap();

        let mut device = FakeDevice::default();
        let mut session = SyncSession::new(store, config(state.path()));
        push_changes(&mut session, &mut device);

        // Same state dir, different store: the old binding must not be
        // trusted against the new calendar.
        let mut session = SyncSession::new(MemoryStore::new("mem://other"), config(state.path()));
        let counts = session.pre_sync().unwrap();
        assert_eq!(counts.mode, SyncMode::Slow);
        assert!(session.match_by_device_id(1).unwrap().is_none());

        let report = session.post_sync().unwrap();
        assert_eq!(report.bindings, 0);
    }

    #[test]
    fn test_device_side_changes_land_in_store() {
        let state = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new("mem://cal");
        store.create(&event("a", "Standup", 10)).unwrap();

        let mut device = FakeDevice::default();
        let mut session = SyncSession::new(store, config(state.path()));
        push_changes(&mut session, &mut device);

        session.pre_sync().unwrap();

        // The device edited record 1: summary change, one hour later.
        let local = session.match_by_device_id(1).unwrap().expect("mapped");
        let mut payload =
            crate::device::DatebookPayload::decode(&device.records[&1].payload).unwrap();
        payload.summary = "Standup (device)".to_string();
        let mut record = device.records[&1].clone();
        record.payload = payload.encode().unwrap();
        record.attr = RecordStatus::Modified;
        assert_eq!(
            session.compare(local.handle, &record.payload).unwrap(),
            Comparison::NotEqual
        );
        session.replace(local.handle, &record).unwrap();

        // And created a brand-new record 9.
        let begin = NaiveDate::from_ymd_opt(2024, 1, 20)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let new_payload = crate::device::DatebookPayload {
            summary: "Gym".to_string(),
            note: None,
            begin,
            end: begin + chrono::Duration::hours(1),
            untimed: false,
            repeat: crate::device::Repeat::None,
            exceptions: vec![],
            alarm: None,
        };
        let new_record = DeviceRecord {
            id: 9,
            payload: new_payload.encode().unwrap(),
            category: 1,
            attr: RecordStatus::New,
            archived: false,
            secret: false,
        };
        let uid = session.add(&new_record).unwrap();

        let report = session.post_sync().unwrap();
        assert_eq!(report.bindings, 2);

        assert_eq!(
            session.store.get("a").unwrap().unwrap().summary,
            "Standup (device)"
        );
        let added = session.store.get(&uid).unwrap().unwrap();
        assert_eq!(added.summary, "Gym");
        assert_eq!(added.category.as_deref(), Some("Work"));

        // The pass's own writes do not surface as changes next time.
        let counts = session.pre_sync().unwrap();
        assert_eq!(
            (counts.added, counts.modified, counts.deleted),
            (0, 0, 0)
        );
    }

    #[test]
    fn test_corrupt_device_record_is_skipped_not_fatal() {
        let state = tempfile::tempdir().unwrap();
        let store = MemoryStore::new("mem://cal");
        let mut session = SyncSession::new(store, config(state.path()));
        session.pre_sync().unwrap();

        let bad = DeviceRecord {
            id: 5,
            payload: vec![0xff, 0x00, 0x13],
            category: 0,
            attr: RecordStatus::New,
            archived: false,
            secret: false,
        };
        let err = session.add(&bad).unwrap_err();
        assert!(matches!(err, ConduitError::RecordDecode(_)));
        assert_eq!(session.state(), SessionState::Iterating);

        let report = session.post_sync().unwrap();
        assert_eq!(report.skipped_decode, 1);
    }

    #[test]
    fn test_archive_keeps_component_and_flags_binding() {
        let state = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new("mem://cal");
        store.create(&event("a", "Standup", 10)).unwrap();

        let mut device = FakeDevice::default();
        let mut session = SyncSession::new(store, config(state.path()));
        push_changes(&mut session, &mut device);

        session.pre_sync().unwrap();
        let local = session.match_by_device_id(1).unwrap().expect("mapped");
        session.archive(local.handle, true).unwrap();
        session.post_sync().unwrap();

        assert!(session.store.get("a").unwrap().is_some());
        let map = IdentifierMap::load(state.path());
        assert!(map.is_archived(1));

        // A further desktop edit to the archived component stays home.
        session
            .store
            .update("a", &event("a", "Standup (edited)", 10))
            .unwrap();
        let counts = session.pre_sync().unwrap();
        assert_eq!(counts.modified, 0);
        session.post_sync().unwrap();
    }

    #[test]
    fn test_wrong_state_calls_are_protocol_errors() {
        let state = tempfile::tempdir().unwrap();
        let store = MemoryStore::new("mem://cal");
        let mut session = SyncSession::new(store, config(state.path()));

        assert!(matches!(
            session.enumerate_all().unwrap_err(),
            ConduitError::Protocol(_)
        ));
        assert!(matches!(
            session.post_sync().unwrap_err(),
            ConduitError::Protocol(_)
        ));

        session.pre_sync().unwrap();
        assert!(matches!(
            session.pre_sync().unwrap_err(),
            ConduitError::Protocol(_)
        ));

        // Cursor of the wrong flavor.
        let mut all = session.enumerate_all().unwrap();
        assert!(session.next_changed(&mut all).is_err());
    }

    #[test]
    fn test_failed_state_absorbs() {
        let state = tempfile::tempdir().unwrap();
        let missing = state.path().join("nope");
        let mut session = SyncSession::new(DirStore::new(&missing), config(state.path()));

        assert!(session.pre_sync().is_err());
        assert_eq!(session.state(), SessionState::Failed);

        // Everything afterwards is refused, including another pre_sync.
        assert!(matches!(
            session.pre_sync().unwrap_err(),
            ConduitError::Protocol(_)
        ));
        assert!(matches!(
            session.post_sync().unwrap_err(),
            ConduitError::Protocol(_)
        ));
    }

    #[test]
    fn test_release_frees_the_slot() {
        let state = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new("mem://cal");
        store.create(&event("a", "Standup", 10)).unwrap();

        let mut session = SyncSession::new(store, config(state.path()));
        session.pre_sync().unwrap();

        let mut cursor = session.enumerate_all().unwrap();
        let local = session.next(&mut cursor).unwrap().expect("one record");
        session.release(local.handle).unwrap();
        assert!(matches!(
            session.encode(local.handle).unwrap_err(),
            ConduitError::Protocol(_)
        ));
        // Releasing again is harmless.
        session.release(local.handle).unwrap();
        session.post_sync().unwrap();
    }

    #[test]
    fn test_deleted_changes_have_no_body() {
        let state = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new("mem://cal");
        store.create(&event("a", "Standup", 10)).unwrap();

        let mut device = FakeDevice::default();
        let mut session = SyncSession::new(store, config(state.path()));
        push_changes(&mut session, &mut device);

        session.store.delete("a").unwrap();
        session.pre_sync().unwrap();

        let mut cursor = session.enumerate_changed().unwrap();
        let local = session.next_changed(&mut cursor).unwrap().expect("deletion");
        assert_eq!(local.status, RecordStatus::Deleted);
        assert_eq!(local.device_id, 1);
        assert!(session.encode(local.handle).is_err());

        session.delete(local.handle).unwrap();
        let report = session.post_sync().unwrap();
        assert_eq!(report.bindings, 0);
    }
}
