//! The identifier map: device record IDs <-> desktop event UIDs.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::ConduitResult;

const IDMAP_FILE: &str = "idmap";
const IDMAP_HEADER: &str = "# caldock idmap v1";
const LAST_STORE_FILE: &str = "last_store";

#[derive(Debug, Clone)]
struct Binding {
    uid: String,
    archived: bool,
}

/// Bidirectional map between device record IDs and desktop UIDs, with an
/// archived flag per binding. The two directions are kept consistent at
/// all times: a conflicting insert evicts whatever bindings stand in the
/// way (last writer wins).
///
/// Device ID 0 means "unassigned" on the handheld and is never stored.
#[derive(Default)]
pub struct IdentifierMap {
    by_id: HashMap<u32, Binding>,
    by_uid: HashMap<String, u32>,
    touched: HashSet<u32>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the map from `<state_dir>/idmap`. A missing, unreadable or
    /// unrecognized file yields an empty map; sync then falls back to a
    /// slow pass instead of failing outright.
    pub fn load(state_dir: &Path) -> IdentifierMap {
        let path = state_dir.join(IDMAP_FILE);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return IdentifierMap::new(),
        };

        let mut lines = content.lines();
        if lines.next() != Some(IDMAP_HEADER) {
            warn!(path = %path.display(), "Unrecognized idmap format, starting empty");
            return IdentifierMap::new();
        }

        let mut map = IdentifierMap::new();
        for line in lines {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // `<device_id> <archived> <uid>`; the uid may contain spaces.
            let mut parts = line.splitn(3, ' ');
            let (Some(id), Some(archived), Some(uid)) =
                (parts.next(), parts.next(), parts.next())
            else {
                debug!(line, "Skipping malformed idmap line");
                continue;
            };
            let Ok(id) = id.parse::<u32>() else {
                debug!(line, "Skipping malformed idmap line");
                continue;
            };
            map.insert(id, uid.to_string());
            if archived == "1" {
                map.set_archived(id, true);
            }
        }
        map.touched.clear();
        map
    }

    /// Persist the map atomically. With `touched_only`, bindings that were
    /// not inserted or touched during this pass are dropped; a slow sync
    /// uses this to shed mappings for records that no longer exist.
    pub fn save(&self, state_dir: &Path, touched_only: bool) -> ConduitResult<()> {
        std::fs::create_dir_all(state_dir)?;

        let mut ids: Vec<u32> = self
            .by_id
            .keys()
            .copied()
            .filter(|id| !touched_only || self.touched.contains(id))
            .collect();
        ids.sort_unstable();

        let mut content = String::from(IDMAP_HEADER);
        for id in ids {
            let binding = &self.by_id[&id];
            let archived = if binding.archived { '1' } else { '0' };
            content.push_str(&format!("\n{} {} {}", id, archived, binding.uid));
        }
        content.push('\n');

        let path = state_dir.join(IDMAP_FILE);
        let temp = state_dir.join(IDMAP_FILE.to_string() + ".tmp");
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &path)?;
        Ok(())
    }

    /// Bind a device ID to a UID. Existing bindings for either side are
    /// evicted so the map stays a bijection; returns how many were.
    pub fn insert(&mut self, id: u32, uid: String) -> usize {
        if id == 0 {
            warn!(uid, "Refusing to map the unassigned record ID");
            return 0;
        }

        let mut evicted = 0;

        if let Some(old) = self.by_id.get(&id) {
            if old.uid != uid {
                warn!(id, old = %old.uid, new = %uid, "Record ID rebound to a different event");
                let old_uid = old.uid.clone();
                self.by_uid.remove(&old_uid);
                evicted += 1;
            }
        }
        if let Some(&old_id) = self.by_uid.get(&uid) {
            if old_id != id {
                warn!(uid = %uid, old_id, new_id = id, "Event rebound to a different record ID");
                self.by_id.remove(&old_id);
                self.touched.remove(&old_id);
                evicted += 1;
            }
        }

        self.by_id.insert(
            id,
            Binding {
                uid: uid.clone(),
                archived: false,
            },
        );
        self.by_uid.insert(uid, id);
        self.touched.insert(id);
        evicted
    }

    pub fn uid_for(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(|b| b.uid.as_str())
    }

    pub fn id_for(&self, uid: &str) -> Option<u32> {
        self.by_uid.get(uid).copied()
    }

    /// Mark a binding as consulted this pass so a touched-only save keeps it.
    pub fn touch(&mut self, id: u32) {
        if self.by_id.contains_key(&id) {
            self.touched.insert(id);
        }
    }

    pub fn remove_by_id(&mut self, id: u32) {
        if let Some(binding) = self.by_id.remove(&id) {
            self.by_uid.remove(&binding.uid);
            self.touched.remove(&id);
        }
    }

    pub fn remove_by_uid(&mut self, uid: &str) {
        if let Some(id) = self.by_uid.remove(uid) {
            self.by_id.remove(&id);
            self.touched.remove(&id);
        }
    }

    pub fn is_archived(&self, id: u32) -> bool {
        self.by_id.get(&id).is_some_and(|b| b.archived)
    }

    pub fn set_archived(&mut self, id: u32, archived: bool) {
        if let Some(binding) = self.by_id.get_mut(&id) {
            binding.archived = archived;
            self.touched.insert(id);
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_uid.clear();
        self.touched.clear();
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_id.keys().copied()
    }

    /// The store URI this map was last synced against, if recorded.
    pub fn load_last_uri(state_dir: &Path) -> Option<String> {
        let uri = std::fs::read_to_string(state_dir.join(LAST_STORE_FILE)).ok()?;
        let uri = uri.trim();
        if uri.is_empty() {
            None
        } else {
            Some(uri.to_string())
        }
    }

    pub fn save_last_uri(state_dir: &Path, uri: &str) -> ConduitResult<()> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LAST_STORE_FILE);
        let temp = state_dir.join(LAST_STORE_FILE.to_string() + ".tmp");
        std::fs::write(&temp, uri)?;
        std::fs::rename(&temp, &path)?;
        Ok(())
    }
}
