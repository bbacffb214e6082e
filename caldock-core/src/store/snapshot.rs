//! Change snapshots: how a store answers "what changed since last sync".
//!
//! A snapshot is one line per component, `<hash> <uid>`, written after every
//! successful pass. Diffing the snapshot against the store's current
//! contents classifies each component as added, modified or deleted. The
//! hash is over the event's canonical JSON form, so cosmetic differences in
//! the `.ics` serialization do not register as changes.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::error::ConduitResult;
use crate::event::Event;
use crate::store::{ChangeEntry, ChangeKind};

/// Content hash of an event, stable across processes for the same event.
pub fn hash_event(event: &Event) -> u64 {
    // Struct serialization order is fixed, so the JSON form is canonical.
    let json = serde_json::to_string(event).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    json.hash(&mut hasher);
    hasher.finish()
}

/// The per-token snapshot of a store's last-synced contents.
#[derive(Debug, Default, Clone)]
pub struct ChangeSnapshot {
    entries: HashMap<String, u64>,
}

const FORMAT_HEADER: &str = "# caldock snapshot v1";

impl ChangeSnapshot {
    pub fn from_entries(entries: HashMap<String, u64>) -> Self {
        ChangeSnapshot { entries }
    }

    /// Snapshot of the given events, as written after a successful pass.
    pub fn of_events(events: &[Event]) -> Self {
        let entries = events
            .iter()
            .map(|e| (e.uid.clone(), hash_event(e)))
            .collect();
        ChangeSnapshot { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn file_path(state_dir: &Path, token: &str) -> PathBuf {
        // Tokens are caller-chosen; keep only filename-safe characters.
        let safe: String = token
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        state_dir.join(format!("changes-{}", safe))
    }

    /// Load the snapshot for `token`. A missing file is an empty snapshot;
    /// malformed lines are skipped.
    pub fn load(state_dir: &Path, token: &str) -> Self {
        let path = Self::file_path(state_dir, token);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return ChangeSnapshot::default();
        };

        let mut entries = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // <hash-hex> <uid>; the uid may contain spaces.
            let Some((hash_part, uid)) = line.split_once(' ') else {
                continue;
            };
            let Ok(hash) = u64::from_str_radix(hash_part, 16) else {
                continue;
            };
            entries.insert(uid.to_string(), hash);
        }

        ChangeSnapshot { entries }
    }

    /// Save atomically (temp file + rename).
    pub fn save(&self, state_dir: &Path, token: &str) -> ConduitResult<()> {
        std::fs::create_dir_all(state_dir)?;

        let path = Self::file_path(state_dir, token);
        let temp = path.with_extension("tmp");

        // Sort for deterministic output
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|(uid, hash)| format!("{:016x} {}", hash, uid))
            .collect();
        lines.sort();

        let mut content = String::from(FORMAT_HEADER);
        content.push('\n');
        content.push_str(&lines.join("\n"));
        content.push('\n');

        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &path)?;
        Ok(())
    }

    /// Classify the store's current contents against this snapshot.
    pub fn diff(&self, current: &[Event]) -> Vec<ChangeEntry> {
        let mut changes = Vec::new();
        let mut seen: HashMap<&str, ()> = HashMap::new();

        for event in current {
            seen.insert(event.uid.as_str(), ());
            match self.entries.get(&event.uid) {
                None => changes.push(ChangeEntry::added(event.clone())),
                Some(&old_hash) => {
                    if old_hash != hash_event(event) {
                        changes.push(ChangeEntry::modified(event.clone()));
                    }
                }
            }
        }

        for uid in self.entries.keys() {
            if !seen.contains_key(uid.as_str()) {
                changes.push(ChangeEntry::deleted(uid.clone()));
            }
        }

        changes
    }
}
