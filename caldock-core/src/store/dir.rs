//! Directory-backed calendar store: one `.ics` file per event.

use std::path::{Path, PathBuf};

use crate::error::{ConduitError, ConduitResult};
use crate::event::{Event, EventTime};
use crate::ics::{generate_ics, parse_event};
use crate::store::{CalendarStore, ChangeEntry, ChangeSnapshot};

/// A calendar stored as a flat directory of `.ics` files, with sync state
/// under `.caldock/state/`.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where snapshots and other sync state live.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".caldock").join("state")
    }

    fn load_all(&self) -> ConduitResult<Vec<(PathBuf, Event)>> {
        let entries = std::fs::read_dir(&self.root)?;

        let events = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|e| e == "ics"))
            .filter_map(|path| {
                let content = std::fs::read_to_string(&path).ok()?;
                parse_event(&content).map(|event| (path, event))
            })
            .collect();

        Ok(events)
    }

    fn find_file(&self, uid: &str) -> ConduitResult<Option<PathBuf>> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|(_, event)| event.uid == uid)
            .map(|(path, _)| path))
    }

    /// Generate a unique filename for an event, handling collisions.
    fn filename_for(&self, event: &Event) -> ConduitResult<String> {
        let base = base_filename(event);
        let stem = base.trim_end_matches(".ics");

        if !self.root.join(&base).exists() || self.file_has_uid(&base, &event.uid) {
            return Ok(base);
        }

        for n in 2..=100 {
            let suffixed = format!("{}-{}.ics", stem, n);
            if !self.root.join(&suffixed).exists() || self.file_has_uid(&suffixed, &event.uid) {
                return Ok(suffixed);
            }
        }

        Err(ConduitError::Store(format!(
            "Too many filename collisions for '{}'",
            stem
        )))
    }

    fn file_has_uid(&self, filename: &str, uid: &str) -> bool {
        std::fs::read_to_string(self.root.join(filename))
            .ok()
            .and_then(|content| parse_event(&content))
            .is_some_and(|event| event.uid == uid)
    }
}

impl CalendarStore for DirStore {
    fn uri(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn open(&mut self) -> ConduitResult<()> {
        if !self.root.is_dir() {
            return Err(ConduitError::Store(format!(
                "Calendar directory does not exist: {}",
                self.root.display()
            )));
        }
        std::fs::create_dir_all(self.state_dir())?;
        Ok(())
    }

    fn events(&self) -> ConduitResult<Vec<Event>> {
        Ok(self.load_all()?.into_iter().map(|(_, e)| e).collect())
    }

    fn get(&self, uid: &str) -> ConduitResult<Option<Event>> {
        Ok(self
            .load_all()?
            .into_iter()
            .find(|(_, event)| event.uid == uid)
            .map(|(_, event)| event))
    }

    fn create(&mut self, event: &Event) -> ConduitResult<()> {
        std::fs::create_dir_all(&self.root)?;

        let content = generate_ics(event)?;
        let filename = self.filename_for(event)?;

        std::fs::write(self.root.join(filename), content)?;
        Ok(())
    }

    fn update(&mut self, uid: &str, event: &Event) -> ConduitResult<()> {
        self.delete(uid)?;
        self.create(event)
    }

    fn delete(&mut self, uid: &str) -> ConduitResult<()> {
        if let Some(path) = self.find_file(uid)? {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn changes_since(&self, token: &str) -> ConduitResult<Vec<ChangeEntry>> {
        let snapshot = ChangeSnapshot::load(&self.state_dir(), token);
        Ok(snapshot.diff(&self.events()?))
    }

    fn commit_changes(&mut self, token: &str) -> ConduitResult<()> {
        let snapshot = ChangeSnapshot::of_events(&self.events()?);
        snapshot.save(&self.state_dir(), token)
    }
}

/// Base filename for an event.
/// Timed events: `YYYY-MM-DDTHHMM__slug.ics`
/// All-day events: `YYYY-MM-DD__slug.ics`
/// Recurring events: `_recurring__slug.ics`
fn base_filename(event: &Event) -> String {
    let slug = slug::slugify(&event.summary);

    if event.recurrence.is_some() {
        return format!("_recurring__{}.ics", slug);
    }

    let date = match &event.start {
        EventTime::Date(d) => d.format("%Y-%m-%d").to_string(),
        EventTime::DateTimeUtc(dt) => dt.format("%Y-%m-%dT%H%M").to_string(),
        EventTime::DateTimeFloating(dt) => dt.format("%Y-%m-%dT%H%M").to_string(),
        EventTime::DateTimeZoned { datetime, .. } => datetime.format("%Y-%m-%dT%H%M").to_string(),
    };

    format!("{}__{}.ics", date, slug)
}
