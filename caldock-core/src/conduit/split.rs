//! Splitting multi-day events into per-day fragments.
//!
//! The handheld renders an appointment on a single day, so an event that
//! crosses local midnight is optionally replaced by one fragment per day
//! before anything is pushed. The original is deleted from the store; the
//! fragments are fresh events with their own UIDs. Recurring events are
//! never split.

use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::info;

use crate::error::ConduitResult;
use crate::event::{resolve_local, Event, EventTime};
use crate::store::{CalendarStore, ChangeEntry, ChangeKind};

/// Rewrite the pass's change entries, splitting each multi-day event in
/// place. Fragments surface as `Added`; the split original becomes a
/// `Deleted` entry so any handheld copy of it is retired.
pub fn split_changes(
    store: &mut dyn CalendarStore,
    tz: &Tz,
    entries: Vec<ChangeEntry>,
    enabled: bool,
) -> ConduitResult<Vec<ChangeEntry>> {
    if !enabled {
        return Ok(entries);
    }

    let mut out = Vec::with_capacity(entries.len());

    for entry in entries {
        let event = match &entry.event {
            Some(event) if entry.kind != ChangeKind::Deleted && !event.is_recurrent() => event,
            _ => {
                out.push(entry);
                continue;
            }
        };

        let fragments = day_fragments(event, tz);
        if fragments.is_empty() {
            out.push(entry);
            continue;
        }

        info!(
            uid = %entry.uid,
            fragments = fragments.len(),
            "Splitting multi-day event"
        );

        for fragment in fragments {
            store.create(&fragment)?;
            out.push(ChangeEntry::added(fragment));
        }
        store.delete(&entry.uid)?;
        out.push(ChangeEntry::deleted(&entry.uid));
    }

    Ok(out)
}

/// One fragment per local day the event touches; empty when the event
/// fits inside a single day and no split is needed.
fn day_fragments(event: &Event, tz: &Tz) -> Vec<Event> {
    if event.start.is_date() || event.end.is_date() {
        return all_day_fragments(event);
    }

    let start = event.start.local_naive(tz);
    let end = event.end.local_naive(tz);
    if end <= day_end(start.date()) {
        return Vec::new();
    }

    let mut fragments = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let boundary = day_end(cursor.date()).min(end);
        fragments.push(fragment_of(
            event,
            timed_fragment_time(cursor, &event.start, tz),
            timed_fragment_time(boundary, &event.start, tz),
        ));
        cursor = boundary;
    }
    fragments
}

fn all_day_fragments(event: &Event) -> Vec<Event> {
    let (EventTime::Date(start), EventTime::Date(end)) = (&event.start, &event.end) else {
        return Vec::new();
    };
    // The end date is exclusive; one day apart is a single-day event.
    if *end - *start <= Duration::days(1) {
        return Vec::new();
    }

    let mut fragments = Vec::new();
    let mut day = *start;
    while day < *end {
        fragments.push(fragment_of(
            event,
            EventTime::Date(day),
            EventTime::Date(day + Duration::days(1)),
        ));
        day += Duration::days(1);
    }
    fragments
}

fn day_end(day: NaiveDate) -> NaiveDateTime {
    (day + Duration::days(1)).and_hms_opt(0, 0, 0).unwrap_or_default()
}

/// Fragments keep floating times floating; every other timed variant is
/// pinned through the conduit zone to UTC.
fn timed_fragment_time(naive: NaiveDateTime, original: &EventTime, tz: &Tz) -> EventTime {
    match original {
        EventTime::DateTimeFloating(_) => EventTime::DateTimeFloating(naive),
        _ => EventTime::DateTimeUtc(resolve_local(naive, tz).with_timezone(&Utc)),
    }
}

fn fragment_of(original: &Event, start: EventTime, end: EventTime) -> Event {
    Event {
        uid: uuid::Uuid::new_v4().to_string(),
        start,
        end,
        updated: Some(Utc::now()),
        ..original.clone()
    }
}
