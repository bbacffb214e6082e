//! Translating between desktop components and device datebook records.

use chrono::{Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::conduit::recurrence;
use crate::device::{
    AdvanceUnit, AlarmAdvance, CategoryTable, DatebookPayload, DeviceRecord, RecordStatus, Repeat,
    MAX_ALARM_ADVANCE,
};
use crate::error::{ConduitError, ConduitResult};
use crate::event::{resolve_local, Classification, Event, EventTime, Recurrence, Reminder};
use crate::store::ChangeKind;

/// A desktop component rendered into a device record, plus what was lost
/// on the way.
pub struct TranscodeOutcome {
    pub record: DeviceRecord,
    /// The component's rule did not fit the device vocabulary and was
    /// pushed as non-repeating.
    pub degraded_recurrence: bool,
}

/// Render a desktop component as a device record.
///
/// `device_id` is the record's existing binding, or 0 when the handheld
/// has not assigned one yet. Unsupported recurrences degrade to
/// non-repeating rather than failing the record.
pub fn desktop_to_device(
    event: &Event,
    status: RecordStatus,
    device_id: u32,
    categories: &CategoryTable,
    tz: &Tz,
) -> ConduitResult<TranscodeOutcome> {
    let untimed = is_all_day(event, tz);
    let (begin, end) = device_interval(event, untimed, tz);

    let mut degraded = false;
    let repeat = match &event.recurrence {
        None => Repeat::None,
        Some(recurrence) => match recurrence::to_device(recurrence, &event.start, tz) {
            Ok(repeat) => repeat,
            Err(ConduitError::UnsupportedRecurrence(why)) => {
                warn!(uid = %event.uid, why, "Pushing unsupported recurrence as non-repeating");
                degraded = true;
                Repeat::None
            }
            Err(other) => return Err(other),
        },
    };

    let exceptions = match (&event.recurrence, &repeat) {
        (Some(recurrence), repeat) if !repeat.is_none() => recurrence
            .exdates
            .iter()
            .map(|exdate| recurrence::exception_to_device(exdate, &event.start, tz))
            .collect(),
        _ => Vec::new(),
    };

    let payload = DatebookPayload {
        summary: event.summary.clone(),
        note: event.description.clone().filter(|d| !d.is_empty()),
        begin,
        end,
        untimed,
        repeat,
        exceptions,
        alarm: earliest_reminder(&event.reminders).map(advance_from_minutes),
    };

    let record = DeviceRecord {
        id: device_id,
        payload: payload.encode()?,
        category: categories.index_of(event.category.as_deref()),
        attr: status,
        archived: false,
        secret: event.classification == Classification::Private,
    };

    Ok(TranscodeOutcome {
        record,
        degraded_recurrence: degraded,
    })
}

/// Build a desktop component from a device record.
///
/// Fields the datebook does not carry (location, instance linkage) are
/// taken from `existing` when the record replaces a known component; a
/// record with no binding becomes a fresh component with a fresh UID.
pub fn device_to_desktop(
    record: &DeviceRecord,
    existing: Option<&Event>,
    categories: &CategoryTable,
    tz: &Tz,
) -> ConduitResult<Event> {
    let payload = DatebookPayload::decode(&record.payload)?;

    let mut event = match existing {
        Some(existing) => existing.clone(),
        None => Event {
            uid: uuid::Uuid::new_v4().to_string(),
            summary: String::new(),
            description: None,
            location: None,
            start: EventTime::Date(payload.begin.date()),
            end: EventTime::Date(payload.begin.date()),
            classification: Classification::Public,
            category: None,
            recurrence: None,
            recurrence_id: None,
            reminders: vec![],
            updated: None,
        },
    };

    event.summary = payload.summary.clone();
    event.description = payload.note.clone();

    if payload.untimed {
        event.start = EventTime::Date(payload.begin.date());
        // The device stores the last day; the desktop end date is exclusive.
        event.end = EventTime::Date(payload.end.date() + Duration::days(1));
    } else {
        event.start =
            EventTime::DateTimeUtc(resolve_local(payload.begin, tz).with_timezone(&Utc));
        event.end = EventTime::DateTimeUtc(resolve_local(payload.end, tz).with_timezone(&Utc));
    }

    let previous_rule = existing.and_then(|e| e.recurrence.as_ref());
    event.recurrence =
        match recurrence::to_desktop(&payload.repeat, &event.start, tz, previous_rule)? {
            None => None,
            Some(rrule) => Some(Recurrence {
                rrule,
                exdates: payload
                    .exceptions
                    .iter()
                    .map(|ex| recurrence::exception_to_desktop(*ex, &event.start, tz))
                    .collect(),
            }),
        };

    event.reminders = payload
        .alarm
        .map(|advance| {
            vec![Reminder {
                minutes: advance.minutes(),
            }]
        })
        .unwrap_or_default();

    event.classification = if record.secret {
        Classification::Private
    } else {
        Classification::Public
    };
    event.category = categories.name_of(record.category).map(String::from);
    event.updated = Some(Utc::now());

    Ok(event)
}

/// All-day means both ends are bare dates, or the interval is exactly one
/// midnight-aligned day on the local clock.
pub fn is_all_day(event: &Event, tz: &Tz) -> bool {
    match (&event.start, &event.end) {
        (EventTime::Date(_), EventTime::Date(_)) => true,
        (EventTime::Date(_), _) | (_, EventTime::Date(_)) => false,
        _ => {
            let start = event.start.local_naive(tz);
            let end = event.end.local_naive(tz);
            start.time() == chrono::NaiveTime::MIN && end == start + Duration::days(1)
        }
    }
}

fn device_interval(event: &Event, untimed: bool, tz: &Tz) -> (NaiveDateTime, NaiveDateTime) {
    if untimed {
        let first = event.start.local_naive(tz).date();
        // Multi-day all-day spans keep their last day; the timed 24-hour
        // form is a single day.
        let last = match (&event.start, &event.end) {
            (EventTime::Date(start), EventTime::Date(end)) if *end > *start => {
                *end - Duration::days(1)
            }
            _ => first,
        };
        (
            first.and_hms_opt(0, 0, 0).unwrap_or_default(),
            last.and_hms_opt(0, 0, 0).unwrap_or_default(),
        )
    } else {
        (event.start.local_naive(tz), event.end.local_naive(tz))
    }
}

fn earliest_reminder(reminders: &[Reminder]) -> Option<i64> {
    reminders.iter().map(|r| r.minutes.max(0)).max()
}

/// Fit a minute count into the device's two-digit advance field,
/// escalating minutes to hours to days. Escalation rounds up so the
/// alarm never fires later than asked; past 99 days it pins there.
fn advance_from_minutes(minutes: i64) -> AlarmAdvance {
    let minutes = minutes.max(0);
    if minutes <= MAX_ALARM_ADVANCE {
        return AlarmAdvance {
            unit: AdvanceUnit::Minutes,
            value: minutes as u8,
        };
    }
    let hours = (minutes + 59) / 60;
    if hours <= MAX_ALARM_ADVANCE {
        return AlarmAdvance {
            unit: AdvanceUnit::Hours,
            value: hours as u8,
        };
    }
    let days = ((minutes + 1439) / 1440).min(MAX_ALARM_ADVANCE);
    AlarmAdvance {
        unit: AdvanceUnit::Days,
        value: days as u8,
    }
}

/// The device attribute for a desktop-side change.
pub fn status_for(kind: ChangeKind) -> RecordStatus {
    match kind {
        ChangeKind::Added => RecordStatus::New,
        ChangeKind::Modified => RecordStatus::Modified,
        ChangeKind::Deleted => RecordStatus::Deleted,
    }
}
