//! ICS file parsing using the icalendar crate's parser.

use crate::event::{Classification, Event, EventTime, Recurrence, Reminder};
use icalendar::{
    parser::{read_calendar, unfold, Property},
    DatePerhapsTime,
};

/// Parse ICS content into an Event struct.
///
/// Returns `None` when the content has no parseable VEVENT or the VEVENT
/// lacks UID/DTSTART/DTEND.
pub fn parse_event(content: &str) -> Option<Event> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).ok()?;
    let vevent = calendar.components.iter().find(|c| c.name == "VEVENT")?;

    // Required fields
    let uid = vevent.find_prop("UID")?.val.to_string();
    let summary = vevent
        .find_prop("SUMMARY")
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| "(No title)".to_string());
    let start = to_event_time(DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?);
    let end = to_event_time(DatePerhapsTime::try_from(vevent.find_prop("DTEND")?).ok()?);

    // Optional simple fields
    let description = vevent.find_prop("DESCRIPTION").map(|p| p.val.to_string());
    let location = vevent.find_prop("LOCATION").map(|p| p.val.to_string());

    // CONFIDENTIAL is folded into Private; the handheld only has a single
    // secret bit.
    let classification = vevent
        .find_prop("CLASS")
        .map(|p| match p.val.as_ref() {
            "PRIVATE" | "CONFIDENTIAL" => Classification::Private,
            _ => Classification::Public,
        })
        .unwrap_or_default();

    // First CATEGORIES value only; the device category table is flat.
    let category = vevent
        .find_prop("CATEGORIES")
        .and_then(|p| p.val.as_ref().split(',').next().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty());

    // Recurrence (RRULE, EXDATE)
    let rrule = vevent.find_prop("RRULE").map(|p| p.val.to_string());
    let exdates: Vec<EventTime> = vevent
        .properties
        .iter()
        .filter(|p| p.name == "EXDATE")
        .flat_map(parse_exdate_property)
        .collect();
    let recurrence = rrule.map(|rrule| Recurrence { rrule, exdates });

    // RECURRENCE-ID for instance overrides
    let recurrence_id = vevent
        .find_prop("RECURRENCE-ID")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);

    // Reminders from VALARM components
    let reminders: Vec<Reminder> = vevent
        .components
        .iter()
        .filter(|c| c.name == "VALARM")
        .filter_map(|alarm| {
            let trigger = alarm.find_prop("TRIGGER")?.val.as_ref();
            let minutes = parse_trigger_minutes(trigger)?;
            Some(Reminder { minutes })
        })
        .collect();

    let updated = vevent.find_prop("LAST-MODIFIED").and_then(parse_utc_stamp);

    Some(Event {
        uid,
        summary,
        description,
        location,
        start,
        end,
        classification,
        category,
        recurrence,
        recurrence_id,
        reminders,
        updated,
    })
}

/// Convert icalendar's DatePerhapsTime to our EventTime, preserving timezone info
fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            icalendar::CalendarDateTime::Utc(dt) => EventTime::DateTimeUtc(dt),
            icalendar::CalendarDateTime::Floating(naive) => EventTime::DateTimeFloating(naive),
            icalendar::CalendarDateTime::WithTimezone { date_time, tzid } => {
                EventTime::DateTimeZoned {
                    datetime: date_time,
                    tzid,
                }
            }
        },
    }
}

/// Parse an EXDATE property into a list of EventTime values.
///
/// Handles the TZID parameter, VALUE=DATE, UTC and floating forms, and
/// comma-separated value lists, e.g.
/// `EXDATE;TZID=America/New_York:20240108T100000,20240115T100000`.
fn parse_exdate_property(prop: &Property) -> Vec<EventTime> {
    let tzid = prop
        .params
        .iter()
        .find(|p| p.key == "TZID")
        .and_then(|p| p.val.as_ref().map(|v| v.to_string()));

    let is_date = prop
        .params
        .iter()
        .any(|p| p.key == "VALUE" && p.val.as_ref().map(|v| v.as_ref()) == Some("DATE"));

    let parse_one = |s: &str| -> Option<EventTime> {
        if is_date {
            return chrono::NaiveDate::parse_from_str(s, "%Y%m%d")
                .ok()
                .map(EventTime::Date);
        }
        if let Some(ref tz) = tzid {
            return chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                .ok()
                .map(|dt| EventTime::DateTimeZoned {
                    datetime: dt,
                    tzid: tz.clone(),
                });
        }
        if let Some(stripped) = s.strip_suffix('Z') {
            return chrono::NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S")
                .ok()
                .map(|dt| EventTime::DateTimeUtc(dt.and_utc()));
        }
        chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
            .ok()
            .map(EventTime::DateTimeFloating)
    };

    prop.val
        .as_ref()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(parse_one)
        .collect()
}

/// Parse TRIGGER value to minutes before event (-PT30M, -P1D, etc.)
fn parse_trigger_minutes(value: &str) -> Option<i64> {
    let is_before = value.starts_with('-');
    let duration_str = value.trim_start_matches('-');

    let duration = iso8601::duration(duration_str).ok()?;
    let std_duration: std::time::Duration = duration.into();
    let minutes = (std_duration.as_secs() / 60) as i64;

    Some(if is_before { minutes } else { -minutes })
}

/// Parse a `20240110T090000Z` style UTC stamp (LAST-MODIFIED, DTSTAMP).
fn parse_utc_stamp(prop: &Property) -> Option<chrono::DateTime<chrono::Utc>> {
    let raw = prop.val.as_ref().trim_end_matches('Z');
    chrono::NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}
