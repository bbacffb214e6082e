//! ICS file generation.

use crate::error::ConduitResult;
use crate::event::{Classification, Event, EventTime};
use icalendar::{Alarm, Calendar, Component, EventLike, Property, Trigger, ValueType};

/// Generate .ics content for an event.
pub fn generate_ics(event: &Event) -> ConduitResult<String> {
    let mut cal = Calendar::new();

    let mut ics_event = icalendar::Event::new();
    ics_event.uid(&event.uid);
    ics_event.summary(&event.summary);

    // DTSTAMP - required by RFC 5545, use updated timestamp or current time.
    // Change detection hashes the Event struct, not this output, so the
    // non-determinism here is harmless.
    let dtstamp = event
        .updated
        .unwrap_or_else(chrono::Utc::now)
        .format("%Y%m%dT%H%M%SZ")
        .to_string();
    ics_event.add_property("DTSTAMP", &dtstamp);

    // LAST-MODIFIED
    if let Some(updated) = event.updated {
        let last_modified = updated.format("%Y%m%dT%H%M%SZ").to_string();
        ics_event.add_property("LAST-MODIFIED", &last_modified);
    }

    // Set start/end times
    add_datetime_property(&mut ics_event, "DTSTART", &event.start);
    add_datetime_property(&mut ics_event, "DTEND", &event.end);

    // Optional fields
    if let Some(ref desc) = event.description {
        ics_event.description(desc);
    }

    if let Some(ref loc) = event.location {
        ics_event.location(loc);
    }

    // CLASS - only emit if not PUBLIC (the implied default)
    if event.classification == Classification::Private {
        ics_event.add_property("CLASS", "PRIVATE");
    }

    if let Some(ref category) = event.category {
        ics_event.add_property("CATEGORIES", category);
    }

    // Recurrence rules (for master events)
    if let Some(ref recurrence) = event.recurrence {
        ics_event.add_property("RRULE", &recurrence.rrule);
        for exdate in &recurrence.exdates {
            add_exdate_property(&mut ics_event, exdate);
        }
    }

    // RECURRENCE-ID (for instance overrides of recurring events)
    if let Some(ref recurrence_id) = event.recurrence_id {
        add_datetime_property(&mut ics_event, "RECURRENCE-ID", recurrence_id);
    }

    // Add alarms (VALARM components) - minimal per RFC 5545
    for reminder in &event.reminders {
        let trigger = Trigger::before_start(chrono::Duration::minutes(reminder.minutes));
        let alarm = Alarm::display("Reminder", trigger);
        ics_event.alarm(alarm);
    }

    let ics_event = ics_event.done();
    cal.push(ics_event);
    let cal = cal.done();

    // Post-process to remove unnecessary bloat from the icalendar crate's output
    let output = strip_ics_bloat(&cal.to_string());

    Ok(output)
}

/// Clean up ICS output from the icalendar crate
/// - Replace PRODID with CALDOCK (we post-process the output)
/// - Remove CALSCALE:GREGORIAN (it's the default)
/// - Remove DTSTAMP and UID inside VALARM sections (not required by RFC 5545)
fn strip_ics_bloat(ics: &str) -> String {
    let mut result = String::with_capacity(ics.len());
    let mut in_valarm = false;

    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str("PRODID:CALDOCK\r\n");
            continue;
        }

        // Skip CALSCALE:GREGORIAN (it's the default)
        if line == "CALSCALE:GREGORIAN" {
            continue;
        }

        if line == "BEGIN:VALARM" {
            in_valarm = true;
        } else if line == "END:VALARM" {
            in_valarm = false;
        }

        // Skip DTSTAMP and UID lines inside VALARM
        if in_valarm && (line.starts_with("DTSTAMP:") || line.starts_with("UID:")) {
            continue;
        }

        result.push_str(line);
        result.push_str("\r\n");
    }

    result
}

/// Add a datetime property with proper formatting based on EventTime variant
fn add_datetime_property(ics_event: &mut icalendar::Event, name: &str, time: &EventTime) {
    match time {
        EventTime::Date(d) => {
            let mut prop = Property::new(name, d.format("%Y%m%d").to_string());
            prop.append_parameter(ValueType::Date);
            ics_event.append_property(prop);
        }
        EventTime::DateTimeUtc(dt) => {
            ics_event.add_property(name, dt.format("%Y%m%dT%H%M%SZ").to_string());
        }
        EventTime::DateTimeFloating(dt) => {
            ics_event.add_property(name, dt.format("%Y%m%dT%H%M%S").to_string());
        }
        EventTime::DateTimeZoned { datetime, tzid } => {
            let mut prop = Property::new(name, datetime.format("%Y%m%dT%H%M%S").to_string());
            prop.add_parameter("TZID", tzid);
            ics_event.append_property(prop);
        }
    }
}

/// Add an EXDATE property for a single exception date
fn add_exdate_property(ics_event: &mut icalendar::Event, time: &EventTime) {
    match time {
        EventTime::Date(d) => {
            let mut prop = Property::new("EXDATE", d.format("%Y%m%d").to_string());
            prop.append_parameter(ValueType::Date);
            ics_event.append_multi_property(prop);
        }
        EventTime::DateTimeUtc(dt) => {
            let prop = Property::new("EXDATE", dt.format("%Y%m%dT%H%M%SZ").to_string());
            ics_event.append_multi_property(prop);
        }
        EventTime::DateTimeFloating(dt) => {
            let prop = Property::new("EXDATE", dt.format("%Y%m%dT%H%M%S").to_string());
            ics_event.append_multi_property(prop);
        }
        EventTime::DateTimeZoned { datetime, tzid } => {
            let mut prop = Property::new("EXDATE", datetime.format("%Y%m%dT%H%M%S").to_string());
            prop.add_parameter("TZID", tzid);
            ics_event.append_multi_property(prop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Reminder;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn make_test_event() -> Event {
        Event {
            uid: "test-event-123@caldock".to_string(),
            summary: "Test Event".to_string(),
            description: None,
            location: None,
            start: EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 20, 15, 0, 0).unwrap()),
            end: EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 20, 16, 0, 0).unwrap()),
            classification: Classification::Public,
            category: None,
            recurrence: None,
            recurrence_id: None,
            reminders: vec![],
            updated: None,
        }
    }

    #[test]
    fn test_generate_ics_all_day_event_has_value_date() {
        let mut event = make_test_event();
        event.start = EventTime::Date(NaiveDate::from_ymd_opt(2025, 3, 20).unwrap());
        event.end = EventTime::Date(NaiveDate::from_ymd_opt(2025, 3, 21).unwrap());

        let ics = generate_ics(&event).unwrap();

        assert!(
            ics.contains("DTSTART;VALUE=DATE:20250320"),
            "DTSTART should have VALUE=DATE parameter. ICS:\n{}",
            ics
        );
        assert!(
            ics.contains("DTEND;VALUE=DATE:20250321"),
            "DTEND should have VALUE=DATE parameter. ICS:\n{}",
            ics
        );
    }

    #[test]
    fn test_generate_ics_private_event_has_class() {
        let mut event = make_test_event();
        event.classification = Classification::Private;

        let ics = generate_ics(&event).unwrap();
        assert!(
            ics.contains("CLASS:PRIVATE"),
            "Private event should carry CLASS:PRIVATE. ICS:\n{}",
            ics
        );
    }

    #[test]
    fn test_generate_ics_public_event_omits_class() {
        let ics = generate_ics(&make_test_event()).unwrap();
        assert!(
            !ics.contains("CLASS:"),
            "Public is the default and should not be emitted. ICS:\n{}",
            ics
        );
    }

    #[test]
    fn test_generate_ics_alarm_is_minimal() {
        let mut event = make_test_event();
        event.reminders = vec![Reminder { minutes: 30 }];

        let ics = generate_ics(&event).unwrap();

        assert!(ics.contains("BEGIN:VALARM"), "Should have VALARM");
        assert!(ics.contains("ACTION:DISPLAY"), "Should have ACTION:DISPLAY");
        assert!(ics.contains("TRIGGER"), "Should have TRIGGER");
        let valarm_section: String = ics
            .split("BEGIN:VALARM")
            .nth(1)
            .unwrap()
            .split("END:VALARM")
            .next()
            .unwrap()
            .to_string();
        assert!(
            !valarm_section.contains("UID:"),
            "VALARM should not have UID. Got:\n{}",
            valarm_section
        );
        assert!(
            !valarm_section.contains("DTSTAMP:"),
            "VALARM should not have DTSTAMP. Got:\n{}",
            valarm_section
        );
    }

    #[test]
    fn test_generate_ics_exdates_follow_rrule() {
        use crate::event::Recurrence;

        let mut event = make_test_event();
        event.recurrence = Some(Recurrence {
            rrule: "FREQ=WEEKLY;BYDAY=MO".to_string(),
            exdates: vec![
                EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 3, 24, 15, 0, 0).unwrap()),
                EventTime::Date(NaiveDate::from_ymd_opt(2025, 3, 31).unwrap()),
            ],
        });

        let ics = generate_ics(&event).unwrap();
        assert!(ics.contains("RRULE:FREQ=WEEKLY;BYDAY=MO"));
        assert!(ics.contains("EXDATE:20250324T150000Z"));
        assert!(ics.contains("EXDATE;VALUE=DATE:20250331"));
    }
}
