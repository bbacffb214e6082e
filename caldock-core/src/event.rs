//! Store-neutral calendar event types.
//!
//! These types represent desktop calendar components in a store-agnostic way.
//! The calendar store parses `.ics` files into them, and the conduit engine
//! works exclusively with them for change detection, splitting and
//! transcoding to the handheld.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A desktop calendar event.
///
/// The engine holds owned clones of these for the duration of one sync pass;
/// the calendar store remains the system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,

    /// Access classification (CLASS). Private components become secret
    /// records on the handheld.
    pub classification: Classification,
    /// First CATEGORIES value, mapped to the device category table.
    pub category: Option<String>,

    // Recurrence fields
    /// RRULE plus EXDATEs for master events
    pub recurrence: Option<Recurrence>,
    /// Original start time for this instance (RECURRENCE-ID). Set only on
    /// detached instances of a recurring series.
    pub recurrence_id: Option<EventTime>,

    /// Reminders/alarms for this event
    pub reminders: Vec<Reminder>,

    /// Last modification timestamp (LAST-MODIFIED)
    pub updated: Option<DateTime<Utc>>,
}

impl Event {
    /// True for recurring masters and for detached instances of a series.
    /// The multi-day splitter leaves both alone.
    pub fn is_recurrent(&self) -> bool {
        self.recurrence.is_some() || self.recurrence_id.is_some()
    }
}

/// A recurrence rule with its exception dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recurrence {
    /// Raw RRULE value, e.g. `FREQ=WEEKLY;BYDAY=MO;COUNT=5`
    pub rrule: String,
    /// Excluded occurrence start times (EXDATE)
    pub exdates: Vec<EventTime>,
}

/// A reminder/alarm for an event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    /// Minutes before the event start to trigger
    pub minutes: i64,
}

/// Access classification (CLASS property).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Public,
    Private,
}

impl Default for Classification {
    fn default() -> Self {
        Classification::Public
    }
}

/// A point in time as calendars express it: a bare date (all-day), a UTC
/// instant, a floating wall-clock time, or a wall-clock time in a named zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventTime {
    Date(NaiveDate),
    DateTimeUtc(DateTime<Utc>),
    DateTimeFloating(NaiveDateTime),
    DateTimeZoned { datetime: NaiveDateTime, tzid: String },
}

impl EventTime {
    /// True for date-only (all-day) values.
    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// The UTC instant, if one exists without picking a zone for it.
    ///
    /// Bare dates have no instant. Floating times are taken as UTC, matching
    /// how they are fed to the recurrence expander. A zoned time with an
    /// unknown TZID also yields `None`.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            EventTime::Date(_) => None,
            EventTime::DateTimeUtc(dt) => Some(*dt),
            EventTime::DateTimeFloating(dt) => Some(dt.and_utc()),
            EventTime::DateTimeZoned { datetime, tzid } => {
                let tz: Tz = tzid.parse().ok()?;
                Some(resolve_local(*datetime, &tz).with_timezone(&Utc))
            }
        }
    }

    /// Resolve to an instant in the conduit zone `tz`.
    ///
    /// Bare dates resolve to local midnight; floating times are read as wall
    /// clock in `tz`; zoned times with an unparseable TZID fall back to the
    /// same wall-clock reading.
    pub fn resolve(&self, tz: &Tz) -> DateTime<Tz> {
        match self {
            EventTime::Date(d) => resolve_local(d.and_hms_opt(0, 0, 0).unwrap_or_default(), tz),
            EventTime::DateTimeUtc(dt) => dt.with_timezone(tz),
            EventTime::DateTimeFloating(dt) => resolve_local(*dt, tz),
            EventTime::DateTimeZoned { datetime, tzid } => match tzid.parse::<Tz>() {
                Ok(source) => resolve_local(*datetime, &source).with_timezone(tz),
                Err(_) => resolve_local(*datetime, tz),
            },
        }
    }

    /// Device-local wall clock in the conduit zone.
    pub fn local_naive(&self, tz: &Tz) -> NaiveDateTime {
        match self {
            // No zone math for bare dates: midnight of the named day.
            EventTime::Date(d) => d.and_hms_opt(0, 0, 0).unwrap_or_default(),
            other => other.resolve(tz).naive_local(),
        }
    }
}

/// Interpret a wall-clock time in `tz`, tolerating DST gaps and folds.
///
/// Ambiguous times take the earlier mapping; nonexistent times (spring-
/// forward gap) are read as if the offset had not changed.
pub(crate) fn resolve_local(naive: NaiveDateTime, tz: &Tz) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(earliest, _) => earliest,
        chrono::LocalResult::None => tz.from_utc_datetime(&naive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_resolve_bare_date_is_local_midnight() {
        let t = EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        let tz: Tz = "America/New_York".parse().unwrap();

        let resolved = t.resolve(&tz);
        assert_eq!(
            resolved.naive_local(),
            NaiveDate::from_ymd_opt(2024, 1, 10)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_zoned_time_converts_between_zones() {
        let t = EventTime::DateTimeZoned {
            datetime: NaiveDate::from_ymd_opt(2024, 1, 10)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            tzid: "America/New_York".to_string(),
        };
        let utc = t.to_utc().expect("zoned time resolves");
        // 09:00 EST == 14:00 UTC
        assert_eq!(utc.format("%H:%M").to_string(), "14:00");
    }

    #[test]
    fn test_unknown_tzid_falls_back_to_wall_clock() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let t = EventTime::DateTimeZoned {
            datetime: naive,
            tzid: "Not/AZone".to_string(),
        };
        let tz: Tz = "UTC".parse().unwrap();
        assert_eq!(t.resolve(&tz).naive_local(), naive);
    }
}
