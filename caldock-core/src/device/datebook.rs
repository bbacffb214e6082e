//! Datebook payload: the handheld's view of a calendar entry.
//!
//! The handheld stores wall-clock times with no zone, a fixed repeat
//! vocabulary (daily / weekly-by-mask / monthly-by-day / monthly-by-date /
//! yearly, each with an interval and an optional end date), a flat list of
//! exception timestamps, and at most one alarm whose advance is a small
//! integer in minutes, hours or days.
//!
//! Payloads are encoded with bincode. The encoding is deterministic, which
//! the sync protocol relies on: record comparison is byte equality of
//! encoded payloads.

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{ConduitError, ConduitResult};

/// Largest advance value the device can store, in any unit.
pub const MAX_ALARM_ADVANCE: i64 = 99;

/// Decoded datebook entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatebookPayload {
    pub summary: String,
    pub note: Option<String>,
    /// Device-local wall clock.
    pub begin: NaiveDateTime,
    pub end: NaiveDateTime,
    /// All-day entry; times carry only the date.
    pub untimed: bool,
    pub repeat: Repeat,
    /// Excluded occurrence starts, device-local.
    pub exceptions: Vec<NaiveDateTime>,
    pub alarm: Option<AlarmAdvance>,
}

impl DatebookPayload {
    pub fn encode(&self) -> ConduitResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ConduitError::RecordEncode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> ConduitResult<Self> {
        bincode::deserialize(bytes).map_err(|e| ConduitError::RecordDecode(e.to_string()))
    }
}

/// The device's repeat vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Repeat {
    None,
    Daily {
        interval: u16,
        end: RepeatEnd,
    },
    Weekly {
        interval: u16,
        days: WeekdayMask,
        end: RepeatEnd,
    },
    /// "Second Wednesday of every month" style.
    MonthlyByDay {
        interval: u16,
        week: MonthWeek,
        /// 0 = Sunday .. 6 = Saturday.
        weekday: u8,
        end: RepeatEnd,
    },
    /// Fixed day-of-month.
    MonthlyByDate {
        interval: u16,
        day: u8,
        end: RepeatEnd,
    },
    Yearly {
        interval: u16,
        end: RepeatEnd,
    },
}

impl Repeat {
    pub fn is_none(&self) -> bool {
        matches!(self, Repeat::None)
    }

    pub fn end(&self) -> Option<&RepeatEnd> {
        match self {
            Repeat::None => None,
            Repeat::Daily { end, .. }
            | Repeat::Weekly { end, .. }
            | Repeat::MonthlyByDay { end, .. }
            | Repeat::MonthlyByDate { end, .. }
            | Repeat::Yearly { end, .. } => Some(end),
        }
    }
}

/// Whether a repeating entry runs forever or stops on a date (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatEnd {
    Forever,
    Until(NaiveDate),
}

/// Which occurrence of a weekday inside the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonthWeek {
    First,
    Second,
    Third,
    Fourth,
    Last,
}

impl MonthWeek {
    /// Map an RRULE by-day position to the device enumeration. Positions
    /// 1..=4 map directly, 5 and -1 both mean "last"; anything else is
    /// outside the vocabulary.
    pub fn from_position(pos: i32) -> Option<MonthWeek> {
        match pos {
            1 => Some(MonthWeek::First),
            2 => Some(MonthWeek::Second),
            3 => Some(MonthWeek::Third),
            4 => Some(MonthWeek::Fourth),
            5 | -1 => Some(MonthWeek::Last),
            _ => None,
        }
    }

    /// The RRULE by-day position for this week (`Last` is -1).
    pub fn to_position(self) -> i32 {
        match self {
            MonthWeek::First => 1,
            MonthWeek::Second => 2,
            MonthWeek::Third => 3,
            MonthWeek::Fourth => 4,
            MonthWeek::Last => -1,
        }
    }
}

/// Seven weekday bits, Sunday first: the device's weekly repeat selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeekdayMask(pub u8);

impl WeekdayMask {
    pub fn empty() -> Self {
        WeekdayMask(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 & 0x7f == 0
    }

    pub fn set(&mut self, day: Weekday) {
        self.0 |= 1 << weekday_index(day);
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << weekday_index(day)) != 0
    }

    /// Selected weekdays, Sunday first.
    pub fn days(&self) -> Vec<Weekday> {
        (0u8..7)
            .filter(|bit| self.0 & (1 << bit) != 0)
            .map(weekday_from_index)
            .collect()
    }
}

impl FromIterator<Weekday> for WeekdayMask {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut mask = WeekdayMask::empty();
        for day in iter {
            mask.set(day);
        }
        mask
    }
}

/// Device weekday numbering: 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

pub fn weekday_from_index(index: u8) -> Weekday {
    match index % 7 {
        0 => Weekday::Sun,
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        _ => Weekday::Sat,
    }
}

/// Alarm advance in device units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmAdvance {
    pub unit: AdvanceUnit,
    /// 0..=99.
    pub value: u8,
}

impl AlarmAdvance {
    /// The advance expressed in minutes before start.
    pub fn minutes(&self) -> i64 {
        self.value as i64 * self.unit.minutes_per_unit()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvanceUnit {
    Minutes,
    Hours,
    Days,
}

impl AdvanceUnit {
    pub fn minutes_per_unit(&self) -> i64 {
        match self {
            AdvanceUnit::Minutes => 1,
            AdvanceUnit::Hours => 60,
            AdvanceUnit::Days => 1440,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> DatebookPayload {
        let begin = NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        DatebookPayload {
            summary: "Standup".to_string(),
            note: Some("Bring notes".to_string()),
            begin,
            end: begin + chrono::Duration::minutes(30),
            untimed: false,
            repeat: Repeat::Weekly {
                interval: 1,
                days: [Weekday::Mon, Weekday::Wed].into_iter().collect(),
                end: RepeatEnd::Forever,
            },
            exceptions: vec![],
            alarm: Some(AlarmAdvance {
                unit: AdvanceUnit::Minutes,
                value: 10,
            }),
        }
    }

    #[test]
    fn test_payload_encoding_is_stable() {
        let payload = sample_payload();
        let a = payload.encode().unwrap();
        let b = payload.encode().unwrap();
        assert_eq!(a, b, "Encoding the same payload twice must be identical");

        let decoded = DatebookPayload::decode(&a).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_corrupt_payload_is_a_decode_error() {
        let err = DatebookPayload::decode(&[0xff, 0x01, 0x02]).unwrap_err();
        assert!(
            matches!(err, ConduitError::RecordDecode(_)),
            "Expected RecordDecode, got {:?}",
            err
        );
    }

    #[test]
    fn test_weekday_mask_round_trip() {
        let mask: WeekdayMask = [Weekday::Sun, Weekday::Sat].into_iter().collect();
        assert!(mask.contains(Weekday::Sun));
        assert!(mask.contains(Weekday::Sat));
        assert!(!mask.contains(Weekday::Wed));
        assert_eq!(mask.days(), vec![Weekday::Sun, Weekday::Sat]);
        assert_eq!(mask.0, 0b0100_0001);
    }

    #[test]
    fn test_month_week_positions() {
        assert_eq!(MonthWeek::from_position(2), Some(MonthWeek::Second));
        assert_eq!(MonthWeek::from_position(-1), Some(MonthWeek::Last));
        assert_eq!(MonthWeek::from_position(5), Some(MonthWeek::Last));
        assert_eq!(MonthWeek::from_position(6), None);
        assert_eq!(MonthWeek::from_position(0), None);
        assert_eq!(MonthWeek::from_position(-2), None);
        assert_eq!(MonthWeek::Last.to_position(), -1);
    }

    #[test]
    fn test_alarm_advance_minutes() {
        let advance = AlarmAdvance {
            unit: AdvanceUnit::Hours,
            value: 26,
        };
        assert_eq!(advance.minutes(), 1560);
    }
}
