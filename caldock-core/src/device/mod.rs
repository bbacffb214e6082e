//! Handheld-side types: record envelopes and the datebook payload.

pub mod datebook;
pub mod record;

pub use datebook::{
    weekday_from_index, weekday_index, AdvanceUnit, AlarmAdvance, DatebookPayload, MonthWeek,
    Repeat, RepeatEnd, WeekdayMask, MAX_ALARM_ADVANCE,
};
pub use record::{CategoryTable, DeviceRecord, RecordStatus, MAX_CATEGORIES};
