//! Lossy translation between desktop RRULEs and the device repeat vocabulary.
//!
//! The handheld knows five repeat shapes (daily, weekly by-mask, monthly by
//! ordinal weekday, monthly by date, yearly) and an optional fixed end date.
//! Going device-ward, anything the vocabulary cannot express is reported as
//! `UnsupportedRecurrence` and the caller degrades the event to
//! non-recurring. Going desktop-ward the translation is exact, except that a
//! COUNT rule pushed earlier comes back as a fixed end date unless the
//! round-trip heuristic below recognizes it.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use rrule::RRuleSet;
use tracing::warn;

use crate::device::{weekday_index, MonthWeek, Repeat, RepeatEnd, WeekdayMask};
use crate::error::{ConduitError, ConduitResult};
use crate::event::{resolve_local, EventTime, Recurrence};

/// How many occurrences we are willing to generate when turning a COUNT
/// rule into a fixed end date. Rules longer than this are treated as
/// open-ended; no handheld outlives ten thousand repeats of anything.
const MAX_EXPANSION: u16 = 10_000;

/// Translate a desktop rule into the device vocabulary.
///
/// `start` anchors the defaults (weekly rules without BYDAY repeat on the
/// start's weekday, monthly rules without a by-part on its day of month)
/// and the COUNT expansion.
pub fn to_device(recurrence: &Recurrence, start: &EventTime, tz: &Tz) -> ConduitResult<Repeat> {
    let rule = recurrence.rrule.as_str();
    let parts = scan_rule(rule)?;
    let interval = parts.interval;
    let end = repeat_end(&parts, start, rule, tz)?;

    match parts.freq.as_str() {
        "DAILY" => {
            if !parts.by_month_day.is_empty()
                || !parts.by_month.is_empty()
                || !parts.by_set_pos.is_empty()
            {
                return Err(unsupported(rule, "daily rule with by-parts"));
            }
            if parts.by_day.is_empty() {
                Ok(Repeat::Daily { interval, end })
            } else if interval == 1 {
                // "Every weekday" style rules fit the weekly mask.
                let days = weekly_mask(&parts.by_day, rule)?;
                Ok(Repeat::Weekly {
                    interval: 1,
                    days,
                    end,
                })
            } else {
                Err(unsupported(rule, "daily BYDAY with an interval"))
            }
        }
        "WEEKLY" => {
            if !parts.by_month_day.is_empty()
                || !parts.by_month.is_empty()
                || !parts.by_set_pos.is_empty()
            {
                return Err(unsupported(rule, "weekly rule with monthly by-parts"));
            }
            let days = if parts.by_day.is_empty() {
                WeekdayMask::from_iter([start.resolve(tz).weekday()])
            } else {
                weekly_mask(&parts.by_day, rule)?
            };
            Ok(Repeat::Weekly {
                interval,
                days,
                end,
            })
        }
        "MONTHLY" => {
            if !parts.by_month.is_empty() {
                return Err(unsupported(rule, "monthly rule with BYMONTH"));
            }
            match (&parts.by_day[..], &parts.by_month_day[..]) {
                ([], []) if parts.by_set_pos.is_empty() => Ok(Repeat::MonthlyByDate {
                    interval,
                    day: start.resolve(tz).day() as u8,
                    end,
                }),
                ([], [day]) if parts.by_set_pos.is_empty() && (1..=31).contains(day) => {
                    Ok(Repeat::MonthlyByDate {
                        interval,
                        day: *day as u8,
                        end,
                    })
                }
                ([token], []) => {
                    let (ordinal, day_token) = split_ordinal(token);
                    let position = match (ordinal, &parts.by_set_pos[..]) {
                        (Some(p), []) => p,
                        (None, [p]) => *p,
                        (None, []) => {
                            return Err(unsupported(rule, "monthly weekday without a position"))
                        }
                        _ => return Err(unsupported(rule, "conflicting weekday positions")),
                    };
                    let week = MonthWeek::from_position(position)
                        .ok_or_else(|| unsupported(rule, "weekday position beyond fifth/last"))?;
                    let day = weekday_from_token(day_token)
                        .ok_or_else(|| unsupported(rule, "malformed BYDAY"))?;
                    Ok(Repeat::MonthlyByDay {
                        interval,
                        week,
                        weekday: weekday_index(day),
                        end,
                    })
                }
                _ => Err(unsupported(rule, "monthly by-part combination")),
            }
        }
        "YEARLY" => {
            if !parts.by_day.is_empty() || !parts.by_set_pos.is_empty() {
                return Err(unsupported(rule, "yearly rule with weekday parts"));
            }
            // A BYMONTH/BYMONTHDAY restating the start date is redundant
            // and common; anything else moves the occurrence.
            let local = start.resolve(tz);
            if !parts.by_month.is_empty() && parts.by_month != [local.month()] {
                return Err(unsupported(rule, "yearly month differs from the start"));
            }
            if !parts.by_month_day.is_empty() && parts.by_month_day != [local.day() as i32] {
                return Err(unsupported(rule, "yearly day differs from the start"));
            }
            Ok(Repeat::Yearly { interval, end })
        }
        other => Err(unsupported(rule, &format!("frequency {}", other))),
    }
}

/// Translate a device repeat back into an RRULE value. `None` for
/// non-repeating records.
///
/// When the event already carries a COUNT rule whose shape matches the
/// device repeat and whose final occurrence lands on the device's end
/// date, the existing rule is kept verbatim so COUNT survives a round
/// trip through the handheld.
pub fn to_desktop(
    repeat: &Repeat,
    start: &EventTime,
    tz: &Tz,
    existing: Option<&Recurrence>,
) -> ConduitResult<Option<String>> {
    let Some(candidate) = candidate_rule(repeat, start, tz) else {
        return Ok(None);
    };

    if let Some(previous) = existing {
        if counts_occurrences(&previous.rrule) && same_structure(&previous.rrule, &candidate) {
            let last = last_occurrence(&previous.rrule, start, tz).ok().flatten();
            if let (Some(RepeatEnd::Until(until)), Some(last)) = (repeat.end().copied(), last) {
                if last == until {
                    return Ok(Some(previous.rrule.clone()));
                }
            }
        }
    }

    Ok(Some(candidate))
}

/// The local date of a rule's final occurrence, or `None` when the rule
/// is open-ended (or longer than we are willing to expand).
pub fn last_occurrence(
    rule: &str,
    start: &EventTime,
    tz: &Tz,
) -> ConduitResult<Option<NaiveDate>> {
    let block = rrule_block(start, rule);
    let set: RRuleSet = block
        .parse::<RRuleSet>()
        .map_err(|e| unsupported(rule, &e.to_string()))?;

    let result = set.all(MAX_EXPANSION);
    if result.limited {
        return Ok(None);
    }
    Ok(result
        .dates
        .last()
        .map(|last| occurrence_local_date(last, start, tz)))
}

/// Device exception slots carry the excluded instance's local start time.
pub fn exception_to_device(exdate: &EventTime, master_start: &EventTime, tz: &Tz) -> NaiveDateTime {
    match exdate {
        // A date-only exclusion strikes the occurrence at the master's time.
        EventTime::Date(d) => d.and_time(master_start.local_naive(tz).time()),
        other => other.local_naive(tz),
    }
}

pub fn exception_to_desktop(
    exception: NaiveDateTime,
    master_start: &EventTime,
    tz: &Tz,
) -> EventTime {
    if master_start.is_date() {
        EventTime::Date(exception.date())
    } else {
        EventTime::DateTimeUtc(resolve_local(exception, tz).with_timezone(&Utc))
    }
}

/// Build the `DTSTART` + `RRULE` block the rrule parser wants. Exceptions
/// are deliberately left out: the device carries them in its own slots,
/// and the end date of a COUNT rule is defined by the rule alone.
fn rrule_block(start: &EventTime, rule: &str) -> String {
    let dtstart = match start {
        EventTime::Date(d) => format!("DTSTART:{}T000000Z", d.format("%Y%m%d")),
        EventTime::DateTimeUtc(dt) => format!("DTSTART:{}", dt.format("%Y%m%dT%H%M%SZ")),
        EventTime::DateTimeFloating(dt) => format!("DTSTART:{}Z", dt.format("%Y%m%dT%H%M%S")),
        EventTime::DateTimeZoned { datetime, tzid } => {
            format!("DTSTART;TZID={}:{}", tzid, datetime.format("%Y%m%dT%H%M%S"))
        }
    };
    format!("{}\nRRULE:{}", dtstart, rule)
}

fn occurrence_local_date(dt: &chrono::DateTime<rrule::Tz>, start: &EventTime, tz: &Tz) -> NaiveDate {
    match start {
        EventTime::Date(_) => dt.date_naive(),
        EventTime::DateTimeUtc(_) => dt.with_timezone(tz).date_naive(),
        // Floating starts went into the block as if UTC; read them back out.
        EventTime::DateTimeFloating(_) => dt.naive_utc().date(),
        EventTime::DateTimeZoned { .. } => dt.naive_local().date(),
    }
}

#[derive(Default)]
struct RuleParts {
    freq: String,
    interval: u16,
    count: Option<u32>,
    until: Option<String>,
    by_day: Vec<String>,
    by_month_day: Vec<i32>,
    by_set_pos: Vec<i32>,
    by_month: Vec<u32>,
}

fn scan_rule(rule: &str) -> ConduitResult<RuleParts> {
    let mut parts = RuleParts {
        interval: 1,
        ..Default::default()
    };

    for item in rule.split(';').filter(|s| !s.is_empty()) {
        let Some((key, value)) = item.split_once('=') else {
            return Err(unsupported(rule, "malformed rule part"));
        };
        match key.to_ascii_uppercase().as_str() {
            "FREQ" => parts.freq = value.to_ascii_uppercase(),
            "INTERVAL" => {
                parts.interval = value
                    .parse()
                    .map_err(|_| unsupported(rule, "interval out of range"))?
            }
            "COUNT" => {
                parts.count = Some(
                    value
                        .parse()
                        .map_err(|_| unsupported(rule, "malformed COUNT"))?,
                )
            }
            "UNTIL" => parts.until = Some(value.to_string()),
            "BYDAY" => {
                parts.by_day = value.split(',').map(|s| s.to_ascii_uppercase()).collect()
            }
            "BYMONTHDAY" => parts.by_month_day = int_list(value, rule)?,
            "BYSETPOS" => parts.by_set_pos = int_list(value, rule)?,
            "BYMONTH" => {
                parts.by_month = value
                    .split(',')
                    .map(|v| v.parse().map_err(|_| unsupported(rule, "malformed BYMONTH")))
                    .collect::<ConduitResult<_>>()?
            }
            // The device has no notion of a week start.
            "WKST" => {}
            other => return Err(unsupported(rule, &format!("{} is not expressible", other))),
        }
    }

    if parts.freq.is_empty() {
        return Err(unsupported(rule, "missing FREQ"));
    }
    Ok(parts)
}

fn int_list(value: &str, rule: &str) -> ConduitResult<Vec<i32>> {
    value
        .split(',')
        .map(|v| v.parse().map_err(|_| unsupported(rule, "malformed numeric part")))
        .collect()
}

fn repeat_end(
    parts: &RuleParts,
    start: &EventTime,
    rule: &str,
    tz: &Tz,
) -> ConduitResult<RepeatEnd> {
    if let Some(count) = parts.count {
        if parts.until.is_some() {
            return Err(unsupported(rule, "both COUNT and UNTIL"));
        }
        // The device only stores a fixed end date, so pin COUNT to the
        // date of the final occurrence.
        return match last_occurrence(rule, start, tz)? {
            Some(date) => Ok(RepeatEnd::Until(date)),
            None => {
                warn!(rule, count, "COUNT too large to expand, treating as open-ended");
                Ok(RepeatEnd::Forever)
            }
        };
    }

    match &parts.until {
        None => Ok(RepeatEnd::Forever),
        Some(value) => Ok(RepeatEnd::Until(parse_until(value, rule, tz)?)),
    }
}

fn parse_until(value: &str, rule: &str, tz: &Tz) -> ConduitResult<NaiveDate> {
    if value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|_| unsupported(rule, "malformed UNTIL"));
    }

    let utc = value.strip_suffix('Z');
    let naive = NaiveDateTime::parse_from_str(utc.unwrap_or(value), "%Y%m%dT%H%M%S")
        .map_err(|_| unsupported(rule, "malformed UNTIL"))?;

    Ok(match utc {
        // A UTC bound lands on whatever local day it maps to.
        Some(_) => Utc
            .from_utc_datetime(&naive)
            .with_timezone(tz)
            .date_naive(),
        None => naive.date(),
    })
}

fn candidate_rule(repeat: &Repeat, start: &EventTime, tz: &Tz) -> Option<String> {
    let (freq, by_part, interval, end) = match repeat {
        Repeat::None => return None,
        Repeat::Daily { interval, end } => ("DAILY", None, *interval, *end),
        Repeat::Weekly {
            interval,
            days,
            end,
        } => {
            let days = if days.is_empty() {
                vec![start.resolve(tz).weekday()]
            } else {
                days.days()
            };
            let tokens: Vec<&str> = days
                .into_iter()
                .map(|d| weekday_token(weekday_index(d)))
                .collect();
            (
                "WEEKLY",
                Some(format!("BYDAY={}", tokens.join(","))),
                *interval,
                *end,
            )
        }
        Repeat::MonthlyByDay {
            interval,
            week,
            weekday,
            end,
        } => (
            "MONTHLY",
            Some(format!(
                "BYDAY={}{}",
                week.to_position(),
                weekday_token(*weekday)
            )),
            *interval,
            *end,
        ),
        Repeat::MonthlyByDate { interval, day, end } => (
            "MONTHLY",
            Some(format!("BYMONTHDAY={}", day)),
            *interval,
            *end,
        ),
        Repeat::Yearly { interval, end } => ("YEARLY", None, *interval, *end),
    };

    let mut rule = format!("FREQ={}", freq);
    if interval > 1 {
        rule.push_str(&format!(";INTERVAL={}", interval));
    }
    if let Some(part) = by_part {
        rule.push_str(&format!(";{}", part));
    }
    if let RepeatEnd::Until(date) = end {
        rule.push_str(&format!(";UNTIL={}", format_until(date, start, tz)));
    }
    Some(rule)
}

fn format_until(date: NaiveDate, start: &EventTime, tz: &Tz) -> String {
    if start.is_date() {
        return date.format("%Y%m%d").to_string();
    }
    // The final occurrence begins at the event's wall-clock time.
    let time = start.local_naive(tz).time();
    let local = resolve_local(date.and_time(time), tz);
    local.with_timezone(&Utc).format("%Y%m%dT%H%M%SZ").to_string()
}

fn counts_occurrences(rule: &str) -> bool {
    rule.split(';')
        .any(|part| part.to_ascii_uppercase().starts_with("COUNT="))
}

fn same_structure(a: &str, b: &str) -> bool {
    normalized_structure(a) == normalized_structure(b)
}

/// A rule's shape with the end condition stripped out: uppercased keys,
/// value lists sorted, COUNT/UNTIL/WKST and a redundant INTERVAL=1 gone.
fn normalized_structure(rule: &str) -> BTreeMap<String, String> {
    rule.split(';')
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| {
            let mut values: Vec<String> = v.split(',').map(|s| s.to_ascii_uppercase()).collect();
            values.sort();
            (k.to_ascii_uppercase(), values.join(","))
        })
        .filter(|(k, v)| {
            !matches!(k.as_str(), "COUNT" | "UNTIL" | "WKST")
                && !(k.as_str() == "INTERVAL" && v.as_str() == "1")
        })
        .collect()
}

fn weekly_mask(tokens: &[String], rule: &str) -> ConduitResult<WeekdayMask> {
    tokens
        .iter()
        .map(|token| {
            weekday_from_token(token)
                .ok_or_else(|| unsupported(rule, "weekly BYDAY must be plain weekdays"))
        })
        .collect()
}

/// Split an ordinal BYDAY token like `2TU` or `-1FR` into its parts.
fn split_ordinal(token: &str) -> (Option<i32>, &str) {
    if token.len() <= 2 {
        return (None, token);
    }
    let (num, day) = token.split_at(token.len() - 2);
    (num.parse().ok(), day)
}

fn weekday_from_token(token: &str) -> Option<Weekday> {
    match token {
        "SU" => Some(Weekday::Sun),
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        _ => None,
    }
}

fn weekday_token(index: u8) -> &'static str {
    ["SU", "MO", "TU", "WE", "TH", "FR", "SA"][(index % 7) as usize]
}

fn unsupported(rule: &str, why: &str) -> ConduitError {
    ConduitError::UnsupportedRecurrence(format!("'{}': {}", rule, why))
}
