//! Terminal rendering for caldock-core types.
//!
//! Extension traits that add colored output with owo_colors, keeping the
//! engine free of presentation concerns.

use caldock_core::conduit::SyncMode;
use caldock_core::event::{Event, EventTime};
use caldock_core::store::ChangeKind;
use owo_colors::OwoColorize;

pub trait Render {
    fn render(&self) -> String;
}

impl Render for ChangeKind {
    fn render(&self) -> String {
        match self {
            ChangeKind::Added => "+".green().to_string(),
            ChangeKind::Modified => "~".yellow().to_string(),
            ChangeKind::Deleted => "-".red().to_string(),
        }
    }
}

impl Render for SyncMode {
    fn render(&self) -> String {
        match self {
            SyncMode::Fast => "fast".green().to_string(),
            SyncMode::Slow => "slow".yellow().to_string(),
        }
    }
}

impl Render for Event {
    fn render(&self) -> String {
        let mut line = format!(
            "{} {}",
            render_event_time(&self.start).dimmed(),
            self.summary
        );
        if self.is_recurrent() {
            line.push_str(&format!(" {}", "(repeats)".cyan()));
        }
        line
    }
}

pub fn render_event_time(time: &EventTime) -> String {
    match time {
        EventTime::Date(date) => date.format("%Y-%m-%d").to_string(),
        EventTime::DateTimeUtc(dt) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        EventTime::DateTimeFloating(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        EventTime::DateTimeZoned { datetime, tzid } => {
            format!("{} {}", datetime.format("%Y-%m-%d %H:%M"), tzid)
        }
    }
}

pub fn pluralize(word: &str, count: usize) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}
