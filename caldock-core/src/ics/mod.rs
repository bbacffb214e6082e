//! ICS parsing and generation for the desktop calendar store.

mod generate;
mod parse;

pub use generate::generate_ics;
pub use parse::parse_event;
