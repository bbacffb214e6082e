use anyhow::Result;
use caldock_core::conduit::{decide, recurrence, IdentifierMap};
use caldock_core::store::{CalendarStore, ChangeKind, DirStore};
use caldock_core::ConduitConfig;
use owo_colors::OwoColorize;

use crate::render::{pluralize, Render};

/// Above this many pending changes, show counts instead of lines.
const COMPACT_THRESHOLD: usize = 10;

pub fn run(config: &ConduitConfig) -> Result<()> {
    let mut store = DirStore::new(config.calendar_path());
    store.open()?;

    let events = store.events()?;
    let repeating = events.iter().filter(|e| e.is_recurrent()).count();

    println!("📅 {}", config.calendar_path().display());
    println!(
        "   {} {} ({} repeating)",
        events.len(),
        pluralize("event", events.len()),
        repeating
    );
    println!();

    let state_dir = config.state_path();
    let map = IdentifierMap::load(&state_dir);
    let last_uri = IdentifierMap::load_last_uri(&state_dir);
    let archived = map.ids().filter(|&id| map.is_archived(id)).count();

    println!(
        "   {} {} on file ({} archived)",
        map.len(),
        pluralize("binding", map.len()),
        archived
    );
    let mode = decide(&map, last_uri.as_deref(), &store.uri());
    println!("   next pass: {}", mode.render());
    println!();

    let changes = store.changes_since(&config.device_token)?;
    if changes.is_empty() {
        println!("   {}", "nothing waiting for the handheld".dimmed());
    } else {
        println!(
            "   {} {} waiting for '{}':",
            changes.len(),
            pluralize("change", changes.len()),
            config.device_token
        );
        if changes.len() <= COMPACT_THRESHOLD {
            for change in &changes {
                match &change.event {
                    Some(event) => println!("   {} {}", change.kind.render(), event.render()),
                    None => println!("   {} {}", change.kind.render(), change.uid.dimmed()),
                }
            }
        } else {
            let added = changes.iter().filter(|c| c.kind == ChangeKind::Added).count();
            let modified = changes
                .iter()
                .filter(|c| c.kind == ChangeKind::Modified)
                .count();
            let deleted = changes
                .iter()
                .filter(|c| c.kind == ChangeKind::Deleted)
                .count();
            if added > 0 {
                println!("   {} {} new", "+".green(), added);
            }
            if modified > 0 {
                println!("   {} {} changed", "~".yellow(), modified);
            }
            if deleted > 0 {
                println!("   {} {} deleted", "-".red(), deleted);
            }
        }
    }

    // Rules the handheld vocabulary cannot carry sync as one-off events;
    // flag them before the pass does it silently.
    let tz = config.conduit_timezone()?;
    let degraded: Vec<_> = events
        .iter()
        .filter_map(|event| {
            let rec = event.recurrence.as_ref()?;
            recurrence::to_device(rec, &event.start, &tz)
                .err()
                .map(|err| (event, err))
        })
        .collect();

    if !degraded.is_empty() {
        println!();
        println!(
            "   {} {} will reach the device as non-repeating:",
            degraded.len(),
            pluralize("event", degraded.len())
        );
        for (event, err) in degraded {
            println!("   {} {}", "!".red(), event.render());
            println!("      {}", err.to_string().dimmed());
        }
    }

    Ok(())
}
