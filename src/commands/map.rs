use anyhow::Result;
use caldock_core::conduit::IdentifierMap;
use caldock_core::ConduitConfig;
use owo_colors::OwoColorize;

use crate::render::pluralize;

pub fn run(config: &ConduitConfig, archived_only: bool) -> Result<()> {
    let state_dir = config.state_path();
    let map = IdentifierMap::load(&state_dir);

    match IdentifierMap::load_last_uri(&state_dir) {
        Some(uri) => println!("🔗 bound to {}", uri),
        None => println!("🔗 {}", "never synced".dimmed()),
    }

    let mut ids: Vec<u32> = map
        .ids()
        .filter(|&id| !archived_only || map.is_archived(id))
        .collect();
    ids.sort_unstable();

    if ids.is_empty() {
        let label = if archived_only {
            "no archived bindings"
        } else {
            "no bindings"
        };
        println!("   {}", label.dimmed());
        return Ok(());
    }

    println!("   {} {}", ids.len(), pluralize("binding", ids.len()));
    for id in ids {
        let uid = map.uid_for(id).unwrap_or("?");
        if map.is_archived(id) {
            println!("   {:>8}  {} {}", id, uid, "(archived)".dimmed());
        } else {
            println!("   {:>8}  {}", id, uid);
        }
    }

    Ok(())
}
