//! Fast/slow sync decision.

use std::fmt;

use tracing::info;

use crate::conduit::IdentifierMap;

/// How a pass walks the handheld database.
///
/// A fast pass visits only records the handheld flags as changed and
/// trusts the identifier map for everything else. A slow pass visits
/// every record and re-derives the map by content comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    Fast,
    #[default]
    Slow,
}

impl SyncMode {
    pub fn is_fast(&self) -> bool {
        matches!(self, SyncMode::Fast)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Fast => write!(f, "fast"),
            SyncMode::Slow => write!(f, "slow"),
        }
    }
}

/// Pick the mode for this pass. Fast sync is only safe when the map has
/// bindings to trust and they were made against the same store we are
/// about to sync; anything else falls back to slow.
pub fn decide(map: &IdentifierMap, last_uri: Option<&str>, current_uri: &str) -> SyncMode {
    let mode = if last_uri != Some(current_uri) {
        info!(?last_uri, current_uri, "Store changed since last sync");
        SyncMode::Slow
    } else if map.is_empty() {
        info!("No identifier bindings on file");
        SyncMode::Slow
    } else {
        SyncMode::Fast
    };
    info!(%mode, bindings = map.len(), "Sync mode decided");
    mode
}
