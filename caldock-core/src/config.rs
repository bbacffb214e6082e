//! Conduit configuration.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{ConduitError, ConduitResult};

static DEFAULT_CALENDAR_PATH: &str = "~/calendar";

fn default_calendar_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CALENDAR_PATH)
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_token() -> String {
    "handheld".to_string()
}

fn default_split() -> bool {
    true
}

/// Configuration at ~/.config/caldock/config.toml
///
/// Sync state (identifier map, change snapshots) is not configuration;
/// it lives under `.caldock/state` inside the calendar directory unless
/// `state_dir` points elsewhere.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConduitConfig {
    /// The directory of .ics files the conduit syncs.
    #[serde(default = "default_calendar_dir")]
    pub calendar_dir: PathBuf,

    /// IANA zone the handheld's wall-clock times are interpreted in.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Rewrite multi-day appointments into per-day fragments before a pass.
    #[serde(default = "default_split")]
    pub split_multi_day: bool,

    /// Change-log token naming the device pairing.
    #[serde(default = "default_token")]
    pub device_token: String,

    /// Override for the sync-state directory.
    pub state_dir: Option<PathBuf>,
}

impl Default for ConduitConfig {
    fn default() -> Self {
        ConduitConfig {
            calendar_dir: default_calendar_dir(),
            timezone: default_timezone(),
            split_multi_day: default_split(),
            device_token: default_token(),
            state_dir: None,
        }
    }
}

impl ConduitConfig {
    pub fn config_path() -> ConduitResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConduitError::Config("Could not determine config directory".into()))?
            .join("caldock");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from the given file, or defaults if it does not exist.
    pub fn load(path: &Path) -> ConduitResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ConduitConfig =
                toml::from_str(&content).map_err(|e| ConduitError::Config(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> ConduitResult<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConduitError::Config(e.to_string()))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// The calendar directory with a leading `~` expanded.
    pub fn calendar_path(&self) -> PathBuf {
        expand_home(&self.calendar_dir)
    }

    /// Where the identifier map and change snapshots live.
    pub fn state_path(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => expand_home(dir),
            None => self.calendar_path().join(".caldock").join("state"),
        }
    }

    pub fn conduit_timezone(&self) -> ConduitResult<Tz> {
        self.timezone
            .parse()
            .map_err(|_| ConduitError::Config(format!("Unknown timezone '{}'", self.timezone)))
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(stripped) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(stripped),
        None => path.to_path_buf(),
    }
}
