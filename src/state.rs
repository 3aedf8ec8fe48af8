//! Persisted last-known-address state
//!
//! A single small JSON document (`{"ip": "<address>"}`) written only after a
//! confirmed successful update. A missing or corrupt file is treated as "no
//! prior state"; the next run then performs a fresh update.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

//==============================================================================
// Types
//==============================================================================

/// The last address confirmed to be in the zone record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Address string, IPv4 or IPv6 literal
    pub ip: String,
}

/// File-backed store for [`PersistedState`]
pub struct StateStore {
    path: PathBuf,
}

//==============================================================================
// Implementation
//==============================================================================

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the persisted state, or `None` if absent or unreadable.
    ///
    /// Never errors: any read or parse failure is logged and recovered as
    /// "no prior state".
    pub fn load(&self) -> Option<PersistedState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No state at {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(
                    "State file {} is corrupt, treating as absent: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Persists the state, replacing any previous document.
    ///
    /// Writes to a sibling temporary file and renames it over the target so
    /// a crash mid-write cannot leave a truncated document behind.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let json = serde_json::to_string(state).context("serialize state")?;
        let tmp = temp_path(&self.path);
        fs::write(&tmp, json)
            .with_context(|| format!("write temp state file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!("rename {} to {}", tmp.display(), self.path.display())
        })?;
        debug!("State written to {}", self.path.display());
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path().join("state.json"))
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_in(&dir);

        for addr in ["203.0.113.5", "2001:db8::1", ""] {
            let state = PersistedState {
                ip: addr.to_string(),
            };
            store.save(&state).expect("save");
            assert_eq!(store.load(), Some(state));
        }
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = TempDir::new().expect("temp dir");
        assert_eq!(store_in(&dir).load(), None);
    }

    #[test]
    fn load_corrupt_file_is_none() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").expect("write");
        assert_eq!(StateStore::new(path).load(), None);
    }

    #[test]
    fn save_overwrites_previous_state() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_in(&dir);

        store
            .save(&PersistedState {
                ip: "203.0.113.5".to_string(),
            })
            .expect("save");
        store
            .save(&PersistedState {
                ip: "203.0.113.6".to_string(),
            })
            .expect("save");

        assert_eq!(store.load().expect("state").ip, "203.0.113.6");
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_in(&dir);
        store
            .save(&PersistedState {
                ip: "203.0.113.5".to_string(),
            })
            .expect("save");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn state_file_uses_ip_key() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("state.json");
        StateStore::new(&path)
            .save(&PersistedState {
                ip: "203.0.113.5".to_string(),
            })
            .expect("save");

        let raw = std::fs::read_to_string(&path).expect("read");
        assert_eq!(raw, r#"{"ip":"203.0.113.5"}"#);
    }
}
