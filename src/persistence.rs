//! Saved window state.
//!
//! The shell persists window layouts so "reopen previous windows" works
//! across restarts. Each saved tab also owns a scratch buffer file named
//! `buffer_{guid}.txt` in the data directory; buffers whose session id no
//! longer appears in any saved layout are garbage and get swept at exit.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::config::get_data_directory;

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct PersistedState {
    pub window_layouts: Vec<PersistedWindowLayout>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct PersistedWindowLayout {
    /// GUIDs of the sessions this layout restores.
    pub session_ids: Vec<String>,
}

impl PersistedState {
    pub fn has_layouts(&self) -> bool {
        !self.window_layouts.is_empty()
    }

    /// Session ids referenced by any layout, lowercased for comparison.
    pub fn live_session_ids(&self) -> HashSet<String> {
        self.window_layouts
            .iter()
            .flat_map(|layout| &layout.session_ids)
            .map(|id| id.to_ascii_lowercase())
            .collect()
    }
}

/// Loads state.json, falling back to an empty state like the config loader.
pub fn load_state() -> PersistedState {
    let Ok(data_dir) = get_data_directory() else {
        return PersistedState::default();
    };
    let path = data_dir.join("state.json");
    let Ok(contents) = fs::read_to_string(&path) else {
        return PersistedState::default();
    };
    serde_json::from_str(&contents).unwrap_or_default()
}

pub fn save_state(state: &PersistedState) -> Result<()> {
    let data_dir = get_data_directory()?;
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| anyhow!("Failed to serialize state: {}", e))?;
    fs::write(data_dir.join("state.json"), json)
        .map_err(|e| anyhow!("Failed to write state.json: {}", e))?;
    Ok(())
}

/// Buffer file names are exactly `buffer_` + 36-char GUID + `.txt`.
const BUFFER_NAME_LEN: usize = 47;

/// Deletes `buffer_{guid}.txt` files in `dir` whose guid is not in `live`.
/// Returns how many were removed. `live` must hold lowercased ids.
pub fn sweep_session_buffers(dir: &Path, live: &HashSet<String>) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name.len() != BUFFER_NAME_LEN
            || !name.is_ascii()
            || !name.starts_with("buffer_")
            || !name.ends_with(".txt")
        {
            continue;
        }
        let session_id = name["buffer_".len()..BUFFER_NAME_LEN - ".txt".len()].to_ascii_lowercase();
        if live.contains(&session_id) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                tracing::debug!(%session_id, "swept orphaned session buffer");
                removed += 1;
            }
            Err(err) => {
                tracing::warn!(%session_id, %err, "failed to remove orphaned session buffer");
            }
        }
    }
    Ok(removed)
}

/// Terminates the process without unwinding. Called only after state has
/// been flushed; background threads may be parked in blocking calls that
/// would otherwise stall a normal exit.
pub fn hard_exit(code: i32) -> ! {
    std::process::exit(code)
}
