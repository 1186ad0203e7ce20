//! Persisted settings.
//!
//! The core reads these at startup and writes them after every confirmed
//! score change; the store itself is a collaborator injected by the host
//! application. [`FileStore`] is the JSON-file implementation used by the
//! CLI, [`MemoryStore`] backs tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sync::Score;

/// Accessors for the small set of values the core persists.
pub trait SettingsStore: Send + Sync {
    fn save_device_address(&self, address: &str);
    fn device_address(&self) -> Option<String>;

    fn save_score(&self, score: Score);
    fn score(&self) -> Score;

    fn save_timestamp(&self, timestamp_seconds: u64);
    fn timestamp(&self) -> u64;

    /// True if the stored display orientation was: facing the referee.
    fn save_orientation(&self, facing_referee: bool);
    fn orientation(&self) -> bool;

    fn save_auto_connect_on_startup(&self, auto_connect: bool);
    fn auto_connect_on_startup(&self) -> bool;

    fn save_ask_to_bond(&self, ask_to_bond: bool);
    fn ask_to_bond(&self) -> bool;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSettings {
    last_device_address: Option<String>,
    score1: u16,
    score2: u16,
    timestamp: u64,
    sc_faces_to_referee: bool,
    auto_connect_on_startup: bool,
    ask_to_bond: bool,
}

/// JSON file store. Every write persists the whole settings blob; load
/// failures fall back to defaults.
pub struct FileStore {
    path: PathBuf,
    settings: Mutex<StoredSettings>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let settings = Self::load(&path);
        Ok(Self {
            path,
            settings: Mutex::new(settings),
        })
    }

    fn load(path: &Path) -> StoredSettings {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Could not decode settings file: {e}");
                StoredSettings::default()
            }),
            Err(_) => StoredSettings::default(),
        }
    }

    fn update(&self, mutate: impl FnOnce(&mut StoredSettings)) {
        let mut settings = self.settings.lock().unwrap();
        mutate(&mut settings);
        match serde_json::to_string_pretty(&*settings) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    warn!("Could not write settings file: {e}");
                }
            }
            Err(e) => warn!("Could not encode settings: {e}"),
        }
    }
}

impl SettingsStore for FileStore {
    fn save_device_address(&self, address: &str) {
        self.update(|s| s.last_device_address = Some(address.to_string()));
    }

    fn device_address(&self) -> Option<String> {
        self.settings.lock().unwrap().last_device_address.clone()
    }

    fn save_score(&self, score: Score) {
        self.update(|s| {
            s.score1 = score.left;
            s.score2 = score.right;
        });
    }

    fn score(&self) -> Score {
        let settings = self.settings.lock().unwrap();
        Score::new(settings.score1, settings.score2)
    }

    fn save_timestamp(&self, timestamp_seconds: u64) {
        self.update(|s| s.timestamp = timestamp_seconds);
    }

    fn timestamp(&self) -> u64 {
        self.settings.lock().unwrap().timestamp
    }

    fn save_orientation(&self, facing_referee: bool) {
        self.update(|s| s.sc_faces_to_referee = facing_referee);
    }

    fn orientation(&self) -> bool {
        self.settings.lock().unwrap().sc_faces_to_referee
    }

    fn save_auto_connect_on_startup(&self, auto_connect: bool) {
        self.update(|s| s.auto_connect_on_startup = auto_connect);
    }

    fn auto_connect_on_startup(&self) -> bool {
        self.settings.lock().unwrap().auto_connect_on_startup
    }

    fn save_ask_to_bond(&self, ask_to_bond: bool) {
        self.update(|s| s.ask_to_bond = ask_to_bond);
    }

    fn ask_to_bond(&self) -> bool {
        self.settings.lock().unwrap().ask_to_bond
    }
}

/// In-memory store; nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    settings: Mutex<StoredSettings>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn save_device_address(&self, address: &str) {
        self.settings.lock().unwrap().last_device_address = Some(address.to_string());
    }

    fn device_address(&self) -> Option<String> {
        self.settings.lock().unwrap().last_device_address.clone()
    }

    fn save_score(&self, score: Score) {
        let mut settings = self.settings.lock().unwrap();
        settings.score1 = score.left;
        settings.score2 = score.right;
    }

    fn score(&self) -> Score {
        let settings = self.settings.lock().unwrap();
        Score::new(settings.score1, settings.score2)
    }

    fn save_timestamp(&self, timestamp_seconds: u64) {
        self.settings.lock().unwrap().timestamp = timestamp_seconds;
    }

    fn timestamp(&self) -> u64 {
        self.settings.lock().unwrap().timestamp
    }

    fn save_orientation(&self, facing_referee: bool) {
        self.settings.lock().unwrap().sc_faces_to_referee = facing_referee;
    }

    fn orientation(&self) -> bool {
        self.settings.lock().unwrap().sc_faces_to_referee
    }

    fn save_auto_connect_on_startup(&self, auto_connect: bool) {
        self.settings.lock().unwrap().auto_connect_on_startup = auto_connect;
    }

    fn auto_connect_on_startup(&self) -> bool {
        self.settings.lock().unwrap().auto_connect_on_startup
    }

    fn save_ask_to_bond(&self, ask_to_bond: bool) {
        self.settings.lock().unwrap().ask_to_bond = ask_to_bond;
    }

    fn ask_to_bond(&self) -> bool {
        self.settings.lock().unwrap().ask_to_bond
    }
}
