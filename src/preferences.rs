use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::PreferenceError;

pub const SAVE_FOLDER_KEY: &str = "save_folder";

/// Process-wide string key/value settings.
pub trait PreferenceStore {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), PreferenceError>;

    fn remove(&mut self, key: &str) -> Result<(), PreferenceError>;
}

/// Preferences kept as a flat JSON object on disk.
pub struct JsonFilePreferences {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonFilePreferences {
    /// `<config dir>/convert-mp4/preferences.json`
    pub fn default_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(std::env::temp_dir);
        base.join(env!("CARGO_PKG_NAME")).join("preferences.json")
    }

    /// Loads `path`; a missing or unreadable file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str(&s) {
                Ok(values) => values,
                Err(err) => {
                    warn!("ignoring unreadable preferences {:?}: {}", path, err);
                    BTreeMap::new()
                },
            },
            Err(_) => BTreeMap::new(),
        };
        JsonFilePreferences { path, values }
    }

    fn save(&self) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| PreferenceError::Write { path: self.path.clone(), source })?;
        }
        let json = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, json)
            .map_err(|source| PreferenceError::Write { path: self.path.clone(), source })?;
        debug!("saved preferences to {:?}", self.path);
        Ok(())
    }
}

impl PreferenceStore for JsonFilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.values.insert(String::from(key), String::from(value));
        self.save()
    }

    fn remove(&mut self, key: &str) -> Result<(), PreferenceError> {
        if self.values.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: BTreeMap<String, String>,
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.values.insert(String::from(key), String::from(value));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PreferenceError> {
        self.values.remove(key);
        Ok(())
    }
}

/// The remembered output folder, if it is still a directory.
pub fn save_folder(store: &dyn PreferenceStore) -> Option<PathBuf> {
    let folder = PathBuf::from(store.get(SAVE_FOLDER_KEY)?);
    if folder.is_dir() {
        Some(folder)
    } else {
        debug!("saved folder {:?} no longer exists", folder);
        None
    }
}

pub fn set_save_folder(store: &mut dyn PreferenceStore, folder: &Path) -> Result<PathBuf, PreferenceError> {
    if !folder.is_dir() {
        return Err(PreferenceError::NotADirectory(folder.to_path_buf()));
    }
    let folder = std::path::absolute(folder).unwrap_or_else(|_| folder.to_path_buf());
    store.set(SAVE_FOLDER_KEY, &folder.to_string_lossy())?;
    Ok(folder)
}

pub fn clear_save_folder(store: &mut dyn PreferenceStore) -> Result<(), PreferenceError> {
    store.remove(SAVE_FOLDER_KEY)
}
