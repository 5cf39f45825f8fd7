use std::{
    fs,
    io::ErrorKind,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use genchat_contracts::ClientSettings;
use serde_json::Value;
use tracing::warn;

use crate::CoreError;

/// Load/save collaborator for the persisted credential blob.
pub trait SettingsStore: Send + Sync {
    /// Never fails: anything unreadable yields structural defaults.
    fn load(&self) -> ClientSettings;

    fn save(&self, settings: &ClientSettings) -> Result<(), CoreError>;
}

/// Parses a persisted blob, defaulting every missing key. Only a JSON object
/// is accepted at the top level.
pub fn parse_client_settings(raw: &str) -> Result<ClientSettings, CoreError> {
    let value = serde_json::from_str::<Value>(raw)
        .map_err(|err| CoreError::Settings(format!("invalid settings document: {err}")))?;
    if !value.is_object() {
        return Err(CoreError::Settings(
            "invalid settings document: expected a JSON object".to_string(),
        ));
    }
    serde_json::from_value(value)
        .map_err(|err| CoreError::Settings(format!("invalid settings document: {err}")))
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    inner: Mutex<ClientSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: ClientSettings) -> Self {
        Self { inner: Mutex::new(settings) }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> ClientSettings {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn save(&self, settings: &ClientSettings) -> Result<(), CoreError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> ClientSettings {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return ClientSettings::default(),
            Err(err) => {
                warn!(event = "settings.load.failed", path = %self.path.display(), error = %err);
                return ClientSettings::default();
            }
        };
        parse_client_settings(&raw).unwrap_or_else(|err| {
            warn!(event = "settings.load.invalid", path = %self.path.display(), error = %err);
            ClientSettings::default()
        })
    }

    fn save(&self, settings: &ClientSettings) -> Result<(), CoreError> {
        let body = serde_json::to_string_pretty(settings)
            .map_err(|err| CoreError::Settings(format!("failed to encode settings: {err}")))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                CoreError::Settings(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        fs::write(&self.path, body).map_err(|err| {
            CoreError::Settings(format!("failed to write {}: {err}", self.path.display()))
        })
    }
}
