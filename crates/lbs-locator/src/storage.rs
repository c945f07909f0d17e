//! Persistent settings and lookup-key sources.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::types::{LocatorError, LocatorResult};

/// Named string values that survive process restarts.
pub trait SettingsStore: Send + Sync {
    fn get(&self, name: &str) -> LocatorResult<Option<String>>;
    fn set(&self, name: &str, value: &str) -> LocatorResult<()>;
    fn clear(&self, name: &str) -> LocatorResult<()>;
}

/// Settings kept as a flat JSON object in a single file.
///
/// Every call does blocking `std::fs` I/O on the caller's thread. The locator
/// touches the store at most once per lookup, so it calls it inline; heavier
/// callers should go through `tokio::task::spawn_blocking`.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> LocatorResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = std::fs::read(&self.path)?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&data).map_err(|e| {
            LocatorError::Storage(format!(
                "Failed to parse settings file {}: {e}",
                self.path.display()
            ))
        })
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> LocatorResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Write to a sibling temp file and rename so a crash never leaves
        // a truncated settings file behind.
        let tmp = self.path.with_extension("tmp");
        let payload = serde_json::to_vec_pretty(values)?;
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn guard(&self) -> LocatorResult<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| LocatorError::Storage("settings lock poisoned".to_string()))
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, name: &str) -> LocatorResult<Option<String>> {
        let _guard = self.guard()?;
        Ok(self.read_all()?.remove(name))
    }

    fn set(&self, name: &str, value: &str) -> LocatorResult<()> {
        let _guard = self.guard()?;
        let mut values = self.read_all()?;
        values.insert(name.to_string(), value.to_string());
        self.write_all(&values)?;
        tracing::debug!("Saved setting {name} to {}", self.path.display());
        Ok(())
    }

    fn clear(&self, name: &str) -> LocatorResult<()> {
        let _guard = self.guard()?;
        let mut values = self.read_all()?;
        if values.remove(name).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

/// In-process settings, lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> LocatorResult<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| LocatorError::Storage("settings lock poisoned".to_string()))
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, name: &str) -> LocatorResult<Option<String>> {
        Ok(self.values()?.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> LocatorResult<()> {
        self.values()?.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, name: &str) -> LocatorResult<()> {
        self.values()?.remove(name);
        Ok(())
    }
}

/// Where the lookup key comes from. Loaded again on every attempt.
pub trait KeySource: Send + Sync {
    fn load(&self) -> LocatorResult<String>;
}

/// Key stored in a plain-text file.
pub struct KeyFile {
    path: PathBuf,
}

impl KeyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeySource for KeyFile {
    fn load(&self) -> LocatorResult<String> {
        if !self.path.exists() {
            return Err(LocatorError::Configuration(format!(
                "Key file {} does not exist",
                self.path.display()
            )));
        }
        let key = std::fs::read_to_string(&self.path).map_err(|e| {
            LocatorError::Configuration(format!(
                "Can't read key file {}: {e}",
                self.path.display()
            ))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(LocatorError::Configuration(format!(
                "Key file {} is empty",
                self.path.display()
            )));
        }
        Ok(key.to_string())
    }
}

/// A key fixed at construction.
pub struct StaticKey(String);

impl StaticKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl KeySource for StaticKey {
    fn load(&self) -> LocatorResult<String> {
        if self.0.trim().is_empty() {
            return Err(LocatorError::Configuration("Lookup key is empty".to_string()));
        }
        Ok(self.0.clone())
    }
}
