use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::{Result, VizError};

/// Durable home of the serialized preset catalog.
///
/// `save` overwrites the whole blob; `load` returns the whole blob or `None`
/// when nothing was ever stored.
pub trait PresetStorage: Send {
    fn load(&self) -> Result<Option<String>>;
    fn save(&mut self, blob: &str) -> Result<()>;
}

/// Process-local storage. Clones share the same blob.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    blob: Arc<Mutex<Option<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Arc::new(Mutex::new(Some(blob.into()))),
        }
    }

    pub fn snapshot(&self) -> Option<String> {
        self.blob.lock().ok().and_then(|blob| blob.clone())
    }
}

impl PresetStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>> {
        let blob = self
            .blob
            .lock()
            .map_err(|_| VizError::msg("preset storage has been poisoned"))?;
        Ok(blob.clone())
    }

    fn save(&mut self, contents: &str) -> Result<()> {
        let mut blob = self
            .blob
            .lock()
            .map_err(|_| VizError::msg("preset storage has been poisoned"))?;
        *blob = Some(contents.to_string());
        Ok(())
    }
}

/// JSON file on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/visualive/presets.json` for the current user, if known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("visualive").join("presets.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PresetStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&mut self, blob: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_clones_share_blob() {
        let storage = MemoryStorage::new();
        let mut writer = storage.clone();
        assert_eq!(storage.load().unwrap(), None);

        writer.save("{}").unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn file_storage_round_trips_and_treats_missing_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonFileStorage::new(dir.path().join("nested").join("presets.json"));
        assert_eq!(storage.load().unwrap(), None);

        storage.save(r#"{"a":1}"#).unwrap();
        storage.save(r#"{"b":2}"#).unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some(r#"{"b":2}"#));
    }
}
