use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use parking_lot::Mutex;
use thiserror::Error;
use twitchchat_proto::Config;

const CONFIG_KEY: &str = "config";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("format: {0}")]
    Format(#[from] serde_json::Error),
}

/// Where the service persists its configuration.
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Config>, StoreError>;
    fn save(&self, config: &Config) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    config: Mutex<Option<Config>>,
}

impl MemoryStore {
    pub fn with_config(config: Config) -> Self {
        Self {
            config: Mutex::new(Some(config)),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Option<Config>, StoreError> {
        Ok(self.config.lock().clone())
    }

    fn save(&self, config: &Config) -> Result<(), StoreError> {
        *self.config.lock() = Some(config.clone());
        Ok(())
    }
}

/// JSON key/value file; the config lives under the `"config"` key.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<BTreeMap<String, serde_json::Value>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

impl ConfigStore for FileStore {
    fn load(&self) -> Result<Option<Config>, StoreError> {
        let _guard = self.lock.lock();
        let mut all = self.read_all()?;
        match all.remove(CONFIG_KEY) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn save(&self, config: &Config) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut all = self.read_all()?;
        all.insert(CONFIG_KEY.to_string(), serde_json::to_value(config)?);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&all)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "twitchchat-store-{}-{name}.json",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn file_store_round_trips_and_keeps_other_keys() {
        let path = scratch("roundtrip");
        fs::write(&path, r#"{"other": 1}"#).unwrap();
        let store = FileStore::new(&path);
        assert_eq!(store.load().unwrap(), None);

        let cfg = Config {
            announce: true,
            template: "{{ .track_update.track.title }}".into(),
            send_as: "dj".into(),
            send_to: "dj".into(),
        };
        store.save(&cfg).unwrap();
        assert_eq!(FileStore::new(&path).load().unwrap(), Some(cfg));

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["other"], 1);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let store = FileStore::new(scratch("missing"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_a_format_error() {
        let path = scratch("corrupt");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(FileStore::new(&path).load(), Err(StoreError::Format(_))));
        let _ = fs::remove_file(&path);
    }
}
