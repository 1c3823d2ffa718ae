//! Seams to the embedding application: playback and persisted settings.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClientError, Result};

/// Suffix appended to generated device ids; the STB expects a MAC-like tail.
const DEVICE_ID_SUFFIX: &str = "-02:00:00:00:00:00";

/// Hands a resolved stream URL to whatever plays it.
pub trait PlaybackLauncher: Send + Sync {
    fn launch(&self, url: &str) -> Result<()>;
}

/// Prints the URL on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutLauncher;

impl PlaybackLauncher for StdoutLauncher {
    fn launch(&self, url: &str) -> Result<()> {
        println!("{}", url);
        Ok(())
    }
}

/// Persistent key/value settings used by the client.
pub trait SettingsStore: Send + Sync {
    fn stb_address(&self) -> Option<String>;
    fn set_stb_address(&self, address: &str);
    fn last_trace(&self) -> Option<String>;
    fn set_last_trace(&self, trace: &str);
    fn cached_channels(&self) -> Option<String>;
    fn set_cached_channels(&self, json: &str);
    fn device_id(&self) -> Option<String>;
    fn set_device_id(&self, id: &str);
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoredSettings {
    #[serde(default)]
    pub stb_address: Option<String>,
    #[serde(default)]
    pub last_trace: Option<String>,
    #[serde(default)]
    pub cached_channels: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoredSettings>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StoredSettings {
        self.state.lock().clone()
    }
}

impl SettingsStore for MemoryStore {
    fn stb_address(&self) -> Option<String> {
        self.state.lock().stb_address.clone()
    }

    fn set_stb_address(&self, address: &str) {
        self.state.lock().stb_address = Some(address.to_string());
    }

    fn last_trace(&self) -> Option<String> {
        self.state.lock().last_trace.clone()
    }

    fn set_last_trace(&self, trace: &str) {
        self.state.lock().last_trace = Some(trace.to_string());
    }

    fn cached_channels(&self) -> Option<String> {
        self.state.lock().cached_channels.clone()
    }

    fn set_cached_channels(&self, json: &str) {
        self.state.lock().cached_channels = Some(json.to_string());
    }

    fn device_id(&self) -> Option<String> {
        self.state.lock().device_id.clone()
    }

    fn set_device_id(&self, id: &str) {
        self.state.lock().device_id = Some(id.to_string());
    }
}

/// JSON file backed store used by the CLI. Every write rewrites the file.
///
/// Reads never wait on file I/O. Writes are serialized so the file always
/// holds the latest state.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoredSettings>,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredSettings::default(),
            Err(e) => return Err(e.into()),
        };
        debug!("Settings store opened at {:?}", path);
        Ok(Self {
            path,
            state: Mutex::new(state),
            write_lock: Mutex::new(()),
        })
    }

    fn update<F: FnOnce(&mut StoredSettings)>(&self, f: F) {
        let _writing = self.write_lock.lock();
        let text = {
            let mut state = self.state.lock();
            f(&mut state);
            serde_json::to_string_pretty(&*state)
        };
        let result = text
            .map_err(|e| e.to_string())
            .and_then(|text| self.write_file(&text).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!("Failed to write settings to {:?}: {}", self.path, e);
        }
    }

    /// Write through a sibling temp file so readers never see a partial file.
    fn write_file(&self, text: &str) -> std::io::Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl SettingsStore for JsonFileStore {
    fn stb_address(&self) -> Option<String> {
        self.state.lock().stb_address.clone()
    }

    fn set_stb_address(&self, address: &str) {
        self.update(|s| s.stb_address = Some(address.to_string()));
    }

    fn last_trace(&self) -> Option<String> {
        self.state.lock().last_trace.clone()
    }

    fn set_last_trace(&self, trace: &str) {
        self.update(|s| s.last_trace = Some(trace.to_string()));
    }

    fn cached_channels(&self) -> Option<String> {
        self.state.lock().cached_channels.clone()
    }

    fn set_cached_channels(&self, json: &str) {
        self.update(|s| s.cached_channels = Some(json.to_string()));
    }

    fn device_id(&self) -> Option<String> {
        self.state.lock().device_id.clone()
    }

    fn set_device_id(&self, id: &str) {
        self.update(|s| s.device_id = Some(id.to_string()));
    }
}

/// Fresh login identifier.
pub fn generate_device_id() -> String {
    format!("{}{}", Uuid::new_v4(), DEVICE_ID_SUFFIX)
}

/// Resolve the login identifier: configured, stored, or generated and stored.
pub fn resolve_device_id(configured: Option<&str>, store: &dyn SettingsStore) -> String {
    if let Some(id) = configured.filter(|id| !id.trim().is_empty()) {
        return id.to_string();
    }
    if let Some(id) = store.device_id() {
        return id;
    }
    let id = generate_device_id();
    debug!("Generated device id {}", id);
    store.set_device_id(&id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_shape() {
        let id = generate_device_id();
        assert!(id.ends_with("-02:00:00:00:00:00"));
        let uuid = id.trim_end_matches(DEVICE_ID_SUFFIX);
        assert_eq!(Uuid::parse_str(uuid).unwrap().get_version_num(), 4);
    }

    #[test]
    fn test_device_id_is_stable_per_store() {
        let store = MemoryStore::new();
        let first = resolve_device_id(None, &store);
        let second = resolve_device_id(None, &store);
        assert_eq!(first, second);
        assert_eq!(resolve_device_id(Some("fixed"), &store), "fixed");
        assert_eq!(resolve_device_id(Some("  "), &store), first);
    }

    #[test]
    fn test_json_file_store_persists() {
        let path = std::env::temp_dir().join(format!("stb-client-store-{}.json", Uuid::new_v4()));
        {
            let store = JsonFileStore::open(&path).unwrap();
            assert!(store.stb_address().is_none());
            store.set_stb_address("192.168.1.20");
            store.set_last_trace("hello");
        }
        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.stb_address().as_deref(), Some("192.168.1.20"));
        assert_eq!(store.last_trace().as_deref(), Some("hello"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_json_file_store_concurrent_writes() {
        let path = std::env::temp_dir().join(format!("stb-client-store-{}.json", Uuid::new_v4()));
        let store = std::sync::Arc::new(JsonFileStore::open(&path).unwrap());

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..20 {
                        store.set_last_trace(&format!("writer {} line {}", i, j));
                        assert!(store.last_trace().is_some());
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        store.set_stb_address("10.0.0.5");

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.stb_address().as_deref(), Some("10.0.0.5"));
        assert_eq!(reopened.last_trace(), store.last_trace());
        let _ = std::fs::remove_file(&path);
    }
}
