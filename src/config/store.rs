//! Persisted user preferences.

use crate::{Error, ErrorContext, Result};
use base64::Engine as _;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Keys recognized by the config store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKey {
    Engine,
    Voice,
    Credential,
    Volume,
    Speed,
    StreamingEnabled,
    FallbackEnabled,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::Engine,
        ConfigKey::Voice,
        ConfigKey::Credential,
        ConfigKey::Volume,
        ConfigKey::Speed,
        ConfigKey::StreamingEnabled,
        ConfigKey::FallbackEnabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Engine => "engine",
            Self::Voice => "voice",
            Self::Credential => "credential",
            Self::Volume => "volume",
            Self::Speed => "speed",
            Self::StreamingEnabled => "streamingEnabled",
            Self::FallbackEnabled => "fallbackEnabled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == raw)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Key-value store owned by the embedding application.
///
/// Values are strings; the typed getters return `None` for missing or unparsable values
/// so callers fall back to their defaults.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: ConfigKey) -> Option<String>;
    fn save(&self, key: ConfigKey, value: &str) -> Result<()>;
    fn remove(&self, key: ConfigKey) -> Result<()>;

    fn get_f32(&self, key: ConfigKey) -> Option<f32> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    fn get_u8(&self, key: ConfigKey) -> Option<u8> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    fn get_bool(&self, key: ConfigKey) -> Option<bool> {
        self.get(key).and_then(|v| match v.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        })
    }
}

fn poisoned() -> Error {
    Error::runtime_with_context(
        "config store lock poisoned",
        ErrorContext::new().with_source("config_store"),
    )
}

/// Process-local store, mostly for tests and embedding without persistence.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: RwLock<BTreeMap<ConfigKey, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: ConfigKey, value: impl Into<String>) -> Self {
        if let Ok(mut values) = self.values.write() {
            values.insert(key, value.into());
        }
        self
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: ConfigKey) -> Option<String> {
        self.values.read().ok()?.get(&key).cloned()
    }

    fn save(&self, key: ConfigKey, value: &str) -> Result<()> {
        self.values
            .write()
            .map_err(|_| poisoned())?
            .insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: ConfigKey) -> Result<()> {
        self.values.write().map_err(|_| poisoned())?.remove(&key);
        Ok(())
    }
}

const OBFUSCATION_PREFIX: &str = "b64:";

/// JSON file store.
///
/// The credential is written base64-encoded so it is not plaintext on disk. This is
/// obfuscation only; anyone with read access to the file can recover it.
pub struct JsonFileConfigStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonFileConfigStore {
    /// Open (or lazily create) the store at `path`. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file in one rename so readers never see a partial write.
    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let raw = serde_json::to_string_pretty(values)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(raw.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn encode(key: ConfigKey, value: &str) -> String {
        match key {
            ConfigKey::Credential => format!(
                "{}{}",
                OBFUSCATION_PREFIX,
                base64::engine::general_purpose::STANDARD.encode(value)
            ),
            _ => value.to_string(),
        }
    }

    fn decode(key: ConfigKey, stored: &str) -> Option<String> {
        match (key, stored.strip_prefix(OBFUSCATION_PREFIX)) {
            (ConfigKey::Credential, Some(encoded)) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .ok()
                .and_then(|b| String::from_utf8(b).ok()),
            _ => Some(stored.to_string()),
        }
    }
}

impl ConfigStore for JsonFileConfigStore {
    fn get(&self, key: ConfigKey) -> Option<String> {
        let values = self.values.read().ok()?;
        values
            .get(key.as_str())
            .and_then(|stored| Self::decode(key, stored))
    }

    fn save(&self, key: ConfigKey, value: &str) -> Result<()> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        values.insert(key.as_str().to_string(), Self::encode(key, value));
        self.persist(&values)
    }

    fn remove(&self, key: ConfigKey) -> Result<()> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        if values.remove(key.as_str()).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_round_trip() {
        for key in ConfigKey::ALL {
            assert_eq!(ConfigKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(ConfigKey::StreamingEnabled.as_str(), "streamingEnabled");
        assert_eq!(ConfigKey::parse("apiKey"), None);
    }

    #[test]
    fn typed_getters_tolerate_garbage() {
        let store = MemoryConfigStore::new()
            .with(ConfigKey::Speed, "1.25")
            .with(ConfigKey::Volume, "loud")
            .with(ConfigKey::StreamingEnabled, "true");
        assert_eq!(store.get_f32(ConfigKey::Speed), Some(1.25));
        assert_eq!(store.get_u8(ConfigKey::Volume), None);
        assert_eq!(store.get_bool(ConfigKey::StreamingEnabled), Some(true));
        assert_eq!(store.get_bool(ConfigKey::FallbackEnabled), None);
    }

    #[test]
    fn file_store_persists_and_obfuscates_credential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs").join("relay.json");

        let store = JsonFileConfigStore::open(&path).unwrap();
        store.save(ConfigKey::Credential, "sk-secret").unwrap();
        store.save(ConfigKey::Engine, "local").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("sk-secret"));
        assert!(raw.contains("\"engine\": \"local\""));

        let reopened = JsonFileConfigStore::open(&path).unwrap();
        assert_eq!(reopened.get(ConfigKey::Credential).as_deref(), Some("sk-secret"));
        assert_eq!(reopened.get(ConfigKey::Engine).as_deref(), Some("local"));

        reopened.remove(ConfigKey::Credential).unwrap();
        let again = JsonFileConfigStore::open(&path).unwrap();
        assert_eq!(again.get(ConfigKey::Credential), None);
    }

    #[test]
    fn file_store_replaces_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"voice": "Cherry"}"#).unwrap();

        let store = JsonFileConfigStore::open(&path).unwrap();
        for voice in ["Serena", "Ethan", "Dylan"] {
            store.save(ConfigKey::Voice, voice).unwrap();
        }

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("relay.json")]);

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.get("voice").map(String::as_str), Some("Dylan"));
    }
}
