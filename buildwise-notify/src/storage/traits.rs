//! Storage trait definitions.

use crate::error::Result;

/// Trait for string key/value storage backends.
///
/// Mirrors the semantics of browser `localStorage`: values are whole strings,
/// a missing key is not an error, and enumerating keys by prefix is cheap
/// enough to do on every sweep or poll.
pub trait KeyValueStorage: Send + Sync + std::fmt::Debug {
    /// Get a value by key.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value by key.
    fn remove(&self, key: &str) -> Result<()>;

    /// Remove every stored value.
    fn clear(&self) -> Result<()>;

    /// Keys starting with `prefix`, sorted.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Extension trait for storage with typed operations.
pub trait KeyValueStorageExt: KeyValueStorage {
    /// Get a JSON-deserialized value.
    ///
    /// Absent keys, failed reads and values that do not parse all come back
    /// as `None`; the latter two are logged.
    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                log::warn!("failed to read {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("ignoring unparsable value under {}: {}", key, e);
                None
            }
        }
    }

    /// Set a JSON-serialized value.
    fn set_json<T: serde::Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_string(value)?;
        self.set(key, &data)
    }
}

// Blanket implementation
impl<T: KeyValueStorage + ?Sized> KeyValueStorageExt for T {}
