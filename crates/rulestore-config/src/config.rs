// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config storage port and the JSON service layered on top of it.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Storage port for raw config blobs, keyed by logical name.
///
/// Implementations decide where a key lives (a file, a map, a secret store);
/// they never interpret the bytes.
pub trait ConfigStore {
    /// Load the blob stored under `key`. Returns [`ConfigError::NotFound`]
    /// when nothing is stored there.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replace the blob stored under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in the store.
    #[error("[CONFIG_NOT_FOUND] config key not found")]
    NotFound,
    /// I/O failure while reading or writing a blob.
    #[error("[CONFIG_IO] io error: {0}")]
    Io(#[from] std::io::Error),
    /// The blob is not valid JSON for the requested type.
    #[error("[CONFIG_SERDE] serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything the store cannot express otherwise.
    #[error("[CONFIG_OTHER] {0}")]
    Other(String),
}

/// Serializes config values as JSON and hands the bytes to a [`ConfigStore`].
#[derive(Debug)]
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Wrap `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Borrow the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize the value under `key`. Missing keys and empty blobs
    /// yield `Ok(None)`.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Like [`load`](Self::load), falling back to `T::default()` when nothing
    /// is stored.
    pub fn load_or_default<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        Ok(self.load(key)?.unwrap_or_default())
    }

    /// Serialize `value` as pretty JSON and store it under `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapStore(RefCell<HashMap<String, Vec<u8>>>);

    impl ConfigStore for MapStore {
        fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
            self.0.borrow().get(key).cloned().ok_or(ConfigError::NotFound)
        }

        fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
            self.0.borrow_mut().insert(key.to_owned(), data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn missing_key_is_none() {
        let service = ConfigService::new(MapStore::default());
        assert_eq!(service.load::<Vec<String>>("absent").unwrap(), None);
        assert_eq!(service.load_or_default::<Vec<String>>("absent").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn blank_blob_is_none() {
        let service = ConfigService::new(MapStore::default());
        service.store().save_raw("blank", b" \n").unwrap();
        assert_eq!(service.load::<u32>("blank").unwrap(), None);
    }

    #[test]
    fn save_then_load() {
        let service = ConfigService::new(MapStore::default());
        service.save("tables", &vec!["casbin_rule", "audit_rule"]).unwrap();
        let tables: Vec<String> = service.load("tables").unwrap().unwrap();
        assert_eq!(tables, ["casbin_rule", "audit_rule"]);
    }

    #[test]
    fn invalid_json_is_serde_error() {
        let service = ConfigService::new(MapStore::default());
        service.store().save_raw("bad", b"{not json").unwrap();
        assert!(matches!(
            service.load::<u32>("bad"),
            Err(ConfigError::Serde(_))
        ));
    }
}
