//! Store configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::schema::{database_count, CURRENT_SCHEMA_VERSION};

pub const ENV_DB_NAME: &str = "MINEGUARD_DB_NAME";
pub const ENV_DB_DIR: &str = "MINEGUARD_DB_DIR";
pub const ENV_DB_VERSION: &str = "MINEGUARD_DB_VERSION";

/// Where and how the store's LMDB environment is opened.
///
/// Every field has a default, so a partial JSON object such as
/// `{"name": "site_b"}` is a complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Environment name; files live in `<directory>/<name>.lmdb/`.
    pub name: String,
    pub directory: PathBuf,
    pub schema_version: u32,
    /// Maximum size of the memory map, in bytes.
    pub map_size: usize,
    /// Maximum number of named LMDB databases (collections, indexes, meta).
    pub max_collections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "mineguard".to_string(),
            directory: PathBuf::from("."),
            schema_version: CURRENT_SCHEMA_VERSION,
            map_size: 256 * 1024 * 1024,
            max_collections: 32,
        }
    }
}

impl StoreConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn in_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.directory.join(format!("{}.lmdb", self.name))
    }

    pub fn from_json_str(json: &str) -> Result<Self, StoreError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `MINEGUARD_DB_NAME`, `MINEGUARD_DB_DIR` and
    /// `MINEGUARD_DB_VERSION`.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let mut config = Self::default();
        if let Some(name) = lookup(ENV_DB_NAME) {
            config.name = name;
        }
        if let Some(dir) = lookup(ENV_DB_DIR) {
            config.directory = PathBuf::from(dir);
        }
        if let Some(version) = lookup(ENV_DB_VERSION) {
            config.schema_version = version.trim().parse().map_err(|e| {
                StoreError::InvalidConfig(format!("{ENV_DB_VERSION}='{version}': {e}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidConfig("name must not be empty".to_string()));
        }
        if self.schema_version == 0 || self.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::InvalidConfig(format!(
                "schema version must be between 1 and {CURRENT_SCHEMA_VERSION}, got {}",
                self.schema_version
            )));
        }
        let required = database_count(self.schema_version);
        if self.max_collections < required {
            return Err(StoreError::InvalidConfig(format!(
                "maxCollections must be at least {required} for schema version {}, got {}",
                self.schema_version, self.max_collections
            )));
        }
        Ok(())
    }
}
