//! Store error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::schema::Collection;

/// Errors from store operations.
///
/// A lookup that matches nothing is an empty result, never an error.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failure reported by LMDB while opening, reading or committing.
    #[error("storage engine error: {0}")]
    Engine(#[from] lmdb::Error),

    /// Insert of an `id` that already exists in the collection.
    #[error("document '{id}' already exists in collection '{collection}'")]
    DuplicateKey { collection: Collection, id: String },

    /// Collection name outside the schema, or not available at the opened
    /// schema version.
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    /// Document is not an object, lacks a usable `id`, or tries to change it.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Filter, sort or pipeline outside the supported vocabulary.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error when creating the environment directory.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The database on disk was written by a newer schema.
    #[error("schema version {stored} on disk is newer than requested version {requested}")]
    VersionMismatch { stored: u32, requested: u32 },

    /// The connection lock was poisoned.
    #[error("store lock poisoned")]
    LockPoisoned,
}
