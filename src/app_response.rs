use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

use crate::error::StoreError;

/// Envelope returned across the C ABI as JSON, e.g. `{"Ok": "..."}`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum AppResponse {
    DatabaseError(String),
    SerializationError(String),
    NotFound(String),
    ValidationError(String),
    BadRequest(String),
    Conflict(String),
    Ok(String),
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {msg}"),
            AppResponse::NotFound(msg) => write!(f, "Not found: {msg}"),
            AppResponse::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            AppResponse::Conflict(msg) => write!(f, "Conflict: {msg}"),
            AppResponse::Ok(msg) => write!(f, "Ok: {msg}"),
        }
    }
}

impl From<StoreError> for AppResponse {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { .. } => AppResponse::Conflict(err.to_string()),
            StoreError::UnknownCollection(_) => AppResponse::NotFound(err.to_string()),
            StoreError::InvalidDocument(_) | StoreError::InvalidQuery(_) | StoreError::InvalidConfig(_) => {
                AppResponse::ValidationError(err.to_string())
            }
            StoreError::Serialization(e) => AppResponse::from(e),
            StoreError::Engine(lmdb::Error::MapFull) => {
                AppResponse::DatabaseError("Database map is full; raise mapSize".to_string())
            }
            StoreError::Engine(_)
            | StoreError::Io { .. }
            | StoreError::VersionMismatch { .. }
            | StoreError::LockPoisoned => AppResponse::DatabaseError(err.to_string()),
        }
    }
}

impl From<SerdeError> for AppResponse {
    fn from(err: SerdeError) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {err}"))
    }
}

impl AppResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        AppResponse::Ok(msg.into())
    }

    /// Serializes `value` into an `Ok` envelope.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(json) => AppResponse::Ok(json),
            Err(e) => AppResponse::from(e),
        }
    }
}
