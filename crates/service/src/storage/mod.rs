//! Storage tiers for the registration collection.
//!
//! The whole `Vec<Registration>` is the unit of storage. Three tiers hold it:
//! Edge Config (primary), Blob (mirror) and a local JSON file (last resort).
//! Each tier implements [`RegistrationBackend`]; [`facade::StorageFacade`]
//! polls them in priority order and keeps per-tier health in
//! [`health::TierHealth`].

use std::fmt;

use async_trait::async_trait;
use models::Registration;
use serde::Serialize;
use thiserror::Error;

pub mod blob;
pub mod edge_config;
pub mod facade;
pub mod health;
pub mod local_file;
pub mod stack;

use blob::BlobError;
use edge_config::EdgeConfigError;

/// A storage tier, in read-priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    EdgeConfig,
    Blob,
    Local,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::EdgeConfig => "edge_config",
            Tier::Blob => "blob",
            Tier::Local => "local",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    EdgeConfig(#[from] EdgeConfigError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("local file error: {0}")]
    Local(String),
    #[error("stored data could not be decoded: {0}")]
    Decode(String),
}

impl StorageError {
    /// The tier refused the write because the collection is too large for it.
    pub fn is_size_limit(&self) -> bool {
        matches!(self, StorageError::EdgeConfig(EdgeConfigError::SizeLimit(_)))
    }
}

/// One storage tier holding the full registration collection.
#[async_trait]
pub trait RegistrationBackend: Send + Sync {
    fn tier(&self) -> Tier;

    /// `Ok(None)` when the tier has no collection yet.
    async fn load(&self) -> Result<Option<Vec<Registration>>, StorageError>;

    async fn store(&self, registrations: &[Registration]) -> Result<(), StorageError>;
}

/// Decode a stored collection; older writers stored the array as a JSON string.
pub(crate) fn decode_collection(value: serde_json::Value) -> Result<Vec<Registration>, StorageError> {
    match value {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::String(s) => {
            serde_json::from_str(&s).map_err(|e| StorageError::Decode(e.to_string()))
        }
        other => serde_json::from_value(other).map_err(|e| StorageError::Decode(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_accepts_array_string_and_null() {
        let arr = json!([{"registrationId": "a"}]);
        assert_eq!(decode_collection(arr.clone()).unwrap().len(), 1);
        let s = serde_json::Value::String(arr.to_string());
        assert_eq!(decode_collection(s).unwrap()[0].registration_id, "a");
        assert!(decode_collection(serde_json::Value::Null).unwrap().is_empty());
        assert!(decode_collection(json!({"not": "an array"})).is_err());
    }

    #[test]
    fn tier_labels() {
        assert_eq!(Tier::EdgeConfig.to_string(), "edge_config");
        assert!(Tier::EdgeConfig < Tier::Blob && Tier::Blob < Tier::Local);
    }
}
