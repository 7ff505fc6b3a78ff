use std::path::{Path, PathBuf};

use async_trait::async_trait;
use models::Registration;
use tokio::fs;
use tracing::debug;

use super::{RegistrationBackend, StorageError, Tier};

/// JSON file holding the registration array.
///
/// Last-resort tier: always written first on save, so it is the freshest copy
/// the process has produced. Writes go to a sibling temp file and are renamed
/// into place.
#[derive(Clone, Debug)]
pub struct LocalFileStore {
    file_path: PathBuf,
}

impl LocalFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { file_path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Read the collection; `Ok(None)` when the file does not exist.
    pub async fn read(&self) -> Result<Option<Vec<Registration>>, StorageError> {
        let bytes = match fs::read(&self.file_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Local(e.to_string())),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some(Vec::new()));
        }
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Decode(e.to_string()))?;
        super::decode_collection(value).map(Some)
    }

    /// Replace the file content with `registrations`.
    pub async fn write(&self, registrations: &[Registration]) -> Result<(), StorageError> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| StorageError::Local(e.to_string()))?;
            }
        }
        let data = serde_json::to_vec_pretty(registrations).map_err(|e| StorageError::Decode(e.to_string()))?;
        let tmp = self.file_path.with_extension("json.tmp");
        fs::write(&tmp, data).await.map_err(|e| StorageError::Local(e.to_string()))?;
        fs::rename(&tmp, &self.file_path).await.map_err(|e| StorageError::Local(e.to_string()))?;
        debug!(path = %self.file_path.display(), count = registrations.len(), "local registrations written");
        Ok(())
    }
}

#[async_trait]
impl RegistrationBackend for LocalFileStore {
    fn tier(&self) -> Tier { Tier::Local }
    async fn load(&self) -> Result<Option<Vec<Registration>>, StorageError> { self.read().await }
    async fn store(&self, registrations: &[Registration]) -> Result<(), StorageError> { self.write(registrations).await }
}
