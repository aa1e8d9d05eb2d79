//! Persisted client registration

use std::fs;
use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::ClientCredentials;
use crate::{Error, Result};

/// File name of the stored registration inside the data directory
const STORE_FILE: &str = "client.json";

/// Registration saved between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredClient {
    /// Client credentials (with UUID once authorized)
    pub client: ClientCredentials,
    /// Random per-installation user id sent with authorize
    pub user_id: String,
}

/// Random 8-byte hex user id
#[must_use]
pub fn generate_user_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// JSON file holding the current registration
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store inside `data_dir`
    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(STORE_FILE),
        }
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registration, `None` if nothing is stored
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(&self) -> Result<Option<StoredClient>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let stored: StoredClient = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("invalid client file {}: {e}", self.path.display()))
        })?;
        tracing::debug!(path = %self.path.display(), id = %stored.client.id, "loaded client");
        Ok(Some(stored))
    }

    /// Save the registration, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, stored: &StoredClient) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(stored)?)?;
        tracing::debug!(path = %self.path.display(), "saved client");
        Ok(())
    }

    /// Remove the registration; missing file is fine
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be removed
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_is_16_hex_chars() {
        let id = generate_user_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_user_id());
    }

    #[test]
    fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(&dir.path().join("nested"));
        assert!(store.load().unwrap().is_none());

        let mut client = ClientCredentials::new("id", "key", "secret");
        client.uuid = Some("uuid-1".to_string());
        let stored = StoredClient {
            client,
            user_id: "0011223344556677".to_string(),
        };
        store.save(&stored).unwrap();
        assert_eq!(store.load().unwrap(), Some(stored));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_dir(dir.path());
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(Error::Config(_))));
    }
}
