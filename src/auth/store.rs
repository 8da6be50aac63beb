// File-backed persistence of the single token record

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::error::{AuthError, Result};
use super::types::TokenRecord;

/// Durable storage for exactly zero or one `TokenRecord`.
///
/// Writes go to a temp file in the same directory which is then renamed over
/// the target, so readers observe either the old record or the new one.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored record.
    ///
    /// A missing file is `Ok(None)`; an unreadable or unparsable one is
    /// `StoreRead`.
    pub fn read(&self) -> Result<Option<TokenRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.read_error(err.to_string())),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| self.read_error(err.to_string()))
    }

    /// Load the stored record, treating a corrupt file the same as no file
    pub fn load(&self) -> Option<TokenRecord> {
        match self.read() {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("{}; treating as not authenticated", e);
                None
            }
        }
    }

    /// Atomically replace the stored record
    pub fn save(&self, record: &TokenRecord) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.write_error(e.to_string()))?;

        let serialized =
            serde_json::to_string_pretty(record).map_err(|e| self.write_error(e.to_string()))?;

        // NamedTempFile is created with 0600 on unix
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.write_error(e.to_string()))?;
        tmp.write_all(serialized.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| self.write_error(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| self.write_error(e.error.to_string()))?;

        tracing::info!("Token saved to {}", self.path.display());
        Ok(())
    }

    /// Remove the stored record; succeeds when nothing is stored
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Token removed from {}", self.path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.write_error(err.to_string())),
        }
    }

    fn read_error(&self, message: String) -> AuthError {
        AuthError::StoreRead {
            path: self.path.clone(),
            message,
        }
    }

    fn write_error(&self, message: String) -> AuthError {
        AuthError::StoreWrite {
            path: self.path.clone(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, TokenStore) {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(dir.path().join("data").join("token.json"));
        (dir, store)
    }

    fn record() -> TokenRecord {
        TokenRecord {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: 1_700_000_000_000,
            token_type: "Bearer".to_string(),
        }
    }

    #[test]
    fn test_round_trip() {
        let (_dir, store) = temp_store();
        tokio_test::assert_ok!(store.save(&record()));
        assert_eq!(store.load(), Some(record()));
    }

    #[test]
    fn test_missing_file_is_absent() {
        let (_dir, store) = temp_store();
        assert!(store.read().unwrap().is_none());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_corrupt_file_is_absent() {
        let (_dir, store) = temp_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(store.read(), Err(AuthError::StoreRead { .. })));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_replaces_previous_record() {
        let (_dir, store) = temp_store();
        store.save(&record()).unwrap();

        let mut updated = record();
        updated.access_token = "access-2".to_string();
        updated.refresh_token = None;
        store.save(&updated).unwrap();

        assert_eq!(store.load(), Some(updated));
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let (_dir, store) = temp_store();
        store.save(&record()).unwrap();
        store.save(&record()).unwrap();

        let entries: Vec<_> = fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_clear_removes_record_and_tolerates_absence() {
        let (_dir, store) = temp_store();
        store.save(&record()).unwrap();
        store.clear().unwrap();
        assert!(store.load().is_none());
        tokio_test::assert_ok!(store.clear());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = temp_store();
        store.save(&record()).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
