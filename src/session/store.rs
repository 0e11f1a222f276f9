//! Durable cookie persistence keyed by (site id, account id).
//!
//! Each session is written to `<dir>/<site>_<account>.json` as a JSON object
//! of cookie name → value. Saves always overwrite the whole file (temp file
//! plus rename) and restrict permissions to the owner on Unix.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::CookieRecord;

/// Default cookie directory, relative to the working directory.
pub const DEFAULT_COOKIE_DIR: &str = "cookies";

/// Errors for persisted cookie storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem I/O failed.
    #[error("cookie storage I/O error at {path}: {source}")]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Stored payload is not a valid cookie record.
    #[error("persisted cookie record at {path} is invalid: {source}")]
    Json {
        /// Path of the invalid record.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File-backed cookie store rooted at one directory.
#[derive(Debug, Clone)]
pub struct CookieStore {
    dir: PathBuf,
}

impl Default for CookieStore {
    fn default() -> Self {
        Self::new(DEFAULT_COOKIE_DIR)
    }
}

impl CookieStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the record path for a (site, account) pair.
    ///
    /// Characters outside `[A-Za-z0-9_-]` in either component are replaced
    /// with `_` so an account id can never escape the store directory.
    #[must_use]
    pub fn path_for(&self, site_id: &str, account_id: &str) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.json",
            file_component(site_id),
            file_component(account_id)
        ))
    }

    /// Loads the record for a (site, account) pair.
    ///
    /// Returns `Ok(None)` when nothing has been stored yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the file exists but cannot be read or parsed.
    #[instrument(level = "debug", skip(self))]
    pub fn load(
        &self,
        site_id: &str,
        account_id: &str,
    ) -> Result<Option<CookieRecord>, StorageError> {
        let path = self.path_for(site_id, account_id);
        if !path.exists() {
            debug!(path = %path.display(), "no persisted cookies");
            return Ok(None);
        }

        let bytes = fs::read(&path).map_err(|e| StorageError::io(&path, e))?;
        let record = serde_json::from_slice::<CookieRecord>(&bytes).map_err(|source| {
            StorageError::Json {
                path: path.clone(),
                source,
            }
        })?;
        debug!(path = %path.display(), count = record.len(), "loaded persisted cookies");
        Ok(Some(record))
    }

    /// Overwrites the record for a (site, account) pair.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the directory or file cannot be written.
    #[instrument(level = "debug", skip(self, record), fields(count = record.len()))]
    pub fn save(
        &self,
        site_id: &str,
        account_id: &str,
        record: &CookieRecord,
    ) -> Result<PathBuf, StorageError> {
        let path = self.path_for(site_id, account_id);
        fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;

        let payload = serde_json::to_vec(record).map_err(|source| StorageError::Json {
            path: path.clone(),
            source,
        })?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, payload).map_err(|e| StorageError::io(&tmp_path, e))?;
        set_owner_only_permissions(&tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| StorageError::io(&path, e))?;

        debug!(path = %path.display(), "saved cookies");
        Ok(path)
    }

    /// Removes the record for a (site, account) pair.
    ///
    /// Returns `true` when a record existed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when file removal fails.
    pub fn clear(&self, site_id: &str, account_id: &str) -> Result<bool, StorageError> {
        let path = self.path_for(site_id, account_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))?;
        Ok(true)
    }
}

fn file_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, permissions).map_err(|e| StorageError::io(path, e))
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}
