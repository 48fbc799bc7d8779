//! Local persistence for enrolled identities
//!
//! The file store keeps one JSON document per principal under the profile's
//! `keyValStore` directory. Writes go to a temporary file first and are then
//! renamed into place. Documents hold private keys, so on unix they are
//! created readable by the owner only.
//!
//! Store methods block; async callers run them on the blocking pool.

use crate::error::{ConnectorError, Result};
use crate::identity::Identity;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_PRINCIPAL_LENGTH: usize = 128;
const DOCUMENT_SUFFIX: &str = ".json";

pub trait IdentityStore: Send + Sync {
    /// Load the stored identity for `principal`, if any.
    fn load(&self, principal: &str) -> Result<Option<Identity>>;

    fn save(&self, identity: &Identity) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    dir: PathBuf,
}

impl FileIdentityStore {
    /// Open the store at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            ConnectorError::IdentityStore(format!(
                "cannot create key store {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(FileIdentityStore { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, principal: &str) -> Result<PathBuf> {
        validate_principal(principal)?;
        Ok(self.dir.join(format!("{}{}", principal, DOCUMENT_SUFFIX)))
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self, principal: &str) -> Result<Option<Identity>> {
        let path = self.document_path(principal)?;
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            ConnectorError::IdentityStore(format!("cannot read identity {}: {}", principal, e))
        })?;
        let identity: Identity = serde_json::from_str(&contents).map_err(|e| {
            ConnectorError::IdentityStore(format!("corrupt identity document for {}: {}", principal, e))
        })?;

        if identity.principal != principal {
            return Err(ConnectorError::IdentityStore(format!(
                "identity document for {} names principal {}",
                principal, identity.principal
            )));
        }
        Ok(Some(identity))
    }

    fn save(&self, identity: &Identity) -> Result<()> {
        let path = self.document_path(&identity.principal)?;
        let json = serde_json::to_string_pretty(identity)?;

        let temp_path = path.with_extension("tmp");
        if temp_path.exists() {
            fs::remove_file(&temp_path)?;
        }
        let mut file = create_private(&temp_path).map_err(|e| {
            ConnectorError::IdentityStore(format!("cannot write identity: {}", e))
        })?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        fs::rename(&temp_path, &path).map_err(|e| {
            ConnectorError::IdentityStore(format!("cannot finalize identity write: {}", e))
        })?;
        Ok(())
    }
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Non-persistent store, for tests and short-lived sessions.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    entries: RwLock<HashMap<String, Identity>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn load(&self, principal: &str) -> Result<Option<Identity>> {
        Ok(self.entries.read().get(principal).cloned())
    }

    fn save(&self, identity: &Identity) -> Result<()> {
        self.entries
            .write()
            .insert(identity.principal.clone(), identity.clone());
        Ok(())
    }
}

/// Principals become file names, so they may not contain path separators or
/// start with a dot.
fn validate_principal(principal: &str) -> Result<()> {
    if principal.is_empty() || principal.len() > MAX_PRINCIPAL_LENGTH {
        return Err(ConnectorError::invalid_argument(format!(
            "principal must be 1 to {} characters",
            MAX_PRINCIPAL_LENGTH
        )));
    }
    if principal.starts_with('.')
        || !principal
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(ConnectorError::invalid_argument(format!(
            "invalid principal name: {}",
            principal
        )));
    }
    Ok(())
}
