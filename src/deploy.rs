//! Staging a business network runtime for install
//!
//! Deployment installs chaincode from a GOPATH-style source tree. The tree is
//! built in a temporary directory: the runtime sources go under
//! `src/composer`, next to a generated `version.go` that records the
//! connector version and, when the profile carries one, `certificate.pem`.

use crate::error::{ConnectorError, Result, TransportError};
use crate::transport::DeploymentSpec;
use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

pub const CHAINCODE_PATH: &str = "composer";
pub const VERSION_FILE: &str = "version.go";
pub const CERTIFICATE_FILE: &str = "certificate.pem";

/// A deployable business network: its name doubles as the chaincode id.
#[async_trait]
pub trait BusinessNetwork: Send + Sync {
    fn name(&self) -> &str;

    async fn to_archive(&self) -> std::result::Result<Vec<u8>, TransportError>;
}

/// A business network whose archive has already been built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessNetworkArchive {
    name: String,
    archive: Vec<u8>,
}

impl BusinessNetworkArchive {
    pub fn new(name: impl Into<String>, archive: impl Into<Vec<u8>>) -> Self {
        BusinessNetworkArchive {
            name: name.into(),
            archive: archive.into(),
        }
    }
}

#[async_trait]
impl BusinessNetwork for BusinessNetworkArchive {
    fn name(&self) -> &str {
        &self.name
    }

    async fn to_archive(&self) -> std::result::Result<Vec<u8>, TransportError> {
        Ok(self.archive.clone())
    }
}

/// Supplies the chaincode runtime sources for a deployment.
#[async_trait]
pub trait RuntimePackager: Send + Sync {
    /// Populate `target` with the runtime sources.
    async fn stage_runtime(&self, target: &Path) -> std::result::Result<(), TransportError>;
}

/// Copies a runtime source tree from disk, skipping excluded top-level
/// entries such as vendored dependencies.
#[derive(Debug, Clone)]
pub struct DirectoryRuntime {
    source: PathBuf,
    excluded: Vec<String>,
}

impl DirectoryRuntime {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        DirectoryRuntime {
            source: source.into(),
            excluded: Vec::new(),
        }
    }

    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded.push(name.into());
        self
    }
}

#[async_trait]
impl RuntimePackager for DirectoryRuntime {
    async fn stage_runtime(&self, target: &Path) -> std::result::Result<(), TransportError> {
        let source = self.source.clone();
        let target = target.to_path_buf();
        let excluded = self.excluded.clone();

        tokio::task::spawn_blocking(move || copy_tree(&source, &target, &excluded))
            .await
            .map_err(|e| TransportError::new(format!("runtime copy task failed: {}", e)))?
            .map_err(|e| TransportError::new(format!("cannot copy runtime: {}", e)))
    }
}

fn copy_tree(source: &Path, target: &Path, excluded: &[String]) -> io::Result<()> {
    copy_dir(source, target, excluded, &mut Vec::new())
}

/// Copy `source` into `target`, following symlinks. `ancestors` holds the
/// canonical paths of the directories being copied, to catch symlink loops.
fn copy_dir(
    source: &Path,
    target: &Path,
    excluded: &[String],
    ancestors: &mut Vec<PathBuf>,
) -> io::Result<()> {
    let canonical = fs::canonicalize(source)?;
    if ancestors.contains(&canonical) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("symlink loop at {}", source.display()),
        ));
    }
    let top_level = ancestors.is_empty();
    ancestors.push(canonical);

    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name();
        if top_level && excluded.iter().any(|e| name.to_str() == Some(e.as_str())) {
            continue;
        }

        let path = entry.path();
        let destination = target.join(&name);
        let metadata = fs::metadata(&path)
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))?;
        if metadata.is_dir() {
            copy_dir(&path, &destination, excluded, ancestors)?;
        } else {
            fs::copy(&path, &destination)?;
        }
    }

    ancestors.pop();
    Ok(())
}

/// A staged chaincode tree. The directory is removed when this is dropped.
#[derive(Debug)]
pub struct StagedChaincode {
    dir: TempDir,
    spec: DeploymentSpec,
}

impl StagedChaincode {
    pub fn spec(&self) -> &DeploymentSpec {
        &self.spec
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn chaincode_dir(&self) -> PathBuf {
        self.dir.path().join("src").join(CHAINCODE_PATH)
    }
}

/// Build the chaincode source tree for a deployment.
pub async fn stage_chaincode(
    packager: &dyn RuntimePackager,
    connector_version: &str,
    chaincode_version: &str,
    certificate: Option<&str>,
) -> Result<StagedChaincode> {
    let dir = tempfile::Builder::new().prefix("composer").tempdir()?;
    let target = dir.path().join("src").join(CHAINCODE_PATH);
    tokio::fs::create_dir_all(&target).await?;

    packager
        .stage_runtime(&target)
        .await
        .map_err(ConnectorError::Transport)?;

    tokio::fs::write(target.join(VERSION_FILE), version_source(connector_version)).await?;
    if let Some(certificate) = certificate {
        tokio::fs::write(target.join(CERTIFICATE_FILE), certificate).await?;
    }
    debug!(path = %target.display(), "staged chaincode");

    let spec = DeploymentSpec {
        chaincode_path: CHAINCODE_PATH.to_string(),
        chaincode_version: chaincode_version.to_string(),
        gopath: dir.path().to_path_buf(),
    };
    Ok(StagedChaincode { dir, spec })
}

/// Go source declaring the connector version the chaincode was deployed with.
pub fn version_source(connector_version: &str) -> String {
    format!(
        "package main\n\n// The version of the connector that deployed this chaincode.\nconst version = \"{}\"\n",
        connector_version
    )
}
