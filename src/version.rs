//! Protocol version negotiation between the connector and deployed chaincode

use crate::error::{ConnectorError, Result};
use semver::Version;
use tracing::debug;

/// The version this crate was built as, used when no version is injected.
pub const CONNECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Decides whether a remote version is compatible with the local one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionNegotiator {
    local: Version,
}

impl VersionNegotiator {
    pub fn new(local: &str) -> Result<Self> {
        let local = Version::parse(local).map_err(|e| {
            ConnectorError::invalid_argument(format!("invalid connector version {}: {}", local, e))
        })?;
        Ok(VersionNegotiator { local })
    }

    pub fn local_version(&self) -> &Version {
        &self.local
    }

    pub fn check(&self, remote: &str) -> Result<Version> {
        check_compatibility(&self.local.to_string(), remote)
    }
}

/// Versions are compatible when both parse and share a major number.
/// Pre-release and build tags are reported but never decide the outcome.
pub fn check_compatibility(local: &str, remote: &str) -> Result<Version> {
    let incompatible = || ConnectorError::IncompatibleVersion {
        local: local.to_string(),
        remote: remote.to_string(),
    };
    let local_version = Version::parse(local).map_err(|_| incompatible())?;
    let remote_version = Version::parse(remote).map_err(|_| incompatible())?;

    if local_version.major != remote_version.major {
        return Err(incompatible());
    }
    if local_version.pre != remote_version.pre || local_version.build != remote_version.build {
        debug!(local, remote, "versions differ only in pre-release or build tags");
    }
    Ok(remote_version)
}
