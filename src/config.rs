//! Connection profile management
//!
//! A connection profile names the orderers, peers, event sources and
//! certificate authority of one channel, plus the local identity store.
//! Profiles are read from JSON or TOML and validated once, before a
//! [`Connection`](crate::connection::Connection) is built from them.

use crate::error::{ConnectorError, Result};
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PEER_SCHEMES: &[&str] = &["grpc", "grpcs"];
const CA_SCHEMES: &[&str] = &["http", "https"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    pub orderers: Vec<String>,
    pub peers: Vec<String>,
    pub events: Vec<String>,
    pub ca: String,
    pub key_val_store: PathBuf,
    pub channel: String,
    /// PEM certificate copied into every deployment package.
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(
        default = "default_commit_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub commit_timeout: Duration,
    #[serde(default = "default_chaincode_version")]
    pub chaincode_version: String,
}

impl ConnectionOptions {
    pub fn new(
        orderers: Vec<String>,
        peers: Vec<String>,
        events: Vec<String>,
        ca: impl Into<String>,
        key_val_store: impl Into<PathBuf>,
        channel: impl Into<String>,
    ) -> Self {
        ConnectionOptions {
            orderers,
            peers,
            events,
            ca: ca.into(),
            key_val_store: key_val_store.into(),
            channel: channel.into(),
            certificate: None,
            commit_timeout: default_commit_timeout(),
            chaincode_version: default_chaincode_version(),
        }
    }

    pub fn with_certificate(mut self, certificate: impl Into<String>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let options: ConnectionOptions = serde_json::from_str(text)
            .map_err(|e| ConnectorError::Config(format!("invalid connection profile: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: ConnectionOptions = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Check every field required for an active connection.
    pub fn validate(&self) -> Result<()> {
        check_endpoints("orderers", &self.orderers, PEER_SCHEMES)?;
        check_endpoints("peers", &self.peers, PEER_SCHEMES)?;
        check_endpoints("events", &self.events, PEER_SCHEMES)?;
        check_endpoint("ca", &self.ca, CA_SCHEMES)?;

        if self.key_val_store.as_os_str().is_empty() {
            return Err(ConnectorError::Config("keyValStore must be set".to_string()));
        }
        if self.channel.trim().is_empty() {
            return Err(ConnectorError::Config("channel must be set".to_string()));
        }
        if self.chaincode_version.trim().is_empty() {
            return Err(ConnectorError::Config(
                "chaincodeVersion must not be empty".to_string(),
            ));
        }
        if self.commit_timeout.is_zero() {
            return Err(ConnectorError::Config(
                "commitTimeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load a connection profile from disk. Files ending in `.json` are parsed as
/// JSON, anything else as TOML.
pub fn load_connection_options(path: &Path) -> Result<ConnectionOptions> {
    let text = fs::read_to_string(path).map_err(|e| {
        ConnectorError::Config(format!("cannot read profile {}: {}", path.display(), e))
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => ConnectionOptions::from_json_str(&text),
        _ => ConnectionOptions::from_toml_str(&text),
    }
}

fn check_endpoints(field: &str, endpoints: &[String], schemes: &[&str]) -> Result<()> {
    if endpoints.is_empty() {
        return Err(ConnectorError::Config(format!(
            "{} must list at least one endpoint",
            field
        )));
    }
    for endpoint in endpoints {
        check_endpoint(field, endpoint, schemes)?;
    }
    Ok(())
}

fn check_endpoint(field: &str, endpoint: &str, schemes: &[&str]) -> Result<()> {
    let (scheme, rest) = endpoint.split_once("://").ok_or_else(|| {
        ConnectorError::Config(format!("{} endpoint {:?} has no scheme", field, endpoint))
    })?;

    if !schemes.contains(&scheme) {
        return Err(ConnectorError::Config(format!(
            "{} endpoint {:?} must use one of {:?}",
            field, endpoint, schemes
        )));
    }
    if rest.is_empty() {
        return Err(ConnectorError::Config(format!(
            "{} endpoint {:?} has no host",
            field, endpoint
        )));
    }
    Ok(())
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

fn default_commit_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_chaincode_version() -> String {
    "1.0".to_string()
}
