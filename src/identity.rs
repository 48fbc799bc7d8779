//! Signing identities and the login/enroll flow
//!
//! The [`IdentityManager`] owns the identity a connection signs with. Login
//! first looks in the local [`IdentityStore`]; only a principal that has never
//! been enrolled is sent to the certificate authority.

pub mod store;

pub use store::{FileIdentityStore, IdentityStore, InMemoryIdentityStore};

use crate::error::{ConnectorError, Result};
use crate::transport::{CertificateAuthority, Enrollment, EnrollmentRequest};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A principal bound to the key and certificate issued for it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub principal: String,
    #[serde(default)]
    pub enrollment: Option<Enrollment>,
    /// RFC3339 timestamp of enrollment
    #[serde(default)]
    pub enrolled_at: Option<String>,
}

impl Identity {
    pub fn new(principal: impl Into<String>) -> Self {
        Identity {
            principal: principal.into(),
            enrollment: None,
            enrolled_at: None,
        }
    }

    pub fn enrolled(principal: impl Into<String>, enrollment: Enrollment) -> Self {
        Identity {
            principal: principal.into(),
            enrollment: Some(enrollment),
            enrolled_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn is_enrolled(&self) -> bool {
        self.enrollment
            .as_ref()
            .is_some_and(|e| !e.key.is_empty() && !e.certificate.is_empty())
    }

    pub fn certificate(&self) -> Option<&str> {
        self.enrollment.as_ref().map(|e| e.certificate.as_str())
    }
}

// Keeps the private key out of log output.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("principal", &self.principal)
            .field("enrolled", &self.is_enrolled())
            .field("enrolled_at", &self.enrolled_at)
            .finish()
    }
}

/// Handle meaning "this operation is performed as this principal".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    user: Arc<str>,
}

impl SecurityContext {
    pub fn new(user: Arc<str>) -> Self {
        SecurityContext { user }
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

pub struct IdentityManager {
    ca: Arc<dyn CertificateAuthority>,
    store: Arc<dyn IdentityStore>,
    active: RwLock<Option<Arc<Identity>>>,
}

impl IdentityManager {
    pub fn new(ca: Arc<dyn CertificateAuthority>, store: Arc<dyn IdentityStore>) -> Self {
        IdentityManager {
            ca,
            store,
            active: RwLock::new(None),
        }
    }

    /// Make `principal` the active signing identity, enrolling it with the
    /// certificate authority only if the store has no enrolled identity for it.
    pub async fn login(&self, principal: &str, secret: &str) -> Result<SecurityContext> {
        require(principal, "enrollmentID")?;
        require(secret, "enrollmentSecret")?;

        let identity = match self.load_stored(principal).await? {
            Some(stored) if stored.is_enrolled() => {
                debug!(principal, "loaded enrolled identity from store");
                let stored = Arc::new(stored);
                *self.active.write() = Some(stored.clone());
                stored
            }
            _ => self.enroll(principal, secret).await?,
        };

        info!(principal, "logged in");
        Ok(SecurityContext::new(Arc::from(identity.principal.as_str())))
    }

    /// Enroll `principal` with the certificate authority, store the issued key
    /// and certificate and make the result the active identity.
    pub async fn enroll(&self, principal: &str, secret: &str) -> Result<Arc<Identity>> {
        require(principal, "enrollmentID")?;
        require(secret, "enrollmentSecret")?;

        let request = EnrollmentRequest {
            enrollment_id: principal.to_string(),
            enrollment_secret: secret.to_string(),
        };
        let enrollment = self
            .ca
            .enroll(&request)
            .await
            .map_err(ConnectorError::EnrollmentFailed)?;

        let identity = Arc::new(Identity::enrolled(principal, enrollment));
        self.save_stored(identity.clone()).await?;
        debug!(principal, "enrolled identity with certificate authority");

        *self.active.write() = Some(identity.clone());
        Ok(identity)
    }

    pub fn active_identity(&self) -> Option<Arc<Identity>> {
        self.active.read().clone()
    }

    /// The signing identity for an operation performed under `context`.
    pub fn identity_for(&self, context: &SecurityContext) -> Result<Arc<Identity>> {
        let identity = self.active_identity().ok_or(ConnectorError::NotLoggedIn)?;
        if identity.principal != context.user() {
            return Err(ConnectorError::invalid_argument(format!(
                "security context for {} does not match logged in identity {}",
                context.user(),
                identity.principal
            )));
        }
        Ok(identity)
    }

    pub fn logout(&self) {
        self.active.write().take();
    }

    // Store implementations may touch the filesystem, so they run on the
    // blocking pool.
    async fn load_stored(&self, principal: &str) -> Result<Option<Identity>> {
        let store = self.store.clone();
        let principal = principal.to_string();
        tokio::task::spawn_blocking(move || store.load(&principal))
            .await
            .map_err(store_task_failed)?
    }

    async fn save_stored(&self, identity: Arc<Identity>) -> Result<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(&identity))
            .await
            .map_err(store_task_failed)?
    }
}

fn store_task_failed(err: tokio::task::JoinError) -> ConnectorError {
    ConnectorError::IdentityStore(format!("identity store task failed: {}", err))
}

fn require(value: &str, name: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ConnectorError::invalid_argument(format!("{} not specified", name)));
    }
    Ok(())
}
