//! Ledger Connector - client-side transaction submission for permissioned ledgers
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Session
//! - [`connection`] - Connection façade, lifecycle and ledger operations
//! - [`identity`] - Signing identities, login/enroll and the identity store
//!
//! ## Transaction Flow
//! - [`proposal`] - Proposal construction and endorsement validation
//! - [`commit`] - Ordering and commit notification
//! - [`deploy`] - Staging chaincode for install and instantiate
//! - [`version`] - Runtime version compatibility
//!
//! ## Collaborators
//! - [`transport`] - Peer, orderer, event hub and CA contracts
//!
//! ## Configuration & Utilities
//! - [`config`] - Connection profiles
//! - [`crypto`] - Nonces and transaction ids
//! - [`error`] - Error types
//! - [`logging`] - Subscriber setup

#![forbid(unsafe_code)]

// ============================================================================
// Session
// ============================================================================
pub mod connection;
pub mod identity;

// ============================================================================
// Transaction Flow
// ============================================================================
pub mod commit;
pub mod deploy;
pub mod proposal;
pub mod version;

// ============================================================================
// Collaborators
// ============================================================================
pub mod transport;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;

pub use config::{load_connection_options, ConnectionOptions};
pub use connection::{Connection, ConnectionBuilder, ConnectionState, Operation, PingResponse};
pub use deploy::{BusinessNetwork, BusinessNetworkArchive, DirectoryRuntime, RuntimePackager};
pub use error::{ConnectorError, ErrorKind, Result, TransportError};
pub use identity::{Identity, IdentityStore, SecurityContext};
pub use version::CONNECTOR_VERSION;
