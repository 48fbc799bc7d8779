//! Contracts for the external collaborators the connector drives
//!
//! The peer and orderer RPC transport, the event hub and the certificate
//! authority are stateful network clients owned elsewhere. The connector only
//! talks to them through these traits, so any transport (or an in-process
//! fake) can be plugged in.

pub mod types;

pub use types::*;

use crate::error::TransportError;
use crate::identity::Identity;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Sends proposals to every peer configured for the channel.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Sign `request` as `signer` and send it to all peers, returning one
    /// response per peer.
    async fn send_proposal(
        &self,
        signer: &Identity,
        request: &ProposalRequest,
    ) -> Result<ProposalResponseSet, TransportError>;

    /// Evaluate a read-only proposal, returning one payload per peer.
    async fn query(
        &self,
        signer: &Identity,
        proposal: &Proposal,
    ) -> Result<Vec<QueryResponse>, TransportError>;
}

/// Broadcasts endorsed transactions to the ordering service.
#[async_trait]
pub trait Orderer: Send + Sync {
    async fn send_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<BroadcastResponse, TransportError>;
}

/// Long-lived subscription to commit notifications.
#[async_trait]
pub trait EventHub: Send + Sync {
    /// Open the event stream. Every commit seen on the channel is delivered
    /// once; the stream ends when the hub disconnects.
    async fn subscribe(&self) -> Result<mpsc::Receiver<CommitEvent>, TransportError>;

    fn is_connected(&self) -> Result<bool, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn enroll(&self, request: &EnrollmentRequest) -> Result<Enrollment, TransportError>;
}
