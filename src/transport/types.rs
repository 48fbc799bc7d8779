/// Request and response types exchanged with peers, orderers, event hubs and
/// certificate authorities
use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The attribute list attached to every chaincode proposal.
pub const DEFAULT_ATTRIBUTES: &[&str] = &["userID"];

/// Status a peer reports for a successful endorsement.
pub const ENDORSEMENT_OK: u16 = 200;

/// A candidate transaction sent to peers for endorsement or query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub tx_id: String,
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    pub chaincode_id: String,
    pub channel_id: String,
    pub function_name: String,
    pub args: Vec<String>,
    pub attributes: Vec<String>,
}

/// Where the staged chaincode lives, for install and instantiate proposals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSpec {
    pub chaincode_path: String,
    pub chaincode_version: String,
    /// Root of the staged source tree; `chaincode_path` is relative to `<gopath>/src`.
    pub gopath: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalKind {
    Install(DeploymentSpec),
    Instantiate(DeploymentSpec),
    Transaction,
}

impl ProposalKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProposalKind::Install(_) => "install",
            ProposalKind::Instantiate(_) => "instantiate",
            ProposalKind::Transaction => "transaction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalRequest {
    pub kind: ProposalKind,
    pub proposal: Proposal,
}

/// A single peer's endorsement of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub status: u16,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub endorsement: Vec<u8>,
}

impl ProposalResponse {
    pub fn ok() -> Self {
        ProposalResponse {
            status: ENDORSEMENT_OK,
            payload: Vec::new(),
            endorsement: Vec::new(),
        }
    }

    pub fn with_status(status: u16, payload: impl Into<Vec<u8>>) -> Self {
        ProposalResponse {
            status,
            payload: payload.into(),
            endorsement: Vec::new(),
        }
    }
}

/// Per-peer outcome: an endorsement or the error that peer reported.
pub type EndorsementResponse = std::result::Result<ProposalResponse, TransportError>;

/// Per-peer outcome of a query: the raw payload or an error.
pub type QueryResponse = std::result::Result<Vec<u8>, TransportError>;

/// The signed proposal bytes, opaque to this crate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedProposal(pub Vec<u8>);

/// The proposal header bytes, opaque to this crate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalHeader(pub Vec<u8>);

/// Everything a proposal call returns: one response per peer plus the
/// proposal and header needed to assemble the transaction for ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalResponseSet {
    pub responses: Vec<EndorsementResponse>,
    pub proposal: SignedProposal,
    pub header: ProposalHeader,
}

/// An endorsed transaction ready for the ordering service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub proposal_responses: Vec<ProposalResponse>,
    pub proposal: SignedProposal,
    pub header: ProposalHeader,
}

/// The ordering service's acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub status: String,
}

impl BroadcastResponse {
    pub const SUCCESS: &'static str = "SUCCESS";

    pub fn success() -> Self {
        BroadcastResponse {
            status: Self::SUCCESS.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Self::SUCCESS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitStatus {
    Success,
    /// Any non-valid outcome, with the validation code the network reported.
    Failure(String),
}

/// A commit notification from the event hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEvent {
    pub tx_id: String,
    pub status: CommitStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRequest {
    pub enrollment_id: String,
    pub enrollment_secret: String,
}

/// The key and certificate issued by a certificate authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub key: String,
    pub certificate: String,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}
