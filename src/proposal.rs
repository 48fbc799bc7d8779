//! Proposal construction and endorsement validation
//!
//! Every state-changing operation starts here: the arguments are checked,
//! a proposal with a fresh nonce and transaction id is sent to the peers, and
//! the peers' responses must all be successful endorsements before anything
//! is handed to the ordering service. Queries take the same first step but
//! return the first peer's payload directly.

use crate::crypto::{generate_nonce, transaction_id};
use crate::error::{ConnectorError, Result};
use crate::identity::Identity;
use crate::transport::{
    DeploymentSpec, PeerClient, Proposal, ProposalHeader, ProposalKind, ProposalRequest,
    ProposalResponse, ProposalResponseSet, SignedProposal, TransactionRequest, DEFAULT_ATTRIBUTES,
    ENDORSEMENT_OK,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A proposal every peer endorsed, ready for ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndorsedProposal {
    pub tx_id: String,
    pub responses: Vec<ProposalResponse>,
    pub proposal: SignedProposal,
    pub header: ProposalHeader,
}

impl EndorsedProposal {
    pub fn transaction_request(&self) -> TransactionRequest {
        TransactionRequest {
            proposal_responses: self.responses.clone(),
            proposal: self.proposal.clone(),
            header: self.header.clone(),
        }
    }
}

pub struct ProposalCoordinator {
    peers: Arc<dyn PeerClient>,
    channel_id: String,
    chaincode_id: String,
}

impl ProposalCoordinator {
    pub fn new(
        peers: Arc<dyn PeerClient>,
        channel_id: impl Into<String>,
        chaincode_id: impl Into<String>,
    ) -> Self {
        ProposalCoordinator {
            peers,
            channel_id: channel_id.into(),
            chaincode_id: chaincode_id.into(),
        }
    }

    /// Send a chaincode function call for endorsement. Arguments are checked
    /// before any peer is contacted.
    pub async fn propose(
        &self,
        identity: &Identity,
        function_name: &str,
        args: Option<&[Value]>,
        kind: ProposalKind,
    ) -> Result<EndorsedProposal> {
        validate_function_name(function_name)?;
        let args = validate_args(args)?;
        let proposal = self.build_proposal(identity, &self.chaincode_id, function_name, args)?;
        self.endorse(identity, ProposalRequest { kind, proposal }).await
    }

    /// Send an install proposal for chaincode staged under `spec.gopath`.
    pub async fn install(
        &self,
        identity: &Identity,
        chaincode_id: &str,
        spec: DeploymentSpec,
    ) -> Result<EndorsedProposal> {
        let proposal = self.build_proposal(identity, chaincode_id, "", Vec::new())?;
        self.endorse(
            identity,
            ProposalRequest {
                kind: ProposalKind::Install(spec),
                proposal,
            },
        )
        .await
    }

    /// Evaluate a read-only function and return the first peer's payload.
    pub async fn query(
        &self,
        identity: &Identity,
        function_name: &str,
        args: Option<&[Value]>,
    ) -> Result<Vec<u8>> {
        validate_function_name(function_name)?;
        let args = validate_args(args)?;
        let proposal = self.build_proposal(identity, &self.chaincode_id, function_name, args)?;
        debug!(tx_id = %proposal.tx_id, function = function_name, "sending query");

        let payloads = self.peers.query(identity, &proposal).await?;
        match payloads.into_iter().next() {
            None => Err(ConnectorError::NoQueryResult),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(payload)) => Ok(payload),
        }
    }

    pub fn chaincode_id(&self) -> &str {
        &self.chaincode_id
    }

    fn build_proposal(
        &self,
        identity: &Identity,
        chaincode_id: &str,
        function_name: &str,
        args: Vec<String>,
    ) -> Result<Proposal> {
        let certificate = identity.certificate().ok_or(ConnectorError::NotLoggedIn)?;
        let nonce = generate_nonce();

        Ok(Proposal {
            tx_id: transaction_id(&nonce, certificate),
            nonce: nonce.to_vec(),
            chaincode_id: chaincode_id.to_string(),
            channel_id: self.channel_id.clone(),
            function_name: function_name.to_string(),
            args,
            attributes: DEFAULT_ATTRIBUTES.iter().map(|a| a.to_string()).collect(),
        })
    }

    async fn endorse(
        &self,
        identity: &Identity,
        request: ProposalRequest,
    ) -> Result<EndorsedProposal> {
        let tx_id = request.proposal.tx_id.clone();
        debug!(
            tx_id = %tx_id,
            kind = request.kind.label(),
            function = %request.proposal.function_name,
            "sending proposal"
        );

        let response_set = self.peers.send_proposal(identity, &request).await?;
        let endorsed = validate_endorsements(tx_id, response_set)?;
        debug!(
            tx_id = %endorsed.tx_id,
            endorsements = endorsed.responses.len(),
            "proposal endorsed"
        );
        Ok(endorsed)
    }
}

pub fn validate_function_name(function_name: &str) -> Result<()> {
    if function_name.is_empty() {
        return Err(ConnectorError::invalid_argument("functionName not specified"));
    }
    Ok(())
}

/// Chaincode arguments must all be strings.
pub fn validate_args(args: Option<&[Value]>) -> Result<Vec<String>> {
    let args = args.ok_or_else(|| ConnectorError::invalid_argument("args not specified"))?;
    args.iter()
        .map(|arg| match arg {
            Value::String(s) => Ok(s.clone()),
            other => Err(ConnectorError::invalid_argument(format!(
                "invalid arg specified: {}",
                other
            ))),
        })
        .collect()
}

/// Convert plain strings into chaincode arguments.
pub fn string_args<I, S>(args: I) -> Vec<Value>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter().map(|a| Value::String(a.into())).collect()
}

/// Accept a response set only if it is non-empty, carries no peer errors and
/// every endorsement has status 200.
pub fn validate_endorsements(
    tx_id: String,
    response_set: ProposalResponseSet,
) -> Result<EndorsedProposal> {
    let ProposalResponseSet {
        responses,
        proposal,
        header,
    } = response_set;

    if responses.is_empty() {
        return Err(ConnectorError::NoEndorsements);
    }

    let mut endorsements = Vec::with_capacity(responses.len());
    for response in responses {
        match response {
            Ok(endorsement) => endorsements.push(endorsement),
            Err(e) => {
                warn!(tx_id = %tx_id, error = %e, "peer returned an error for proposal");
                return Err(e.into());
            }
        }
    }

    if let Some(rejected) = endorsements.iter().find(|r| r.status != ENDORSEMENT_OK) {
        warn!(tx_id = %tx_id, status = rejected.status, "peer rejected proposal");
        return Err(ConnectorError::EndorsementRejected {
            status: rejected.status,
            payload: String::from_utf8_lossy(&rejected.payload).into_owned(),
        });
    }

    Ok(EndorsedProposal {
        tx_id,
        responses: endorsements,
        proposal,
        header,
    })
}
