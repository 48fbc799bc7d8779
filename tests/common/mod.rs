//! In-process collaborators for connection tests
//!
//! The fake peers sign each proposal by echoing its transaction id as the
//! proposal bytes, so the fake orderer can raise the matching commit event on
//! the fake event hub.

#![allow(dead_code)]

use async_trait::async_trait;
use ledger_connector::identity::InMemoryIdentityStore;
use ledger_connector::transport::{
    BroadcastResponse, CertificateAuthority, CommitEvent, CommitStatus, EndorsementResponse,
    Enrollment, EnrollmentRequest, EventHub, Orderer, PeerClient, Proposal, ProposalHeader,
    ProposalKind, ProposalRequest, ProposalResponse, ProposalResponseSet, QueryResponse, SignedProposal,
    TransactionRequest,
};
use ledger_connector::{
    Connection, ConnectionOptions, Identity, RuntimePackager, SecurityContext, TransportError,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct FakePeers {
    pub endorsements: Mutex<Vec<EndorsementResponse>>,
    pub payloads: Mutex<Vec<QueryResponse>>,
    pub proposals: Mutex<Vec<ProposalRequest>>,
    pub queries: Mutex<Vec<Proposal>>,
    /// `version.go` and `certificate.pem` as seen by each install proposal.
    pub staged: Mutex<Vec<(Option<String>, Option<String>)>>,
}

impl Default for FakePeers {
    fn default() -> Self {
        FakePeers {
            endorsements: Mutex::new(vec![Ok(ProposalResponse::ok())]),
            payloads: Mutex::new(Vec::new()),
            proposals: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PeerClient for FakePeers {
    async fn send_proposal(
        &self,
        _signer: &Identity,
        request: &ProposalRequest,
    ) -> Result<ProposalResponseSet, TransportError> {
        self.proposals.lock().push(request.clone());
        if let ProposalKind::Install(spec) = &request.kind {
            let dir = spec.gopath.join("src").join(&spec.chaincode_path);
            let version = std::fs::read_to_string(dir.join("version.go")).ok();
            let certificate = std::fs::read_to_string(dir.join("certificate.pem")).ok();
            self.staged.lock().push((version, certificate));
        }
        Ok(ProposalResponseSet {
            responses: self.endorsements.lock().clone(),
            proposal: SignedProposal(request.proposal.tx_id.as_bytes().to_vec()),
            header: ProposalHeader(b"gooooal".to_vec()),
        })
    }

    async fn query(
        &self,
        _signer: &Identity,
        proposal: &Proposal,
    ) -> Result<Vec<QueryResponse>, TransportError> {
        self.queries.lock().push(proposal.clone());
        Ok(self.payloads.lock().clone())
    }
}

#[derive(Default)]
pub struct FakeEventHub {
    sender: Mutex<Option<mpsc::Sender<CommitEvent>>>,
    connected: AtomicBool,
    pub connection_error: Mutex<Option<String>>,
    pub subscriptions: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeEventHub {
    pub async fn emit(&self, event: CommitEvent) {
        let sender = self.sender.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// End the event stream without a disconnect request.
    pub fn drop_stream(&self) {
        self.sender.lock().take();
    }
}

#[async_trait]
impl EventHub for FakeEventHub {
    async fn subscribe(&self) -> Result<mpsc::Receiver<CommitEvent>, TransportError> {
        // A real hub answers over the network; let other tasks run meanwhile.
        tokio::task::yield_now().await;
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(64);
        *self.sender.lock() = Some(sender);
        self.connected.store(true, Ordering::SeqCst);
        Ok(receiver)
    }

    fn is_connected(&self) -> Result<bool, TransportError> {
        if let Some(message) = self.connection_error.lock().clone() {
            return Err(TransportError::new(message));
        }
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.sender.lock().take();
        Ok(())
    }
}

/// Acknowledges every transaction with `status` and, when `commit` is set,
/// raises the commit event for it.
pub struct FakeOrderer {
    hub: Arc<FakeEventHub>,
    pub status: Mutex<String>,
    pub commit: Mutex<Option<CommitStatus>>,
    pub transactions: Mutex<Vec<TransactionRequest>>,
}

impl FakeOrderer {
    pub fn new(hub: Arc<FakeEventHub>) -> Self {
        FakeOrderer {
            hub,
            status: Mutex::new(BroadcastResponse::SUCCESS.to_string()),
            commit: Mutex::new(Some(CommitStatus::Success)),
            transactions: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.transactions.lock().len()
    }
}

#[async_trait]
impl Orderer for FakeOrderer {
    async fn send_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<BroadcastResponse, TransportError> {
        self.transactions.lock().push(request.clone());
        let commit = self.commit.lock().clone();
        if let Some(status) = commit {
            let tx_id = String::from_utf8_lossy(&request.proposal.0).into_owned();
            self.hub.emit(CommitEvent { tx_id, status }).await;
        }
        Ok(BroadcastResponse {
            status: self.status.lock().clone(),
        })
    }
}

#[derive(Default)]
pub struct FakeCa {
    pub enrollments: AtomicUsize,
    pub failure: Mutex<Option<String>>,
}

#[async_trait]
impl CertificateAuthority for FakeCa {
    async fn enroll(&self, request: &EnrollmentRequest) -> Result<Enrollment, TransportError> {
        self.enrollments.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failure.lock().clone() {
            return Err(TransportError::new(message));
        }
        Ok(Enrollment {
            key: format!("{}-key", request.enrollment_id),
            certificate: format!("{}-cert", request.enrollment_id),
        })
    }
}

/// Writes a single source file and remembers where it was asked to stage.
#[derive(Default)]
pub struct FakeRuntime {
    pub targets: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl RuntimePackager for FakeRuntime {
    async fn stage_runtime(&self, target: &Path) -> Result<(), TransportError> {
        self.targets.lock().push(target.to_path_buf());
        tokio::fs::write(target.join("main.go"), "package main\n")
            .await
            .map_err(|e| TransportError::new(e.to_string()))
    }
}

pub struct Harness {
    pub peers: Arc<FakePeers>,
    pub hub: Arc<FakeEventHub>,
    pub orderer: Arc<FakeOrderer>,
    pub ca: Arc<FakeCa>,
    pub runtime: Arc<FakeRuntime>,
    pub store: Arc<InMemoryIdentityStore>,
    pub connection: Connection,
}

pub fn options() -> ConnectionOptions {
    ConnectionOptions::new(
        vec!["grpc://localhost:7050".to_string()],
        vec!["grpc://localhost:7051".to_string()],
        vec!["grpc://localhost:7053".to_string()],
        "http://localhost:7054",
        "/tmp/hlfabric1",
        "testchainid",
    )
    .with_commit_timeout(Duration::from_millis(200))
}

pub fn harness() -> Harness {
    harness_with(options(), "0.2.0")
}

pub fn harness_with(options: ConnectionOptions, connector_version: &str) -> Harness {
    let peers = Arc::new(FakePeers::default());
    let hub = Arc::new(FakeEventHub::default());
    let orderer = Arc::new(FakeOrderer::new(hub.clone()));
    let ca = Arc::new(FakeCa::default());
    let runtime = Arc::new(FakeRuntime::default());
    let store = Arc::new(InMemoryIdentityStore::new());

    let connection = Connection::builder("hlfabric1")
        .business_network_identifier("org.acme.biznet")
        .options(options)
        .peer_client(peers.clone())
        .orderer(orderer.clone())
        .event_hub(hub.clone())
        .ca_client(ca.clone())
        .identity_store(store.clone())
        .runtime(runtime.clone())
        .connector_version(connector_version)
        .build()
        .expect("harness connection should build");

    Harness {
        peers,
        hub,
        orderer,
        ca,
        runtime,
        store,
        connection,
    }
}

impl Harness {
    pub async fn logged_in(&self) -> SecurityContext {
        self.connection.connect().await.expect("connect");
        self.connection
            .login("admin", "adminpw")
            .await
            .expect("login")
    }

    pub fn ping_payload(&self, body: &str) {
        *self.peers.payloads.lock() = vec![Ok(body.as_bytes().to_vec())];
    }
}
