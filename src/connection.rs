//! The connection façade
//!
//! A [`Connection`] binds one connection profile to its collaborators (peer
//! client, orderer, event hub, certificate authority) and exposes the ledger
//! operations: deploy, invoke, update, undeploy, query and ping.
//!
//! Lifecycle:
//!
//! ```text
//! build() -> Disconnected --connect()--> Connected --login()--> LoggedIn
//!                 ^                                              |    ^
//!                 +------------------disconnect()----------------+    |
//!                                                  operation -> Busy(op)
//! ```
//!
//! Operations take `&self` and may run concurrently; the connection reports
//! `Busy` while any of them is in flight.

use crate::commit::{spawn_dispatcher, CommitCoordinator, CommitListeners};
use crate::config::ConnectionOptions;
use crate::deploy::{stage_chaincode, BusinessNetwork, RuntimePackager};
use crate::error::{ConnectorError, Result};
use crate::identity::{FileIdentityStore, Identity, IdentityManager, IdentityStore, SecurityContext};
use crate::proposal::{string_args, validate_args, validate_function_name, ProposalCoordinator};
use crate::transport::{CertificateAuthority, EventHub, Orderer, PeerClient, ProposalKind};
use crate::version::{VersionNegotiator, CONNECTOR_VERSION};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Deploy,
    Invoke,
    Query,
    Update,
    Undeploy,
    Ping,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Operation::Deploy => "deploy",
            Operation::Invoke => "invoke",
            Operation::Query => "query",
            Operation::Update => "update",
            Operation::Undeploy => "undeploy",
            Operation::Ping => "ping",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    LoggedIn,
    Busy(Operation),
}

/// Marks an operation as in flight until dropped.
struct BusyGuard<'a> {
    in_flight: &'a Mutex<Vec<Operation>>,
    operation: Operation,
}

impl<'a> BusyGuard<'a> {
    fn enter(in_flight: &'a Mutex<Vec<Operation>>, operation: Operation) -> Self {
        in_flight.lock().push(operation);
        BusyGuard {
            in_flight,
            operation,
        }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        if let Some(index) = in_flight.iter().rposition(|op| *op == self.operation) {
            in_flight.remove(index);
        }
    }
}

/// The body of a `ping` response. Only `version` is interpreted; any other
/// fields the runtime reports are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    pub version: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Default)]
pub struct ConnectionBuilder {
    connection_profile: String,
    business_network_identifier: Option<String>,
    options: Option<ConnectionOptions>,
    peers: Option<Arc<dyn PeerClient>>,
    orderer: Option<Arc<dyn Orderer>>,
    event_hub: Option<Arc<dyn EventHub>>,
    ca: Option<Arc<dyn CertificateAuthority>>,
    identity_store: Option<Arc<dyn IdentityStore>>,
    runtime: Option<Arc<dyn RuntimePackager>>,
    connector_version: Option<String>,
}

impl ConnectionBuilder {
    pub fn new(connection_profile: impl Into<String>) -> Self {
        ConnectionBuilder {
            connection_profile: connection_profile.into(),
            ..Default::default()
        }
    }

    pub fn business_network_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.business_network_identifier = Some(identifier.into());
        self
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn peer_client(mut self, peers: Arc<dyn PeerClient>) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn orderer(mut self, orderer: Arc<dyn Orderer>) -> Self {
        self.orderer = Some(orderer);
        self
    }

    pub fn event_hub(mut self, event_hub: Arc<dyn EventHub>) -> Self {
        self.event_hub = Some(event_hub);
        self
    }

    pub fn ca_client(mut self, ca: Arc<dyn CertificateAuthority>) -> Self {
        self.ca = Some(ca);
        self
    }

    /// Defaults to a [`FileIdentityStore`] at the profile's `keyValStore`.
    pub fn identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identity_store = Some(store);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn RuntimePackager>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Defaults to [`CONNECTOR_VERSION`].
    pub fn connector_version(mut self, version: impl Into<String>) -> Self {
        self.connector_version = Some(version.into());
        self
    }

    pub fn build(self) -> Result<Connection> {
        let options = self
            .options
            .ok_or_else(|| ConnectorError::invalid_argument("connectOptions not specified"))?;
        let peers = self
            .peers
            .ok_or_else(|| ConnectorError::invalid_argument("client not specified"))?;
        let orderer = self
            .orderer
            .ok_or_else(|| ConnectorError::invalid_argument("orderer not specified"))?;
        let event_hub = self
            .event_hub
            .ok_or_else(|| ConnectorError::invalid_argument("eventHub not specified"))?;
        let ca = self
            .ca
            .ok_or_else(|| ConnectorError::invalid_argument("caClient not specified"))?;
        options.validate()?;

        let connector_version = self
            .connector_version
            .unwrap_or_else(|| CONNECTOR_VERSION.to_string());
        let versions = VersionNegotiator::new(&connector_version)?;

        let store = match self.identity_store {
            Some(store) => store,
            None => Arc::new(FileIdentityStore::open(&options.key_val_store)?),
        };

        let listeners = Arc::new(CommitListeners::new());
        let commits = CommitCoordinator::new(orderer, listeners.clone(), options.commit_timeout);

        debug!(
            profile = %self.connection_profile,
            channel = %options.channel,
            "built connection"
        );
        Ok(Connection {
            connection_profile: self.connection_profile,
            business_network_identifier: self.business_network_identifier,
            identities: IdentityManager::new(ca, store),
            peers,
            event_hub,
            runtime: self.runtime,
            listeners,
            commits,
            versions,
            connector_version,
            options,
            state: RwLock::new(ConnectionState::Disconnected),
            in_flight: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }
}

pub struct Connection {
    connection_profile: String,
    business_network_identifier: Option<String>,
    options: ConnectionOptions,
    identities: IdentityManager,
    peers: Arc<dyn PeerClient>,
    event_hub: Arc<dyn EventHub>,
    runtime: Option<Arc<dyn RuntimePackager>>,
    listeners: Arc<CommitListeners>,
    commits: CommitCoordinator,
    versions: VersionNegotiator,
    connector_version: String,
    /// Disconnected, Connected or LoggedIn; `Busy` is derived from `in_flight`.
    state: RwLock<ConnectionState>,
    in_flight: Mutex<Vec<Operation>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    /// Held across `connect` and `disconnect` so subscriptions never overlap.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Connection {
    pub fn builder(connection_profile: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder::new(connection_profile)
    }

    /// Open the commit event subscription. Connecting twice is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if *self.state.read() != ConnectionState::Disconnected {
            return Ok(());
        }

        let events = self.event_hub.subscribe().await?;
        let handle = spawn_dispatcher(self.listeners.clone(), events);
        if let Some(previous) = self.dispatcher.lock().replace(handle) {
            previous.abort();
        }
        *self.state.write() = ConnectionState::Connected;
        info!(profile = %self.connection_profile, "connected");
        Ok(())
    }

    /// Close the event subscription if the hub reports it open, then drop the
    /// session. Transactions still awaiting commit fail.
    pub async fn disconnect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.event_hub.is_connected()? {
            self.event_hub.disconnect().await?;
            debug!(profile = %self.connection_profile, "disconnected from event hub");
        }

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            handle.abort();
        }
        self.listeners.close_all();
        self.identities.logout();

        let previous = std::mem::replace(&mut *self.state.write(), ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            info!(profile = %self.connection_profile, "disconnected");
        }
        Ok(())
    }

    pub async fn login(&self, principal: &str, secret: &str) -> Result<SecurityContext> {
        if *self.state.read() == ConnectionState::Disconnected {
            return Err(ConnectorError::NotConnected);
        }
        let context = self.identities.login(principal, secret).await?;
        *self.state.write() = ConnectionState::LoggedIn;
        Ok(context)
    }

    /// Install and instantiate `network` as chaincode, then wait for the
    /// instantiate transaction to commit.
    pub async fn deploy(
        &self,
        context: &SecurityContext,
        force_create: bool,
        network: Option<&dyn BusinessNetwork>,
    ) -> Result<()> {
        let network =
            network.ok_or_else(|| ConnectorError::invalid_argument("businessNetwork not specified"))?;
        let (identity, _busy) = self.begin(context, Operation::Deploy)?;
        let runtime = self.runtime.as_deref().ok_or_else(|| {
            ConnectorError::Config("no chaincode runtime configured for deployment".to_string())
        })?;

        let chaincode_id = network.name().to_string();
        info!(chaincode_id = %chaincode_id, force_create, "deploying business network");

        let staged = stage_chaincode(
            runtime,
            &self.connector_version,
            &self.options.chaincode_version,
            self.options.certificate.as_deref(),
        )
        .await?;

        let proposals = self.proposals(&chaincode_id);
        let installed = proposals
            .install(&identity, &chaincode_id, staged.spec().clone())
            .await?;
        debug!(tx_id = %installed.tx_id, "chaincode installed");

        let archive = network.to_archive().await?;
        let args = string_args([BASE64.encode(archive)]);
        let instantiated = proposals
            .propose(
                &identity,
                "init",
                Some(&args),
                ProposalKind::Instantiate(staged.spec().clone()),
            )
            .await?;

        self.commits.submit_and_await_commit(&instantiated).await?;
        info!(chaincode_id = %chaincode_id, "business network deployed");
        Ok(())
    }

    pub async fn invoke_chaincode(
        &self,
        context: &SecurityContext,
        function_name: &str,
        args: Option<&[Value]>,
    ) -> Result<()> {
        self.submit(context, Operation::Invoke, function_name, args)
            .await
    }

    pub async fn update(
        &self,
        context: &SecurityContext,
        network: Option<&dyn BusinessNetwork>,
    ) -> Result<()> {
        let network = network.ok_or_else(|| {
            ConnectorError::invalid_argument("businessNetworkDefinition not specified")
        })?;
        let archive = network.to_archive().await?;
        let args = string_args([BASE64.encode(archive)]);
        self.submit(context, Operation::Update, "updateBusinessNetwork", Some(&args))
            .await
    }

    pub async fn undeploy(&self, context: &SecurityContext, identifier: Option<&str>) -> Result<()> {
        let identifier = identifier.filter(|id| !id.is_empty()).ok_or_else(|| {
            ConnectorError::invalid_argument("businessNetworkIdentifier not specified")
        })?;
        let args = string_args([identifier]);
        self.submit(context, Operation::Undeploy, "undeploy", Some(&args))
            .await
    }

    pub async fn query_chaincode(
        &self,
        context: &SecurityContext,
        function_name: &str,
        args: Option<&[Value]>,
    ) -> Result<Vec<u8>> {
        validate_function_name(function_name)?;
        validate_args(args)?;
        let (identity, _busy) = self.begin(context, Operation::Query)?;
        self.network_proposals()?
            .query(&identity, function_name, args)
            .await
    }

    /// Ask the deployed runtime for its version and check it against ours.
    pub async fn ping(&self, context: &SecurityContext) -> Result<PingResponse> {
        let (identity, _busy) = self.begin(context, Operation::Ping)?;
        let payload = self
            .network_proposals()?
            .query(&identity, "ping", Some(&[]))
            .await?;

        let response: PingResponse = serde_json::from_slice(&payload)?;
        if let Err(e) = self.versions.check(&response.version) {
            warn!(
                remote = %response.version,
                local = %self.connector_version,
                "runtime version is incompatible"
            );
            return Err(e);
        }
        debug!(remote = %response.version, "ping succeeded");
        Ok(response)
    }

    pub async fn create_identity(
        &self,
        _context: &SecurityContext,
        _user_id: &str,
        _options: Option<&Value>,
    ) -> Result<Value> {
        Err(ConnectorError::Unimplemented("createIdentity"))
    }

    pub async fn list(&self, _context: &SecurityContext) -> Result<Vec<String>> {
        Err(ConnectorError::Unimplemented("list"))
    }

    pub fn connection_options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn business_network_identifier(&self) -> Option<&str> {
        self.business_network_identifier.as_deref()
    }

    pub fn connection_profile(&self) -> &str {
        &self.connection_profile
    }

    pub fn connector_version(&self) -> &str {
        &self.connector_version
    }

    pub fn state(&self) -> ConnectionState {
        let state = *self.state.read();
        match self.in_flight.lock().last() {
            Some(op) if state == ConnectionState::LoggedIn => ConnectionState::Busy(*op),
            _ => state,
        }
    }

    async fn submit(
        &self,
        context: &SecurityContext,
        operation: Operation,
        function_name: &str,
        args: Option<&[Value]>,
    ) -> Result<()> {
        validate_function_name(function_name)?;
        validate_args(args)?;
        let (identity, _busy) = self.begin(context, operation)?;

        let endorsed = self
            .network_proposals()?
            .propose(&identity, function_name, args, ProposalKind::Transaction)
            .await?;
        self.commits.submit_and_await_commit(&endorsed).await?;
        info!(operation = %operation, function = function_name, "transaction complete");
        Ok(())
    }

    fn begin(
        &self,
        context: &SecurityContext,
        operation: Operation,
    ) -> Result<(Arc<Identity>, BusyGuard<'_>)> {
        match *self.state.read() {
            ConnectionState::Disconnected => return Err(ConnectorError::NotConnected),
            ConnectionState::Connected => return Err(ConnectorError::NotLoggedIn),
            _ => {}
        }
        let identity = self.identities.identity_for(context)?;
        debug!(operation = %operation, user = context.user(), "starting operation");
        Ok((identity, BusyGuard::enter(&self.in_flight, operation)))
    }

    fn proposals(&self, chaincode_id: &str) -> ProposalCoordinator {
        ProposalCoordinator::new(self.peers.clone(), self.options.channel.clone(), chaincode_id)
    }

    fn network_proposals(&self) -> Result<ProposalCoordinator> {
        let chaincode_id = self.business_network_identifier.as_deref().ok_or_else(|| {
            ConnectorError::invalid_argument("connection is not bound to a business network")
        })?;
        Ok(self.proposals(chaincode_id))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}
