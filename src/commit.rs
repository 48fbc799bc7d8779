//! Ordering and commit notification
//!
//! Commit events arrive on a long-lived subscription that is shared by every
//! in-flight transaction. [`CommitListeners`] is the correlation table: each
//! transaction registers a one-shot listener under its id before submitting
//! to the orderer, and the dispatcher task fulfils listeners as events come
//! in. A listener is removed when its transaction resolves, fails or times
//! out, so events that arrive afterwards are dropped.

use crate::error::{ConnectorError, Result};
use crate::proposal::EndorsedProposal;
use crate::transport::{CommitEvent, CommitStatus, Orderer};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct CommitListeners {
    pending: Mutex<HashMap<String, oneshot::Sender<CommitStatus>>>,
}

impl CommitListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the commit of `tx_id`. The listener lives until
    /// the returned guard is dropped.
    pub fn register(
        self: &Arc<Self>,
        tx_id: &str,
    ) -> Result<(ListenerGuard, oneshot::Receiver<CommitStatus>)> {
        let (sender, receiver) = oneshot::channel();
        match self.pending.lock().entry(tx_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(ConnectorError::invalid_argument(format!(
                    "transaction {} is already awaiting commit",
                    tx_id
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(sender);
            }
        }

        let guard = ListenerGuard {
            listeners: self.clone(),
            tx_id: tx_id.to_string(),
        };
        Ok((guard, receiver))
    }

    /// Hand an event to its listener. Returns false if nobody was waiting.
    pub fn deliver(&self, event: CommitEvent) -> bool {
        let sender = self.pending.lock().remove(&event.tx_id);
        match sender {
            Some(sender) => sender.send(event.status).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drop every listener; their waiters see the channel close.
    pub fn close_all(&self) {
        let dropped = self.pending.lock().drain().count();
        if dropped > 0 {
            warn!(dropped, "abandoning transactions awaiting commit");
        }
    }

    fn remove(&self, tx_id: &str) {
        self.pending.lock().remove(tx_id);
    }
}

/// Deregisters a commit listener when dropped.
#[derive(Debug)]
pub struct ListenerGuard {
    listeners: Arc<CommitListeners>,
    tx_id: String,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.listeners.remove(&self.tx_id);
    }
}

/// Route events from the hub subscription into `listeners` until the
/// subscription ends.
pub fn spawn_dispatcher(
    listeners: Arc<CommitListeners>,
    mut events: mpsc::Receiver<CommitEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let tx_id = event.tx_id.clone();
            if listeners.deliver(event) {
                debug!(tx_id = %tx_id, "delivered commit event");
            } else {
                debug!(tx_id = %tx_id, "dropping commit event with no listener");
            }
        }
        info!("commit event stream closed");
        listeners.close_all();
    })
}

pub struct CommitCoordinator {
    orderer: Arc<dyn Orderer>,
    listeners: Arc<CommitListeners>,
    timeout: Duration,
}

impl CommitCoordinator {
    pub fn new(orderer: Arc<dyn Orderer>, listeners: Arc<CommitListeners>, timeout: Duration) -> Self {
        CommitCoordinator {
            orderer,
            listeners,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submit an endorsed transaction and wait for both the orderer's
    /// acknowledgement and the commit event, whichever fails first. The
    /// commit timeout bounds the pair as a whole.
    pub async fn submit_and_await_commit(&self, endorsed: &EndorsedProposal) -> Result<()> {
        let tx_id = endorsed.tx_id.as_str();
        let (_guard, receiver) = self.listeners.register(tx_id)?;
        let request = endorsed.transaction_request();

        let broadcast = async {
            let ack = self.orderer.send_transaction(&request).await?;
            if !ack.is_success() {
                return Err(ConnectorError::CommitFailed {
                    tx_id: tx_id.to_string(),
                    reason: format!("orderer returned status {}", ack.status),
                });
            }
            debug!(tx_id, "orderer accepted transaction");
            Ok::<(), ConnectorError>(())
        };

        let commit = async {
            match receiver.await {
                Ok(CommitStatus::Success) => Ok(()),
                Ok(CommitStatus::Failure(code)) => Err(ConnectorError::CommitFailed {
                    tx_id: tx_id.to_string(),
                    reason: format!("transaction invalidated with code {}", code),
                }),
                Err(_) => Err(ConnectorError::CommitFailed {
                    tx_id: tx_id.to_string(),
                    reason: "commit event stream closed".to_string(),
                }),
            }
        };

        match tokio::time::timeout(self.timeout, async { tokio::try_join!(broadcast, commit) })
            .await
        {
            Ok(outcome) => {
                outcome?;
            }
            Err(_) => {
                warn!(tx_id, timeout_ms = self.timeout.as_millis() as u64, "commit timed out");
                return Err(ConnectorError::CommitTimeout {
                    tx_id: tx_id.to_string(),
                    timeout_ms: self.timeout.as_millis(),
                });
            }
        }
        info!(tx_id, "transaction committed");
        Ok(())
    }
}
