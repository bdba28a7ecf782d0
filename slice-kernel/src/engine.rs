//! Serialized command processor in front of the lifecycle manager.
//!
//! Activations, deactivations and topology events share one bounded queue
//! and run one at a time in arrival order. Reads bypass the queue and go to
//! the store's read lock.

use crate::catalog::SliceCatalog;
use crate::error::SliceError;
use crate::lifecycle::{ActivationReport, DeactivationReport, SliceLifecycleManager, StatusSnapshot, StoreReader, TopologyView};
use crate::topology::TopologyEvent;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

enum Command {
    Activate {
        name: String,
        reply: oneshot::Sender<Result<ActivationReport, SliceError>>,
    },
    Deactivate {
        name: String,
        reply: oneshot::Sender<Result<DeactivationReport, SliceError>>,
    },
    Topology {
        event: TopologyEvent,
        reply: Option<oneshot::Sender<bool>>,
    },
}

/// Cloneable front door to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    reader: StoreReader,
    catalog: Arc<SliceCatalog>,
}

impl EngineHandle {
    pub async fn activate(&self, name: &str) -> Result<ActivationReport, SliceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Activate { name: name.to_string(), reply }).await?;
        rx.await.map_err(|_| SliceError::EngineUnavailable)?
    }

    pub async fn deactivate(&self, name: &str) -> Result<DeactivationReport, SliceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Deactivate { name: name.to_string(), reply }).await?;
        rx.await.map_err(|_| SliceError::EngineUnavailable)?
    }

    /// Queues a discovery event without waiting for it to be applied.
    pub async fn submit_topology(&self, event: TopologyEvent) -> Result<(), SliceError> {
        self.send(Command::Topology { event, reply: None }).await
    }

    /// Queues a discovery event and waits until it has been applied.
    pub async fn apply_topology(&self, event: TopologyEvent) -> Result<bool, SliceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Topology { event, reply: Some(reply) }).await?;
        rx.await.map_err(|_| SliceError::EngineUnavailable)
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.reader.status().await
    }

    pub async fn topology(&self) -> TopologyView {
        self.reader.topology().await
    }

    pub fn reader(&self) -> &StoreReader {
        &self.reader
    }

    pub fn catalog(&self) -> &SliceCatalog {
        &self.catalog
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn send(&self, cmd: Command) -> Result<(), SliceError> {
        self.tx.send(cmd).await.map_err(|_| SliceError::EngineUnavailable)
    }
}

/// Starts the command loop. It stops once every handle is dropped.
pub fn spawn_engine(manager: SliceLifecycleManager, queue_capacity: usize) -> (EngineHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Command>(queue_capacity.max(1));
    let handle = EngineHandle { tx, reader: manager.reader(), catalog: manager.catalog().clone() };

    let task = tokio::spawn(async move {
        info!("[engine] started (queue capacity {})", queue_capacity);
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Activate { name, reply } => {
                    let result = manager.activate(&name).await;
                    if reply.send(result).is_err() {
                        debug!("[engine] caller for activate '{}' went away", name);
                    }
                }
                Command::Deactivate { name, reply } => {
                    let result = manager.deactivate(&name).await;
                    if reply.send(result).is_err() {
                        debug!("[engine] caller for deactivate '{}' went away", name);
                    }
                }
                Command::Topology { event, reply } => {
                    let applied = manager.apply_topology_event(&event).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(applied);
                    }
                }
            }
        }
        info!("[engine] all handles dropped, stopping");
    });

    (handle, task)
}
