// Platform boundary: whatever actually creates and tears down peers.
//
// `LocalPlatform` is the in-process implementation. Lifecycle events may be
// posted from any thread; they are queued and dispatched on whichever thread
// runs the event loop (`pump` or `run`).
//
// Architecture: any thread → command queue → event-loop thread → peer hooks

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::correlation::CorrelationTable;
use crate::instance::InstanceId;
use crate::outcome::Outcome;
use crate::peer::{PeerLifecycle, PeerParams, ResultPeer};
use crate::registry::InstanceRegistry;

pub trait Platform: Send + Sync {
    /// Request creation of a peer carrying `params`. An error here is a
    /// synchronous spawn failure; the peer will never exist.
    fn spawn_peer(&self, params: PeerParams) -> Result<()>;

    /// Request teardown of a live peer. Teardown may happen later, on the
    /// platform's event loop.
    fn finish(&self, id: InstanceId);
}

/// Everything a freshly created peer is wired to.
pub struct PeerSeed {
    pub id: InstanceId,
    pub table: Arc<CorrelationTable>,
    pub registry: Arc<InstanceRegistry>,
    pub platform: Weak<dyn Platform>,
}

/// Builds the concrete peer for each `Create` command.
pub type PeerFactory = Box<dyn Fn(PeerSeed) -> Arc<dyn PeerLifecycle> + Send + Sync>;

fn result_peer(seed: PeerSeed) -> Arc<dyn PeerLifecycle> {
    ResultPeer::new(seed.id, seed.table, seed.registry, seed.platform)
}

/// Commands posted to the event loop.
#[derive(Debug)]
pub enum PlatformCommand {
    /// Create a peer and run its `on_create`
    Create { params: PeerParams },
    /// The operation a peer was spawned for has completed
    Deliver { id: InstanceId, outcome: Outcome },
    /// Tear a peer down (finish request or user dismissal)
    Destroy { id: InstanceId },
    /// Stop `run`
    Shutdown,
}

pub struct LocalPlatform {
    sender: Sender<PlatformCommand>,
    receiver: Receiver<PlatformCommand>,
    table: Arc<CorrelationTable>,
    registry: Arc<InstanceRegistry>,
    peers: Mutex<HashMap<InstanceId, Arc<dyn PeerLifecycle>>>,
    factory: PeerFactory,
    accepting: AtomicBool,
    this: Weak<LocalPlatform>,
}

impl LocalPlatform {
    /// A platform that spawns `ResultPeer`s.
    pub fn new(table: Arc<CorrelationTable>, registry: Arc<InstanceRegistry>) -> Arc<Self> {
        Self::with_factory(table, registry, Box::new(result_peer))
    }

    pub fn with_factory(
        table: Arc<CorrelationTable>,
        registry: Arc<InstanceRegistry>,
        factory: PeerFactory,
    ) -> Arc<Self> {
        let (sender, receiver) = unbounded();
        Arc::new_cyclic(|this| Self {
            sender,
            receiver,
            table,
            registry,
            peers: Mutex::new(HashMap::new()),
            factory,
            accepting: AtomicBool::new(true),
            this: this.clone(),
        })
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<InstanceId, Arc<dyn PeerLifecycle>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, command: PlatformCommand) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|e| anyhow::anyhow!("Failed to send command: {}", e))
    }

    /// When false, every spawn request fails synchronously.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Post the result of the operation peer `id` was spawned for.
    pub fn deliver_result(&self, id: InstanceId, outcome: Outcome) {
        if let Err(e) = self.send(PlatformCommand::Deliver { id, outcome }) {
            tracing::error!(%id, "dropping result: {:#}", e);
        }
    }

    /// Dismiss peer `id` without a result.
    pub fn destroy(&self, id: InstanceId) {
        if let Err(e) = self.send(PlatformCommand::Destroy { id }) {
            tracing::error!(%id, "dropping destroy: {:#}", e);
        }
    }

    /// Ask a running `run` loop to return.
    pub fn stop(&self) {
        if let Err(e) = self.send(PlatformCommand::Shutdown) {
            tracing::error!("dropping shutdown: {:#}", e);
        }
    }

    pub fn live_peers(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.peers().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Dispatch every queued command, including ones queued while dispatching.
    /// Returns the number of commands handled.
    pub fn pump(&self) -> usize {
        let mut handled = 0;
        while let Ok(command) = self.receiver.try_recv() {
            self.dispatch(command);
            handled += 1;
        }
        handled
    }

    /// Block dispatching commands until `stop` is called.
    pub fn run(&self) {
        tracing::debug!("platform event loop started");
        while let Ok(command) = self.receiver.recv() {
            if !self.dispatch(command) {
                break;
            }
        }
        tracing::debug!("platform event loop stopped");
    }

    /// Returns false for `Shutdown`.
    fn dispatch(&self, command: PlatformCommand) -> bool {
        match command {
            PlatformCommand::Create { params } => {
                let id = InstanceId::next();
                let peer = (self.factory)(PeerSeed {
                    id,
                    table: self.table.clone(),
                    registry: self.registry.clone(),
                    platform: self.this.clone(),
                });
                self.peers().insert(id, peer.clone());
                tracing::debug!(%id, "peer created");
                peer.on_create(&params);
            }
            PlatformCommand::Deliver { id, outcome } => {
                let peer = self.peers().get(&id).cloned();
                match peer {
                    Some(peer) => peer.on_result(outcome),
                    None => tracing::warn!(%id, "result for unknown peer dropped"),
                }
            }
            PlatformCommand::Destroy { id } => {
                // Stays listed as live until its teardown has run.
                let peer = self.peers().get(&id).cloned();
                if let Some(peer) = peer {
                    peer.on_destroy();
                    self.peers().remove(&id);
                    tracing::debug!(%id, "peer destroyed");
                }
            }
            PlatformCommand::Shutdown => return false,
        }
        true
    }
}

impl Platform for LocalPlatform {
    fn spawn_peer(&self, params: PeerParams) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            anyhow::bail!("platform is not accepting new peers");
        }
        self.send(PlatformCommand::Create { params })
    }

    fn finish(&self, id: InstanceId) {
        self.destroy(id);
    }
}
