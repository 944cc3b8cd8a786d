use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use busprims_frame::{FrameError, InterfaceStatistics, RedundantTransport, Transfer};
use busprims_transport::{
    DataSpecifier, NodeId, ServiceRole, TransferIdModulo, Transport, TransportError,
};
use crossbeam::channel::{Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::client::{PendingCalls, ServiceClient};
use crate::config::NodeConfig;
use crate::error::{Result, SessionError};
use crate::publisher::Publisher;
use crate::server::ServiceServer;
use crate::subscriber::Subscriber;

#[derive(Debug, Default)]
struct Registries {
    publishers: HashSet<u16>,
    subscribers: HashMap<u16, Sender<Transfer>>,
    servers: HashMap<u16, Sender<Transfer>>,
    clients: HashMap<u16, Arc<PendingCalls>>,
}

/// State shared by the node handle, its dispatcher and its sessions.
#[derive(Debug)]
pub(crate) struct NodeInner {
    link: RedundantTransport,
    config: NodeConfig,
    registries: RwLock<Registries>,
    running: AtomicBool,
}

impl NodeInner {
    pub(crate) fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub(crate) fn local_node_id(&self) -> Option<NodeId> {
        self.link.local_node_id()
    }

    pub(crate) fn transfer_id_modulo(&self) -> TransferIdModulo {
        self.link.transfer_id_modulo()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn send(&self, transfer: &Transfer, deadline: Instant) -> Result<()> {
        if !self.is_running() {
            return Err(SessionError::Closed);
        }
        self.link.send(transfer, deadline).map_err(|err| match err {
            FrameError::Transport(TransportError::Closed) => SessionError::Closed,
            other => other.into(),
        })
    }

    pub(crate) fn release_publisher(&self, subject_id: u16) {
        self.registries.write().publishers.remove(&subject_id);
    }

    pub(crate) fn release_subscriber(&self, subject_id: u16) {
        self.registries.write().subscribers.remove(&subject_id);
    }

    pub(crate) fn release_server(&self, service_id: u16) {
        self.registries.write().servers.remove(&service_id);
    }

    pub(crate) fn release_client(&self, service_id: u16) {
        self.registries.write().clients.remove(&service_id);
    }

    fn dispatch(&self, transfer: Transfer) {
        let local = self.local_node_id();
        match transfer.data_specifier {
            DataSpecifier::Message { subject_id } => {
                let sender = self.registries.read().subscribers.get(&subject_id).cloned();
                match sender {
                    Some(tx) => deliver(&tx, transfer, "subject", subject_id),
                    None => trace!(subject_id, "no subscriber"),
                }
            }
            DataSpecifier::Service { service_id, role } => {
                if transfer.destination_node_id != local {
                    trace!(
                        service_id,
                        destination = ?transfer.destination_node_id,
                        "service transfer for another node"
                    );
                    return;
                }
                match role {
                    ServiceRole::Request => {
                        let sender = self.registries.read().servers.get(&service_id).cloned();
                        match sender {
                            Some(tx) => deliver(&tx, transfer, "service", service_id),
                            None => trace!(service_id, "no server"),
                        }
                    }
                    ServiceRole::Response => {
                        let pending = self.registries.read().clients.get(&service_id).cloned();
                        match pending {
                            Some(pending) => pending.complete(transfer),
                            None => trace!(service_id, "no client"),
                        }
                    }
                }
            }
        }
    }

    fn shutdown(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        let mut registries = self.registries.write();
        registries.publishers.clear();
        // Dropping the senders wakes blocked receivers with a disconnect.
        registries.subscribers.clear();
        registries.servers.clear();
        for (_, pending) in registries.clients.drain() {
            pending.cancel_all();
        }
        drop(registries);
        self.link.close();
        true
    }
}

fn deliver(tx: &Sender<Transfer>, transfer: Transfer, port_kind: &'static str, port_id: u16) {
    match tx.try_send(transfer) {
        Ok(()) => {}
        Err(TrySendError::Full(dropped)) => warn!(
            port_kind,
            port_id,
            source = ?dropped.source_node_id,
            transfer_id = dropped.transfer_id,
            "session queue full, transfer dropped"
        ),
        Err(TrySendError::Disconnected(_)) => trace!(port_kind, port_id, "session gone"),
    }
}

/// A participant on the bus.
///
/// Owns the redundant link and a dispatcher thread that routes completed
/// transfers to the sessions opened on it. Each port can be held by at most
/// one session of each kind.
#[derive(Debug)]
pub struct Node {
    inner: Arc<NodeInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Start a node over `transports`.
    pub fn new(transports: Vec<Arc<dyn Transport>>, config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let link = RedundantTransport::new(transports, config.redundancy.clone())?;
        if let Some(expected) = config.local_node_id {
            if link.local_node_id() != Some(expected) {
                let actual = link.local_node_id();
                link.close();
                return Err(SessionError::Config(format!(
                    "transports carry node-ID {actual:?}, expected {expected}"
                )));
            }
        }

        let inner = Arc::new(NodeInner {
            link,
            config,
            registries: RwLock::new(Registries::default()),
            running: AtomicBool::new(true),
        });
        let dispatcher = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("busprims-dispatch".into())
                .spawn(move || dispatch_loop(&inner))
                .map_err(TransportError::Io)?
        };

        info!(
            node_id = ?inner.local_node_id(),
            interfaces = inner.link.interface_count(),
            "node started"
        );
        Ok(Self {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    pub fn local_node_id(&self) -> Option<NodeId> {
        self.inner.local_node_id()
    }

    pub fn transfer_id_modulo(&self) -> TransferIdModulo {
        self.inner.transfer_id_modulo()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn statistics(&self) -> Vec<InterfaceStatistics> {
        self.inner.link.statistics()
    }

    pub fn duplicates_discarded(&self) -> u64 {
        self.inner.link.duplicates_discarded()
    }

    pub fn make_publisher(&self, subject_id: u16) -> Result<Publisher> {
        let spec = DataSpecifier::message(subject_id)?;
        self.check_running()?;
        if !self.inner.registries.write().publishers.insert(subject_id) {
            return Err(SessionError::PortInUse(format!("publisher on {spec}")));
        }
        debug!(subject_id, "publisher opened");
        Ok(Publisher::new(Arc::clone(&self.inner), subject_id))
    }

    pub fn make_subscriber(&self, subject_id: u16) -> Result<Subscriber> {
        let spec = DataSpecifier::message(subject_id)?;
        self.check_running()?;
        let (tx, rx) = crossbeam::channel::bounded(self.inner.config.session_queue_capacity);
        {
            let mut registries = self.inner.registries.write();
            if registries.subscribers.contains_key(&subject_id) {
                return Err(SessionError::PortInUse(format!("subscriber on {spec}")));
            }
            registries.subscribers.insert(subject_id, tx);
        }
        debug!(subject_id, "subscriber opened");
        Ok(Subscriber::new(Arc::clone(&self.inner), subject_id, rx))
    }

    pub fn make_client(&self, service_id: u16) -> Result<ServiceClient> {
        let spec = DataSpecifier::request(service_id)?;
        self.check_running()?;
        let local = self.local_node_id().ok_or(SessionError::AnonymousNode)?;
        let pending = Arc::new(PendingCalls::default());
        {
            let mut registries = self.inner.registries.write();
            if registries.clients.contains_key(&service_id) {
                return Err(SessionError::PortInUse(format!("client of {spec}")));
            }
            registries.clients.insert(service_id, Arc::clone(&pending));
        }
        debug!(service_id, "client opened");
        Ok(ServiceClient::new(
            Arc::clone(&self.inner),
            service_id,
            local,
            pending,
        ))
    }

    pub fn make_server(&self, service_id: u16) -> Result<ServiceServer> {
        let spec = DataSpecifier::request(service_id)?;
        self.check_running()?;
        let local = self.local_node_id().ok_or(SessionError::AnonymousNode)?;
        let (tx, rx) = crossbeam::channel::bounded(self.inner.config.session_queue_capacity);
        {
            let mut registries = self.inner.registries.write();
            if registries.servers.contains_key(&service_id) {
                return Err(SessionError::PortInUse(format!("server of {spec}")));
            }
            registries.servers.insert(service_id, tx);
        }
        debug!(service_id, "server opened");
        Ok(ServiceServer::new(
            Arc::clone(&self.inner),
            service_id,
            local,
            rx,
        ))
    }

    /// Close every session, stop the dispatcher and close the transports.
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.shutdown() {
            if let Some(handle) = self.dispatcher.lock().take() {
                if handle.join().is_err() {
                    warn!("dispatcher panicked");
                }
            }
            info!(node_id = ?self.local_node_id(), "node closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.inner.is_running()
    }

    fn check_running(&self) -> Result<()> {
        if self.inner.is_running() {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.close();
    }
}

fn dispatch_loop(inner: &NodeInner) {
    let poll = inner.config.redundancy.poll_interval;
    while inner.is_running() {
        match inner.link.receive(poll) {
            Ok(Some(transfer)) => inner.dispatch(transfer),
            Ok(None) => {}
            Err(FrameError::Transport(TransportError::Closed)) => break,
            Err(err) => {
                warn!(error = %err, "receive failed");
                thread::sleep(poll);
            }
        }
    }
    debug!("dispatcher exiting");
}
