use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use busprims_frame::Transfer;
use busprims_transport::{DataSpecifier, NodeId, Priority, ServiceRole};
use bytes::Bytes;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, SessionError};
use crate::node::NodeInner;

/// Outstanding calls of one client, keyed by `(server, transfer-ID)`.
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    waiters: Mutex<HashMap<(NodeId, u64), Sender<Transfer>>>,
    unmatched: AtomicU64,
}

impl PendingCalls {
    /// Fails if a call with the same key is still outstanding; its waiter is kept.
    fn register(&self, server: NodeId, transfer_id: u64) -> Result<channel::Receiver<Transfer>> {
        match self.waiters.lock().entry((server, transfer_id)) {
            Entry::Occupied(_) => Err(SessionError::TransferIdInUse {
                server,
                transfer_id,
            }),
            Entry::Vacant(slot) => {
                let (tx, rx) = channel::bounded(1);
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    fn forget(&self, server: NodeId, transfer_id: u64) {
        self.waiters.lock().remove(&(server, transfer_id));
    }

    /// Hand a response to its waiter. Responses nobody waits for are dropped.
    pub(crate) fn complete(&self, response: Transfer) {
        let waiter = response
            .source_node_id
            .and_then(|server| self.waiters.lock().remove(&(server, response.transfer_id)));
        match waiter {
            Some(tx) => {
                let _ = tx.try_send(response);
            }
            None => {
                self.unmatched.fetch_add(1, Ordering::Relaxed);
                trace!(
                    source = ?response.source_node_id,
                    transfer_id = response.transfer_id,
                    "unmatched response dropped"
                );
            }
        }
    }

    /// Wake every waiter with a disconnect.
    pub(crate) fn cancel_all(&self) {
        self.waiters.lock().clear();
    }
}

/// Calls one service on remote servers.
#[derive(Debug)]
pub struct ServiceClient {
    node: Arc<NodeInner>,
    service_id: u16,
    local_node_id: NodeId,
    pending: Arc<PendingCalls>,
    priority: AtomicU8,
    next_transfer_id: AtomicU64,
    closed: AtomicBool,
}

impl ServiceClient {
    pub(crate) fn new(
        node: Arc<NodeInner>,
        service_id: u16,
        local_node_id: NodeId,
        pending: Arc<PendingCalls>,
    ) -> Self {
        let priority = node.config().priority;
        Self {
            node,
            service_id,
            local_node_id,
            pending,
            priority: AtomicU8::new(priority.into()),
            next_transfer_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn service_id(&self) -> u16 {
        self.service_id
    }

    pub fn priority(&self) -> Priority {
        Priority::try_from(self.priority.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn set_priority(&self, priority: Priority) {
        self.priority.store(priority.into(), Ordering::Relaxed);
    }

    /// Responses that matched no outstanding call.
    pub fn unmatched_responses(&self) -> u64 {
        self.pending.unmatched.load(Ordering::Relaxed)
    }

    /// Send `request` to `server` and wait for its response.
    ///
    /// The response must come from `server` and echo the request's
    /// transfer-ID. Fails with [`SessionError::RequestTimedOut`] once
    /// `timeout` elapses, or [`SessionError::Cancelled`] if the client is
    /// closed meanwhile. A call whose transfer-ID wrapped onto one that is
    /// still outstanding to the same server fails with
    /// [`SessionError::TransferIdInUse`] without sending anything.
    pub fn call(
        &self,
        server: NodeId,
        request: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Transfer> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let deadline = Instant::now() + timeout;
        let modulo = self.node.transfer_id_modulo();
        let transfer_id = self
            .next_transfer_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |tid| {
                Some(modulo.increment(tid))
            })
            .unwrap_or_default();

        let transfer = Transfer {
            timestamp: Instant::now(),
            priority: self.priority(),
            data_specifier: DataSpecifier::Service {
                service_id: self.service_id,
                role: ServiceRole::Request,
            },
            source_node_id: Some(self.local_node_id),
            destination_node_id: Some(server),
            transfer_id,
            payload: request.into(),
        };

        let rx = self.pending.register(server, transfer_id)?;
        // A close that raced past the check above has already cleared the waiters.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.forget(server, transfer_id);
            return Err(SessionError::Cancelled);
        }
        if let Err(err) = self.node.send(&transfer, deadline) {
            self.pending.forget(server, transfer_id);
            return Err(err);
        }
        trace!(service_id = self.service_id, server, transfer_id, "request sent");

        match rx.recv_deadline(deadline) {
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => {
                self.pending.forget(server, transfer_id);
                debug!(service_id = self.service_id, server, transfer_id, "request timed out");
                Err(SessionError::RequestTimedOut(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::Cancelled),
        }
    }

    /// Release the service and cancel outstanding calls. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.node.release_client(self.service_id);
            self.pending.cancel_all();
            debug!(service_id = self.service_id, "client closed");
        }
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use busprims_transport::can::{CanTransport, VirtualCanBus};
    use busprims_transport::Transport;

    use super::*;
    use crate::{Node, NodeConfig};

    fn node(bus: &VirtualCanBus, id: u16) -> Node {
        let t: Arc<dyn Transport> = Arc::new(CanTransport::new(bus.attach(), Some(id)).unwrap());
        Node::new(vec![t], NodeConfig::default()).unwrap()
    }

    #[test]
    fn test_call_round_trip() {
        let bus = VirtualCanBus::new();
        let (a, b) = (node(&bus, 1), node(&bus, 2));
        let client = a.make_client(9).unwrap();
        let server = b.make_server(9).unwrap();

        thread::scope(|scope| {
            scope.spawn(|| {
                let request = server.receive_request(Duration::from_secs(2)).unwrap().unwrap();
                assert_eq!(request.source_node_id, Some(1));
                server.respond(&request, &b"pong"[..]).unwrap();
            });
            let response = client.call(2, &b"ping"[..], Duration::from_secs(2)).unwrap();
            assert_eq!(&response.payload[..], b"pong");
            assert_eq!(response.source_node_id, Some(2));
            assert_eq!(response.transfer_id, 0);
        });
    }

    #[test]
    fn test_unanswered_call_times_out() {
        let bus = VirtualCanBus::new();
        let (a, b) = (node(&bus, 1), node(&bus, 2));
        let client = a.make_client(9).unwrap();
        let _silent = b.make_server(9).unwrap();

        let started = Instant::now();
        let result = client.call(2, &b"ping"[..], Duration::from_secs(2));
        let elapsed = started.elapsed();
        assert!(matches!(result, Err(SessionError::RequestTimedOut(t)) if t == Duration::from_secs(2)));
        assert!(elapsed >= Duration::from_secs(2), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "returned late: {elapsed:?}");
    }

    #[test]
    fn test_late_response_is_unmatched() {
        let bus = VirtualCanBus::new();
        let (a, b) = (node(&bus, 1), node(&bus, 2));
        let client = a.make_client(9).unwrap();
        let server = b.make_server(9).unwrap();

        thread::scope(|scope| {
            scope.spawn(|| {
                let request = server.receive_request(Duration::from_secs(2)).unwrap().unwrap();
                thread::sleep(Duration::from_millis(300));
                server.respond(&request, &b"late"[..]).unwrap();
            });
            assert!(matches!(
                client.call(2, &b"ping"[..], Duration::from_millis(100)),
                Err(SessionError::RequestTimedOut(_))
            ));
        });
        let deadline = Instant::now() + Duration::from_secs(2);
        while client.unmatched_responses() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(client.unmatched_responses(), 1);
    }

    #[test]
    fn test_colliding_waiter_is_kept() {
        let pending = PendingCalls::default();
        let first = pending.register(2, 0).unwrap();
        assert!(matches!(
            pending.register(2, 0),
            Err(SessionError::TransferIdInUse {
                server: 2,
                transfer_id: 0
            })
        ));
        let _other_server = pending.register(3, 0).unwrap();

        let response = Transfer {
            timestamp: Instant::now(),
            priority: Priority::default(),
            data_specifier: DataSpecifier::Service {
                service_id: 9,
                role: ServiceRole::Response,
            },
            source_node_id: Some(2),
            destination_node_id: Some(1),
            transfer_id: 0,
            payload: Bytes::from_static(b"first"),
        };
        pending.complete(response);
        assert_eq!(&first.try_recv().unwrap().payload[..], b"first");
        assert_eq!(pending.unmatched.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_more_pending_calls_than_transfer_ids() {
        let bus = VirtualCanBus::new();
        let (a, b) = (node(&bus, 1), node(&bus, 2));
        let client = a.make_client(9).unwrap();
        let _silent = b.make_server(9).unwrap();

        thread::scope(|scope| {
            let calls: Vec<_> = (0..32)
                .map(|_| scope.spawn(|| client.call(2, &b"ping"[..], Duration::from_secs(10))))
                .collect();
            let deadline = Instant::now() + Duration::from_secs(5);
            while client.pending.waiters.lock().len() < 32 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            assert_eq!(client.pending.waiters.lock().len(), 32);

            // The 33rd call wraps onto transfer-ID 0, which is still outstanding.
            assert!(matches!(
                client.call(2, &b"ping"[..], Duration::from_secs(1)),
                Err(SessionError::TransferIdInUse {
                    server: 2,
                    transfer_id: 0
                })
            ));
            assert_eq!(client.pending.waiters.lock().len(), 32);

            client.close();
            for call in calls {
                assert!(matches!(call.join().unwrap(), Err(SessionError::Cancelled)));
            }
        });
    }

    #[test]
    fn test_close_cancels_outstanding_call() {
        let bus = VirtualCanBus::new();
        let a = node(&bus, 1);
        let client = a.make_client(9).unwrap();

        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(100));
                client.close();
            });
            assert!(matches!(
                client.call(2, &b"ping"[..], Duration::from_secs(5)),
                Err(SessionError::Cancelled)
            ));
        });
        assert!(matches!(
            client.call(2, &b"ping"[..], Duration::from_secs(1)),
            Err(SessionError::Closed)
        ));
    }
}
