use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use busprims_frame::Transfer;
use busprims_transport::{DataSpecifier, NodeId, ServiceRole};
use bytes::Bytes;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{Result, SessionError};
use crate::node::NodeInner;
use crate::tracker::TransferIdTracker;

/// Answers requests for one service addressed to the local node.
#[derive(Debug)]
pub struct ServiceServer {
    node: Arc<NodeInner>,
    service_id: u16,
    local_node_id: NodeId,
    rx: Receiver<Transfer>,
    tracker: Mutex<TransferIdTracker>,
    served: AtomicU64,
    closed: AtomicBool,
}

impl ServiceServer {
    pub(crate) fn new(
        node: Arc<NodeInner>,
        service_id: u16,
        local_node_id: NodeId,
        rx: Receiver<Transfer>,
    ) -> Self {
        let config = node.config();
        let tracker = TransferIdTracker::new(
            node.transfer_id_modulo(),
            config.max_tracked_sources,
            config.source_idle_timeout,
        );
        Self {
            node,
            service_id,
            local_node_id,
            rx,
            tracker: Mutex::new(tracker),
            served: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn service_id(&self) -> u16 {
        self.service_id
    }

    /// Requests answered so far.
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    /// Wait up to `timeout` for the next request. Repeated or stale
    /// transfer-IDs from the same client are dropped.
    pub fn receive_request(&self, timeout: Duration) -> Result<Option<Transfer>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let request = match self.rx.recv_deadline(deadline) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(SessionError::Cancelled),
            };
            if self
                .tracker
                .lock()
                .accept(request.source_node_id, request.transfer_id, Instant::now())
            {
                return Ok(Some(request));
            }
            trace!(
                service_id = self.service_id,
                client = ?request.source_node_id,
                transfer_id = request.transfer_id,
                "stale request dropped"
            );
        }
    }

    /// Send `payload` back to the originator of `request`.
    pub fn respond(&self, request: &Transfer, payload: impl Into<Bytes>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let response = Transfer {
            timestamp: Instant::now(),
            priority: request.priority,
            data_specifier: DataSpecifier::Service {
                service_id: self.service_id,
                role: ServiceRole::Response,
            },
            source_node_id: Some(self.local_node_id),
            destination_node_id: request.source_node_id,
            transfer_id: request.transfer_id,
            payload: payload.into(),
        };
        let deadline = Instant::now() + self.node.config().send_timeout;
        self.node.send(&response, deadline)?;
        self.served.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Receive one request and answer it with `handler`.
    ///
    /// A handler returning `None` leaves the request unanswered. Returns
    /// whether a request was handled.
    pub fn serve_once<F>(&self, timeout: Duration, handler: F) -> Result<bool>
    where
        F: FnOnce(&Transfer) -> Option<Bytes>,
    {
        let Some(request) = self.receive_request(timeout)? else {
            return Ok(false);
        };
        match handler(&request) {
            Some(payload) => {
                if let Err(err) = self.respond(&request, payload) {
                    warn!(
                        service_id = self.service_id,
                        client = ?request.source_node_id,
                        error = %err,
                        "response not sent"
                    );
                }
            }
            None => debug!(service_id = self.service_id, "request left unanswered"),
        }
        Ok(true)
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.node.config().redundancy.poll_interval
    }

    /// Serve until the server or its node is closed.
    pub fn serve<F>(&self, mut handler: F) -> Result<()>
    where
        F: FnMut(&Transfer) -> Option<Bytes>,
    {
        let poll = self.poll_interval();
        loop {
            match self.serve_once(poll, &mut handler) {
                Ok(_) => {}
                Err(SessionError::Cancelled | SessionError::Closed) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Release the service and wake a blocked receiver. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.node.release_server(self.service_id);
            debug!(service_id = self.service_id, "server closed");
        }
    }
}

impl Drop for ServiceServer {
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
    fn test_serve_until_closed() {
        let bus = VirtualCanBus::new();
        let (a, b) = (node(&bus, 1), node(&bus, 2));
        let client = a.make_client(12).unwrap();
        let server = b.make_server(12).unwrap();

        thread::scope(|scope| {
            let serving = scope.spawn(|| {
                server.serve(|request| {
                    let mut reply = request.payload.to_vec();
                    reply.reverse();
                    Some(Bytes::from(reply))
                })
            });
            for _ in 0..3 {
                let response = client.call(2, &b"abc"[..], Duration::from_secs(2)).unwrap();
                assert_eq!(&response.payload[..], b"cba");
            }
            server.close();
            serving.join().unwrap().unwrap();
        });
        assert_eq!(server.served(), 3);
    }

    #[test]
    fn test_unanswered_request() {
        let bus = VirtualCanBus::new();
        let (a, b) = (node(&bus, 1), node(&bus, 2));
        let client = a.make_client(12).unwrap();
        let server = b.make_server(12).unwrap();

        thread::scope(|scope| {
            scope.spawn(|| {
                assert!(server.serve_once(Duration::from_secs(2), |_| None).unwrap());
            });
            assert!(matches!(
                client.call(2, &b"x"[..], Duration::from_millis(300)),
                Err(SessionError::RequestTimedOut(_))
            ));
        });
        assert_eq!(server.served(), 0);
    }

    #[test]
    fn test_requests_for_other_nodes_ignored() {
        let bus = VirtualCanBus::new();
        let (a, b, _c) = (node(&bus, 1), node(&bus, 2), node(&bus, 3));
        let client = a.make_client(12).unwrap();
        let server = b.make_server(12).unwrap();

        assert!(matches!(
            client.call(3, &b"x"[..], Duration::from_millis(200)),
            Err(SessionError::RequestTimedOut(_))
        ));
        assert!(server
            .receive_request(Duration::from_millis(100))
            .unwrap()
            .is_none());
    }
}
