use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use busprims_frame::Transfer;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, SessionError};
use crate::node::NodeInner;
use crate::tracker::TransferIdTracker;

/// Receives messages on one subject.
///
/// Transfers that are not newer than the last one accepted from the same
/// source are dropped here; see [`TransferIdTracker`].
#[derive(Debug)]
pub struct Subscriber {
    node: Arc<NodeInner>,
    subject_id: u16,
    rx: Receiver<Transfer>,
    tracker: Mutex<TransferIdTracker>,
    rejected: AtomicU64,
    closed: AtomicBool,
}

impl Subscriber {
    pub(crate) fn new(node: Arc<NodeInner>, subject_id: u16, rx: Receiver<Transfer>) -> Self {
        let config = node.config();
        let tracker = TransferIdTracker::new(
            node.transfer_id_modulo(),
            config.max_tracked_sources,
            config.source_idle_timeout,
        );
        Self {
            node,
            subject_id,
            rx,
            tracker: Mutex::new(tracker),
            rejected: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn subject_id(&self) -> u16 {
        self.subject_id
    }

    /// Wait up to `timeout` for the next accepted message.
    ///
    /// Returns [`SessionError::Cancelled`] if the subscriber or its node is
    /// closed while waiting.
    pub fn receive(&self, timeout: Duration) -> Result<Option<Transfer>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let transfer = match self.rx.recv_timeout(remaining) {
                Ok(transfer) => transfer,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(SessionError::Cancelled),
            };
            if self
                .tracker
                .lock()
                .accept(transfer.source_node_id, transfer.transfer_id, Instant::now())
            {
                return Ok(Some(transfer));
            }
            self.rejected.fetch_add(1, Ordering::Relaxed);
            trace!(
                subject_id = self.subject_id,
                source = ?transfer.source_node_id,
                transfer_id = transfer.transfer_id,
                "stale transfer dropped"
            );
        }
    }

    /// Transfers dropped as stale or repeated.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Release the subject and wake blocked receivers. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.node.release_subscriber(self.subject_id);
            debug!(subject_id = self.subject_id, "subscriber closed");
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use busprims_frame::{RedundancyConfig, RedundantTransport};
    use busprims_transport::can::{CanTransport, VirtualCanBus};
    use busprims_transport::{DataSpecifier, Priority, Transport};
    use bytes::Bytes;

    use super::*;
    use crate::{Node, NodeConfig};

    fn can(bus: &VirtualCanBus, id: u16) -> Arc<dyn Transport> {
        Arc::new(CanTransport::new(bus.attach(), Some(id)).unwrap())
    }

    fn message(transfer_id: u64) -> Transfer {
        Transfer {
            timestamp: Instant::now(),
            priority: Priority::Nominal,
            data_specifier: DataSpecifier::Message { subject_id: 50 },
            source_node_id: Some(5),
            destination_node_id: None,
            transfer_id,
            payload: Bytes::from(vec![transfer_id as u8]),
        }
    }

    #[test]
    fn test_stale_transfer_rejected() {
        let bus = VirtualCanBus::new();
        let raw = RedundantTransport::new(vec![can(&bus, 5)], RedundancyConfig::default()).unwrap();
        // Without link-level suppression the subscriber sees every copy.
        let mut config = NodeConfig::default();
        config.redundancy.dedup_window = Duration::ZERO;
        let node = Node::new(vec![can(&bus, 2)], config).unwrap();
        let subscriber = node.make_subscriber(50).unwrap();

        let deadline = || Instant::now() + Duration::from_secs(1);
        for tid in [5, 4, 5, 6] {
            raw.send(&message(tid), deadline()).unwrap();
        }
        let mut received = Vec::new();
        while let Some(transfer) = subscriber.receive(Duration::from_millis(300)).unwrap() {
            received.push(transfer.transfer_id);
        }
        assert_eq!(received, vec![5, 6]);
        assert_eq!(subscriber.rejected(), 2);
    }

    #[test]
    fn test_receive_after_close_fails() {
        let bus = VirtualCanBus::new();
        let node = Node::new(vec![can(&bus, 2)], NodeConfig::default()).unwrap();
        let subscriber = node.make_subscriber(50).unwrap();
        assert!(subscriber.receive(Duration::from_millis(10)).unwrap().is_none());
        subscriber.close();
        assert!(matches!(
            subscriber.receive(Duration::from_millis(10)),
            Err(SessionError::Closed)
        ));
    }
}
