use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use busprims_frame::Transfer;
use busprims_transport::{DataSpecifier, Priority};
use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{Result, SessionError};
use crate::node::NodeInner;

/// Sends messages on one subject.
///
/// Each publish takes the next transfer-ID, wrapping at the link's modulus.
#[derive(Debug)]
pub struct Publisher {
    node: Arc<NodeInner>,
    subject_id: u16,
    priority: AtomicU8,
    next_transfer_id: AtomicU64,
    closed: AtomicBool,
}

impl Publisher {
    pub(crate) fn new(node: Arc<NodeInner>, subject_id: u16) -> Self {
        let priority = node.config().priority;
        Self {
            node,
            subject_id,
            priority: AtomicU8::new(priority.into()),
            next_transfer_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn subject_id(&self) -> u16 {
        self.subject_id
    }

    pub fn priority(&self) -> Priority {
        Priority::try_from(self.priority.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn set_priority(&self, priority: Priority) {
        self.priority.store(priority.into(), Ordering::Relaxed);
    }

    /// Transfer-ID the next publish will use.
    pub fn next_transfer_id(&self) -> u64 {
        self.next_transfer_id.load(Ordering::SeqCst)
    }

    /// Publish with the node's send timeout.
    pub fn publish(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.publish_within(payload, self.node.config().send_timeout)
    }

    pub fn publish_within(&self, payload: impl Into<Bytes>, timeout: Duration) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
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
            data_specifier: DataSpecifier::Message {
                subject_id: self.subject_id,
            },
            source_node_id: self.node.local_node_id(),
            destination_node_id: None,
            transfer_id,
            payload: payload.into(),
        };
        self.node.send(&transfer, Instant::now() + timeout)?;
        trace!(
            subject_id = self.subject_id,
            transfer_id,
            size = transfer.payload.len(),
            "published"
        );
        Ok(())
    }

    /// Release the subject. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.node.release_publisher(self.subject_id);
            debug!(subject_id = self.subject_id, "publisher closed");
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.close();
    }
}
