use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::FRAME_CAPACITY;
use crate::error::{Result, TransportError};

/// A raw CAN frame as seen by a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// 29-bit extended identifier.
    pub id: u32,
    pub data: Bytes,
    pub timestamp: Instant,
}

/// Driver contract for a CAN controller.
///
/// `send` must not block past `deadline`; `receive` must not block past
/// `timeout`. Frames accepted by `send` are transmitted in order.
pub trait CanMedia: Send + Sync + fmt::Debug {
    fn send(&self, frame: &CanFrame, deadline: Instant) -> Result<()>;

    fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>>;

    /// Maximum data field length.
    fn mtu(&self) -> usize {
        FRAME_CAPACITY
    }

    fn close(&self);

    fn name(&self) -> String;
}

/// Default per-interface receive queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// In-memory CAN bus shared by any number of [`VirtualCanInterface`]s.
///
/// Every frame sent by one interface is delivered to every other online
/// interface. A full receive queue drops the frame, like a controller overrun.
#[derive(Debug, Clone, Default)]
pub struct VirtualCanBus {
    inner: Arc<BusInner>,
}

#[derive(Debug, Default)]
struct BusInner {
    ports: RwLock<Vec<Port>>,
    next_port: AtomicUsize,
}

#[derive(Debug)]
struct Port {
    id: usize,
    tx: Sender<CanFrame>,
    online: Arc<AtomicBool>,
}

impl VirtualCanBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new interface with the default queue depth.
    pub fn attach(&self) -> VirtualCanInterface {
        self.attach_with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn attach_with_capacity(&self, queue_capacity: usize) -> VirtualCanInterface {
        let id = self.inner.next_port.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::bounded(queue_capacity.max(1));
        let online = Arc::new(AtomicBool::new(true));
        self.inner.ports.write().push(Port {
            id,
            tx,
            online: Arc::clone(&online),
        });
        debug!(port = id, "virtual CAN interface attached");
        VirtualCanInterface {
            id,
            bus: Arc::clone(&self.inner),
            rx,
            online,
            closed: AtomicBool::new(false),
        }
    }

    pub fn interface_count(&self) -> usize {
        self.inner.ports.read().len()
    }
}

/// One controller on a [`VirtualCanBus`].
#[derive(Debug)]
pub struct VirtualCanInterface {
    id: usize,
    bus: Arc<BusInner>,
    rx: Receiver<CanFrame>,
    online: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl VirtualCanInterface {
    /// Bring the interface up or down. A down interface neither sends nor
    /// receives; frames addressed to it while down are lost.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        debug!(port = self.id, online, "virtual CAN interface state changed");
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn detach(&self) {
        self.bus.ports.write().retain(|p| p.id != self.id);
    }
}

impl CanMedia for VirtualCanInterface {
    fn send(&self, frame: &CanFrame, deadline: Instant) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.is_online() {
            return Err(TransportError::MediaUnavailable(format!(
                "vcan{} is down",
                self.id
            )));
        }
        if Instant::now() >= deadline {
            return Err(TransportError::MediaUnavailable(
                "send deadline expired".into(),
            ));
        }
        if frame.data.len() > FRAME_CAPACITY {
            return Err(TransportError::CapacityExceeded {
                size: frame.data.len(),
                max: FRAME_CAPACITY,
            });
        }

        for port in self.bus.ports.read().iter() {
            if port.id == self.id || !port.online.load(Ordering::SeqCst) {
                continue;
            }
            match port.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!(from = self.id, to = port.id, "receive queue full, frame lost");
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.detach();
            debug!(port = self.id, "virtual CAN interface closed");
        }
    }

    fn name(&self) -> String {
        format!("vcan{}", self.id)
    }
}

impl Drop for VirtualCanInterface {
    fn drop(&mut self) {
        self.detach();
    }
}
