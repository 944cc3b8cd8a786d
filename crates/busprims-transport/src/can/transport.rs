use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::id::{pseudo_node_id, CanId, TailByte, MAX_NODE_ID};
use super::media::{CanFrame, CanMedia};
use super::{FRAME_CAPACITY, TAIL_SIZE};
use crate::error::{Result, TransportError};
use crate::frame::Frame;
use crate::stats::{StatisticsSnapshot, TransportStatistics};
use crate::traits::{ProtocolParameters, Transport};
use crate::types::{DataSpecifier, NodeId, TransferIdModulo};

/// Upper bound on concurrently tracked multi-frame transfers.
const MAX_TRACKED_TRANSFERS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RxKey {
    source: NodeId,
    destination: Option<NodeId>,
    data_specifier: DataSpecifier,
}

#[derive(Debug)]
struct RxProgress {
    transfer_id: u8,
    next_index: u32,
}

/// CAN transport over a [`CanMedia`] driver.
///
/// CAN frames carry no index, only start/end flags and a toggle bit. The
/// receive path restores indices by counting frames since the last start of
/// each transfer; continuation frames without a start are rejected.
#[derive(Debug)]
pub struct CanTransport<M: CanMedia> {
    media: M,
    local_node_id: Option<NodeId>,
    progress: Mutex<HashMap<RxKey, RxProgress>>,
    stats: TransportStatistics,
    closed: AtomicBool,
}

impl<M: CanMedia> CanTransport<M> {
    /// Wrap a driver. `local_node_id = None` makes the node anonymous.
    pub fn new(media: M, local_node_id: Option<NodeId>) -> Result<Self> {
        if let Some(id) = local_node_id {
            if id > MAX_NODE_ID {
                return Err(TransportError::InvalidConfiguration(format!(
                    "CAN node-ID {id} exceeds {MAX_NODE_ID}"
                )));
            }
        }
        if media.mtu() != FRAME_CAPACITY {
            return Err(TransportError::InvalidConfiguration(format!(
                "only classic CAN is supported (MTU {FRAME_CAPACITY}, driver reports {})",
                media.mtu()
            )));
        }
        debug!(media = %media.name(), ?local_node_id, "CAN transport created");
        Ok(Self {
            media,
            local_node_id,
            progress: Mutex::new(HashMap::new()),
            stats: TransportStatistics::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    fn encode(&self, frame: &Frame) -> Result<CanFrame> {
        frame.validate()?;
        frame.validate_node_ids(MAX_NODE_ID)?;
        let capacity = FRAME_CAPACITY - TAIL_SIZE;
        if frame.payload.len() > capacity {
            return Err(TransportError::CapacityExceeded {
                size: frame.payload.len(),
                max: capacity,
            });
        }

        let id = CanId {
            priority: frame.priority,
            data_specifier: frame.data_specifier,
            source: frame
                .source_node_id
                .unwrap_or_else(|| pseudo_node_id(&frame.payload)),
            anonymous: frame.source_node_id.is_none(),
            destination: frame.destination_node_id,
        }
        .encode()?;
        let tail = TailByte {
            start_of_transfer: frame.index == 0,
            end_of_transfer: frame.end_of_transfer,
            toggle: frame.toggle,
            transfer_id: TransferIdModulo::CAN.wrap(frame.transfer_id) as u8,
        };

        let mut data = BytesMut::with_capacity(frame.payload.len() + TAIL_SIZE);
        data.extend_from_slice(&frame.payload);
        data.extend_from_slice(&[tail.encode()]);
        Ok(CanFrame {
            id,
            data: data.freeze(),
            timestamp: frame.timestamp,
        })
    }

    fn decode(&self, can: CanFrame) -> Option<Frame> {
        let Some((&tail_byte, _)) = can.data.split_last() else {
            trace!(id = can.id, "empty CAN frame");
            return None;
        };
        let id = match CanId::decode(can.id) {
            Ok(id) => id,
            Err(err) => {
                trace!(id = can.id, %err, "foreign CAN identifier");
                return None;
            }
        };
        let tail = TailByte::decode(tail_byte);
        let payload = can.data.slice(..can.data.len() - TAIL_SIZE);

        if id.anonymous && !(tail.start_of_transfer && tail.end_of_transfer) {
            trace!(id = can.id, "anonymous multi-frame transfer");
            return None;
        }

        let key = RxKey {
            source: id.source,
            destination: id.destination,
            data_specifier: id.data_specifier,
        };
        let index = {
            let mut progress = self.progress.lock();
            if tail.start_of_transfer {
                if tail.end_of_transfer {
                    progress.remove(&key);
                } else {
                    if progress.len() >= MAX_TRACKED_TRANSFERS && !progress.contains_key(&key) {
                        warn!(
                            tracked = progress.len(),
                            "too many multi-frame transfers in flight, resetting index tracking"
                        );
                        progress.clear();
                    }
                    progress.insert(
                        key,
                        RxProgress {
                            transfer_id: tail.transfer_id,
                            next_index: 1,
                        },
                    );
                }
                0
            } else {
                match progress.get_mut(&key) {
                    Some(p) if p.transfer_id == tail.transfer_id => {
                        let index = p.next_index;
                        p.next_index += 1;
                        if tail.end_of_transfer {
                            progress.remove(&key);
                        }
                        index
                    }
                    _ => {
                        trace!(
                            id = can.id,
                            transfer_id = tail.transfer_id,
                            "continuation frame without start"
                        );
                        return None;
                    }
                }
            }
        };

        Some(Frame {
            timestamp: can.timestamp,
            priority: id.priority,
            data_specifier: id.data_specifier,
            source_node_id: (!id.anonymous).then_some(id.source),
            destination_node_id: id.destination,
            transfer_id: tail.transfer_id as u64,
            index,
            end_of_transfer: tail.end_of_transfer,
            toggle: tail.toggle,
            payload,
        })
    }
}

impl<M: CanMedia> Transport for CanTransport<M> {
    fn send(&self, frame: &Frame, deadline: Instant) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let can = self.encode(frame)?;
        match self.media.send(&can, deadline) {
            Ok(()) => {
                self.stats.record_out(can.data.len());
                Ok(())
            }
            Err(err) => {
                self.stats.record_out_error();
                Err(err)
            }
        }
    }

    fn poll(&self, timeout: Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(can) = self.media.receive(remaining)? else {
                return Ok(None);
            };
            let size = can.data.len();
            match self.decode(can) {
                Some(frame) => {
                    self.stats.record_in(size);
                    return Ok(Some(frame));
                }
                None => {
                    self.stats.record_rejected();
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn max_frame_payload_size(&self) -> usize {
        FRAME_CAPACITY
    }

    fn frame_overhead(&self) -> usize {
        TAIL_SIZE
    }

    fn protocol_parameters(&self) -> ProtocolParameters {
        ProtocolParameters {
            transfer_id_modulo: TransferIdModulo::CAN,
            max_nodes: MAX_NODE_ID as u32 + 1,
            mtu: FRAME_CAPACITY,
        }
    }

    fn local_node_id(&self) -> Option<NodeId> {
        self.local_node_id
    }

    fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.media.close();
            debug!(media = %self.media.name(), "CAN transport closed");
        }
    }

    fn descriptor(&self) -> String {
        format!("can:{}", self.media.name())
    }
}
