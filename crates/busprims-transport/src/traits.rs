use std::fmt;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::frame::Frame;
use crate::stats::StatisticsSnapshot;
use crate::types::{NodeId, TransferIdModulo};

/// Static properties of a medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParameters {
    pub transfer_id_modulo: TransferIdModulo,
    /// Number of addressable nodes (highest node-ID + 1).
    pub max_nodes: u32,
    /// Frame capacity in bytes, including per-frame overhead.
    pub mtu: usize,
}

/// A frame-level link over one physical medium.
///
/// Implementations deliver frames sent on one instance in order, never block
/// past the caller's deadline or timeout, and may be shared across threads:
/// one thread polls while others send.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Emit one frame, giving up with `MediaUnavailable` at `deadline`.
    fn send(&self, frame: &Frame, deadline: Instant) -> Result<()>;

    /// Emit every frame of one transfer in order.
    ///
    /// Media that repeat transfers for robustness override this.
    fn send_transfer(&self, frames: &[Frame], deadline: Instant) -> Result<()> {
        for frame in frames {
            self.send(frame, deadline)?;
        }
        Ok(())
    }

    /// Wait up to `timeout` for the next valid frame.
    fn poll(&self, timeout: Duration) -> Result<Option<Frame>>;

    /// Frame capacity in bytes.
    fn max_frame_payload_size(&self) -> usize;

    /// Bytes of each frame's capacity consumed by per-frame addressing.
    fn frame_overhead(&self) -> usize {
        0
    }

    /// Transfer payload bytes that fit in one frame.
    fn transfer_payload_capacity(&self) -> usize {
        self.max_frame_payload_size()
            .saturating_sub(self.frame_overhead())
    }

    fn protocol_parameters(&self) -> ProtocolParameters;

    /// `None` when the node is anonymous on this medium.
    fn local_node_id(&self) -> Option<NodeId>;

    fn statistics(&self) -> StatisticsSnapshot;

    /// Stop the transport; later calls fail with `Closed`.
    fn close(&self);

    /// Human-readable name for logs.
    fn descriptor(&self) -> String;
}
