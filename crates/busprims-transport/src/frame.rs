use std::time::Instant;

use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::types::{DataSpecifier, NodeId, Priority};

/// Toggle value of the first frame of every transfer.
pub const TOGGLE_INITIAL: bool = true;

/// One medium-level packet carrying part or all of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Monotonic reception (or creation) time.
    pub timestamp: Instant,
    pub priority: Priority,
    pub data_specifier: DataSpecifier,
    /// `None` for anonymous message transfers.
    pub source_node_id: Option<NodeId>,
    /// Set for service transfers only.
    pub destination_node_id: Option<NodeId>,
    pub transfer_id: u64,
    /// Ordinal of this frame within its transfer, starting at 0.
    pub index: u32,
    pub end_of_transfer: bool,
    pub toggle: bool,
    pub payload: Bytes,
}

impl Frame {
    /// Single-frame transfer with the first-frame toggle.
    pub fn single(
        priority: Priority,
        data_specifier: DataSpecifier,
        source_node_id: Option<NodeId>,
        destination_node_id: Option<NodeId>,
        transfer_id: u64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            timestamp: Instant::now(),
            priority,
            data_specifier,
            source_node_id,
            destination_node_id,
            transfer_id,
            index: 0,
            end_of_transfer: true,
            toggle: TOGGLE_INITIAL,
            payload: payload.into(),
        }
    }

    pub fn start_of_transfer(&self) -> bool {
        self.index == 0
    }

    pub fn is_single_frame(&self) -> bool {
        self.index == 0 && self.end_of_transfer
    }

    /// Check the addressing rules shared by every medium.
    ///
    /// Service frames need both endpoints; message frames carry no destination;
    /// anonymous frames must be single-frame.
    pub fn validate(&self) -> Result<()> {
        self.data_specifier.validate()?;
        match self.data_specifier {
            DataSpecifier::Service { .. } => {
                if self.source_node_id.is_none() || self.destination_node_id.is_none() {
                    return Err(TransportError::InvalidFrame(
                        "service frames require source and destination node-IDs".into(),
                    ));
                }
            }
            DataSpecifier::Message { .. } => {
                if self.destination_node_id.is_some() {
                    return Err(TransportError::InvalidFrame(
                        "message frames cannot be addressed".into(),
                    ));
                }
                if self.source_node_id.is_none() && !self.is_single_frame() {
                    return Err(TransportError::InvalidFrame(
                        "anonymous frames must be single-frame".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Check node-IDs against a medium's upper bound.
    pub fn validate_node_ids(&self, max_node_id: NodeId) -> Result<()> {
        for id in [self.source_node_id, self.destination_node_id]
            .into_iter()
            .flatten()
        {
            if id > max_node_id {
                return Err(TransportError::InvalidFrame(format!(
                    "node-ID {id} exceeds {max_node_id}"
                )));
            }
        }
        Ok(())
    }
}
