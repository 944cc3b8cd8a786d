use std::time::Instant;

use bytes::Bytes;
use busprims_transport::{DataSpecifier, Frame, NodeId, Priority, TransportError};

/// One logical message, request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Creation time on send; first-frame reception time on receive.
    pub timestamp: Instant,
    pub priority: Priority,
    pub data_specifier: DataSpecifier,
    pub source_node_id: Option<NodeId>,
    pub destination_node_id: Option<NodeId>,
    pub transfer_id: u64,
    pub payload: Bytes,
}

/// Identifies the stream of transfers a transfer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub source_node_id: Option<NodeId>,
    pub destination_node_id: Option<NodeId>,
    pub data_specifier: DataSpecifier,
}

impl SessionKey {
    pub fn of_frame(frame: &Frame) -> Self {
        Self {
            source_node_id: frame.source_node_id,
            destination_node_id: frame.destination_node_id,
            data_specifier: frame.data_specifier,
        }
    }
}

impl Transfer {
    /// Check identifier ranges and addressing.
    pub fn validate(&self) -> Result<(), TransportError> {
        self.data_specifier.validate()?;
        match self.data_specifier {
            DataSpecifier::Service { .. }
                if self.source_node_id.is_none() || self.destination_node_id.is_none() =>
            {
                Err(TransportError::InvalidFrame(
                    "service transfers require source and destination node-IDs".into(),
                ))
            }
            DataSpecifier::Message { .. } if self.destination_node_id.is_some() => Err(
                TransportError::InvalidFrame("message transfers cannot be addressed".into()),
            ),
            _ => Ok(()),
        }
    }

    pub fn session_key(&self) -> SessionKey {
        SessionKey {
            source_node_id: self.source_node_id,
            destination_node_id: self.destination_node_id,
            data_specifier: self.data_specifier,
        }
    }

    pub(crate) fn from_single_frame(frame: Frame) -> Self {
        Self {
            timestamp: frame.timestamp,
            priority: frame.priority,
            data_specifier: frame.data_specifier,
            source_node_id: frame.source_node_id,
            destination_node_id: frame.destination_node_id,
            transfer_id: frame.transfer_id,
            payload: frame.payload,
        }
    }
}
