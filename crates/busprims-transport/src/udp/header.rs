use bytes::{Buf, BufMut};

use crate::crc::Crc16;
use crate::error::{Result, TransportError};
use crate::types::{DataSpecifier, NodeId, Priority, ServiceRole};

/// Header size: 22 bytes of fields + CRC-16.
pub const HEADER_SIZE: usize = 24;

const VERSION: u8 = 1;
const NO_NODE: u16 = 0xFFFF;
const EOT_FLAG: u32 = 1 << 31;
const INDEX_MASK: u32 = 0x7FFF_FFFF;
const SERVICE_FLAG: u16 = 1 << 15;
const RESPONSE_FLAG: u16 = 1 << 14;
const SERVICE_ID_FIELD: u16 = 0x3FFF;

/// Datagram header.
///
/// ```text
/// ┌─────┬──────┬─────┬─────┬──────────┬──────────┬───────────┬──────────┬─────────┐
/// │ ver │ prio │ src │ dst │ data spec│ transfer │ index|EOT │ reserved │ hdr CRC │
/// │ 1B  │ 1B   │ 2B  │ 2B  │ 2B       │ 8B       │ 4B        │ 2B (0)   │ 2B      │
/// └─────┴──────┴─────┴─────┴──────────┴──────────┴───────────┴──────────┴─────────┘
/// ```
/// Little-endian; node-ID 0xFFFF means none. The CRC covers the first 22 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub priority: Priority,
    pub source_node_id: Option<NodeId>,
    pub destination_node_id: Option<NodeId>,
    pub data_specifier: DataSpecifier,
    pub transfer_id: u64,
    pub index: u32,
    pub end_of_transfer: bool,
}

impl DatagramHeader {
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.index > INDEX_MASK {
            return Err(TransportError::InvalidFrame(format!(
                "frame index {} exceeds {INDEX_MASK}",
                self.index
            )));
        }
        let data_spec = match self.data_specifier {
            DataSpecifier::Message { subject_id } => subject_id,
            DataSpecifier::Service { service_id, role } => {
                SERVICE_FLAG
                    | if role == ServiceRole::Response {
                        RESPONSE_FLAG
                    } else {
                        0
                    }
                    | service_id
            }
        };

        let mut raw = [0u8; HEADER_SIZE];
        {
            let mut h = &mut raw[..];
            h.put_u8(VERSION);
            h.put_u8(self.priority.into());
            h.put_u16_le(self.source_node_id.unwrap_or(NO_NODE));
            h.put_u16_le(self.destination_node_id.unwrap_or(NO_NODE));
            h.put_u16_le(data_spec);
            h.put_u64_le(self.transfer_id);
            h.put_u32_le(self.index | if self.end_of_transfer { EOT_FLAG } else { 0 });
            h.put_u16_le(0);
        }
        let crc = Crc16::compute(&raw[..HEADER_SIZE - Crc16::SIZE]);
        raw[HEADER_SIZE - Crc16::SIZE..].copy_from_slice(&crc.to_le_bytes());
        dst.put_slice(&raw);
        Ok(())
    }

    /// Parse a header; `None` on short input, CRC failure or bad fields.
    pub fn decode(src: &[u8]) -> Option<Self> {
        if src.len() < HEADER_SIZE || !Crc16::verify_trailing(&src[..HEADER_SIZE]) {
            return None;
        }
        let mut h = &src[..HEADER_SIZE - Crc16::SIZE];
        if h.get_u8() != VERSION {
            return None;
        }
        let priority = Priority::try_from(h.get_u8()).ok()?;
        let source = h.get_u16_le();
        let destination = h.get_u16_le();
        let data_spec = h.get_u16_le();
        let transfer_id = h.get_u64_le();
        let index_eot = h.get_u32_le();

        let data_specifier = if data_spec & SERVICE_FLAG == 0 {
            DataSpecifier::message(data_spec).ok()?
        } else if data_spec & RESPONSE_FLAG != 0 {
            DataSpecifier::response(data_spec & SERVICE_ID_FIELD).ok()?
        } else {
            DataSpecifier::request(data_spec & SERVICE_ID_FIELD).ok()?
        };

        Some(Self {
            priority,
            source_node_id: (source != NO_NODE).then_some(source),
            destination_node_id: (destination != NO_NODE).then_some(destination),
            data_specifier,
            transfer_id,
            index: index_eot & INDEX_MASK,
            end_of_transfer: index_eot & EOT_FLAG != 0,
        })
    }
}
