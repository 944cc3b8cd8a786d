use std::time::Instant;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{ESCAPE_PREFIX, FRAME_DELIMITER};
use crate::crc::Crc32c;
use crate::error::{Result, TransportError};
use crate::frame::Frame;
use crate::types::{DataSpecifier, NodeId, Priority, ServiceRole};

/// Header size including its CRC.
pub const HEADER_SIZE: usize = 32;

/// Unescaped bytes per frame besides the payload: header plus payload CRC.
pub const OVERHEAD: usize = HEADER_SIZE + Crc32c::SIZE;

pub const MAX_NODE_ID: NodeId = 4095;

/// Frame index occupies 31 bits; bit 31 is the end-of-transfer flag.
pub const INDEX_MASK: u32 = 0x7FFF_FFFF;

const VERSION: u8 = 0;
const NO_NODE: u16 = 0xFFFF;
const EOT_FLAG: u32 = 1 << 31;
const SERVICE_FLAG: u16 = 1 << 15;
const RESPONSE_FLAG: u16 = 1 << 14;
const SERVICE_ID_FIELD: u16 = 0x3FFF;

/// Encode `frame` with delimiters at both ends and escaping applied.
///
/// Wire format (before escaping):
/// ```text
/// ┌─────┬──────┬─────┬─────┬──────────┬────────┬──────────┬───────────┬────────┐
/// │ ver │ prio │ src │ dst │ data spec│ dt hash│ transfer │ index|EOT │ hdr CRC│
/// │ 1B  │ 1B   │ 2B  │ 2B  │ 2B       │ 8B (0) │ 8B       │ 4B        │ 4B     │
/// └─────┴──────┴─────┴─────┴──────────┴────────┴──────────┴───────────┴────────┘
///   payload ... │ payload CRC-32C (4B)
/// ```
/// All integers little-endian.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    frame.validate()?;
    frame.validate_node_ids(MAX_NODE_ID)?;
    if frame.index > INDEX_MASK {
        return Err(TransportError::InvalidFrame(format!(
            "frame index {} exceeds {INDEX_MASK}",
            frame.index
        )));
    }

    let data_spec = match frame.data_specifier {
        DataSpecifier::Message { subject_id } => subject_id,
        DataSpecifier::Service { service_id, role } => {
            let response = if role == ServiceRole::Response {
                RESPONSE_FLAG
            } else {
                0
            };
            SERVICE_FLAG | response | service_id
        }
    };
    let index_eot = frame.index | if frame.end_of_transfer { EOT_FLAG } else { 0 };

    let mut header = [0u8; HEADER_SIZE];
    {
        let mut h = &mut header[..];
        h.put_u8(VERSION);
        h.put_u8(frame.priority.into());
        h.put_u16_le(frame.source_node_id.unwrap_or(NO_NODE));
        h.put_u16_le(frame.destination_node_id.unwrap_or(NO_NODE));
        h.put_u16_le(data_spec);
        h.put_u64_le(0);
        h.put_u64_le(frame.transfer_id);
        h.put_u32_le(index_eot);
    }
    let header_crc = Crc32c::compute(&header[..HEADER_SIZE - Crc32c::SIZE]);
    header[HEADER_SIZE - Crc32c::SIZE..].copy_from_slice(&header_crc.to_le_bytes());
    let payload_crc = Crc32c::compute(&frame.payload).to_le_bytes();

    // Worst case every byte is escaped.
    dst.reserve(2 + 2 * (OVERHEAD + frame.payload.len()));
    dst.put_u8(FRAME_DELIMITER);
    escape_into(&header, dst);
    escape_into(&frame.payload, dst);
    escape_into(&payload_crc, dst);
    dst.put_u8(FRAME_DELIMITER);
    Ok(())
}

fn escape_into(src: &[u8], dst: &mut BytesMut) {
    for &b in src {
        if b == FRAME_DELIMITER || b == ESCAPE_PREFIX {
            dst.put_u8(ESCAPE_PREFIX);
            dst.put_u8(b ^ 0xFF);
        } else {
            dst.put_u8(b);
        }
    }
}

/// Parse the unescaped bytes found between two delimiters.
///
/// Returns `None` for anything that is not a valid frame: short images, CRC
/// failures, unknown versions, or fields out of range.
pub fn parse_unescaped_image(image: &[u8], timestamp: Instant) -> Option<Frame> {
    if image.len() < OVERHEAD {
        return None;
    }
    let (header, payload_with_crc) = image.split_at(HEADER_SIZE);
    if !Crc32c::verify_trailing(header) || !Crc32c::verify_trailing(payload_with_crc) {
        return None;
    }
    let payload = &payload_with_crc[..payload_with_crc.len() - Crc32c::SIZE];

    let mut h = &header[..HEADER_SIZE - Crc32c::SIZE];
    if h.get_u8() != VERSION {
        return None;
    }
    let priority = Priority::try_from(h.get_u8()).ok()?;
    let source = h.get_u16_le();
    let destination = h.get_u16_le();
    let data_spec = h.get_u16_le();
    let _data_type_hash = h.get_u64_le();
    let transfer_id = h.get_u64_le();
    let index_eot = h.get_u32_le();

    let data_specifier = if data_spec & SERVICE_FLAG == 0 {
        DataSpecifier::message(data_spec).ok()?
    } else if data_spec & RESPONSE_FLAG != 0 {
        DataSpecifier::response(data_spec & SERVICE_ID_FIELD).ok()?
    } else {
        DataSpecifier::request(data_spec & SERVICE_ID_FIELD).ok()?
    };
    let index = index_eot & INDEX_MASK;

    let frame = Frame {
        timestamp,
        priority,
        data_specifier,
        source_node_id: (source != NO_NODE).then_some(source),
        destination_node_id: (destination != NO_NODE).then_some(destination),
        transfer_id,
        index,
        end_of_transfer: index_eot & EOT_FLAG != 0,
        // The toggle is implied by the index parity.
        toggle: index % 2 == 0,
        payload: Bytes::copy_from_slice(payload),
    };
    frame.validate().ok()?;
    frame.validate_node_ids(MAX_NODE_ID).ok()?;
    Some(frame)
}
