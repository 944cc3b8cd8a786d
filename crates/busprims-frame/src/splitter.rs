use bytes::{BufMut, BytesMut};
use busprims_transport::crc::Crc16;
use busprims_transport::frame::TOGGLE_INITIAL;
use busprims_transport::{Frame, TransportError};

use crate::error::{FrameError, Result};
use crate::transfer::Transfer;

/// Bytes appended to multi-frame payloads.
pub const TRANSFER_CRC_SIZE: usize = Crc16::SIZE;

/// Split `transfer` into frames of at most `payload_capacity` bytes.
///
/// A payload that fits one frame is sent as-is. Longer payloads get the
/// CRC-16 of the payload appended (little-endian) and are cut into
/// `payload_capacity`-sized chunks; the toggle alternates starting at `true`
/// and only the last frame carries end-of-transfer.
pub fn split_transfer(transfer: &Transfer, payload_capacity: usize) -> Result<Vec<Frame>> {
    if payload_capacity == 0 {
        return Err(TransportError::InvalidConfiguration(
            "frame payload capacity must be non-zero".into(),
        )
        .into());
    }
    transfer.validate()?;

    let frame = |index: usize, end_of_transfer: bool, payload| Frame {
        timestamp: transfer.timestamp,
        priority: transfer.priority,
        data_specifier: transfer.data_specifier,
        source_node_id: transfer.source_node_id,
        destination_node_id: transfer.destination_node_id,
        transfer_id: transfer.transfer_id,
        index: index as u32,
        end_of_transfer,
        toggle: (index % 2 == 0) == TOGGLE_INITIAL,
        payload,
    };

    if transfer.payload.len() <= payload_capacity {
        return Ok(vec![frame(0, true, transfer.payload.clone())]);
    }
    if transfer.source_node_id.is_none() {
        return Err(FrameError::AnonymousMultiFrame);
    }

    let mut image = BytesMut::with_capacity(transfer.payload.len() + TRANSFER_CRC_SIZE);
    image.extend_from_slice(&transfer.payload);
    image.put_u16_le(Crc16::compute(&transfer.payload));
    let image = image.freeze();

    let count = image.len().div_ceil(payload_capacity);
    Ok((0..count)
        .map(|i| {
            let start = i * payload_capacity;
            let end = (start + payload_capacity).min(image.len());
            frame(i, i + 1 == count, image.slice(start..end))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use busprims_transport::{DataSpecifier, Priority};
    use std::time::Instant;

    fn transfer(payload: Vec<u8>) -> Transfer {
        Transfer {
            timestamp: Instant::now(),
            priority: Priority::Nominal,
            data_specifier: DataSpecifier::message(4321).unwrap(),
            source_node_id: Some(42),
            destination_node_id: None,
            transfer_id: 17,
            payload: payload.into(),
        }
    }

    #[test]
    fn test_single_frame_has_no_crc() {
        let frames = split_transfer(&transfer(vec![1, 2, 3, 4, 5, 6, 7]), 7).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].end_of_transfer);
        assert!(frames[0].toggle);
        assert_eq!(frames[0].payload.as_ref(), &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_two_hundred_bytes_over_seven_byte_frames() {
        let payload: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        let frames = split_transfer(&transfer(payload.clone()), 7).unwrap();
        assert_eq!(frames.len(), 29);

        for (i, f) in frames.iter().enumerate() {
            assert_eq!(f.index as usize, i);
            assert_eq!(f.toggle, i % 2 == 0);
            assert_eq!(f.end_of_transfer, i == 28);
            assert_eq!(f.transfer_id, 17);
        }
        assert!(frames[..28].iter().all(|f| f.payload.len() == 7));
        assert_eq!(frames[28].payload.len(), 202 - 28 * 7);

        let joined: Vec<u8> = frames.iter().flat_map(|f| f.payload.to_vec()).collect();
        assert_eq!(&joined[..200], &payload[..]);
        let crc = Crc16::compute(&payload);
        assert_eq!(&joined[200..], &crc.to_le_bytes());
    }

    #[test]
    fn test_deterministic() {
        let t = transfer(vec![9u8; 50]);
        assert_eq!(split_transfer(&t, 8).unwrap(), split_transfer(&t, 8).unwrap());
    }

    #[test]
    fn test_anonymous_multi_frame_rejected() {
        let mut t = transfer(vec![0u8; 20]);
        t.source_node_id = None;
        assert!(matches!(
            split_transfer(&t, 7),
            Err(FrameError::AnonymousMultiFrame)
        ));
        t.payload = vec![0u8; 7].into();
        assert_eq!(split_transfer(&t, 7).unwrap().len(), 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(split_transfer(&transfer(vec![]), 0).is_err());
    }
}
