use crate::crc::Crc16;
use crate::error::{Result, TransportError};
use crate::types::{DataSpecifier, NodeId, Priority, ServiceRole};

/// Highest node-ID addressable on CAN.
pub const MAX_NODE_ID: NodeId = 127;

/// Mask of the 29 identifier bits.
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

const PRIORITY_SHIFT: u32 = 26;
const SERVICE_FLAG: u32 = 1 << 25;
const ANONYMOUS_FLAG: u32 = 1 << 24;
const REQUEST_FLAG: u32 = 1 << 24;
const RESERVED_23: u32 = 1 << 23;
const RESERVED_7: u32 = 1 << 7;
/// Bits 21 and 22 of message identifiers are transmitted as ones.
const MESSAGE_FILL: u32 = 0b11 << 21;
const SUBJECT_SHIFT: u32 = 8;
const SUBJECT_MASK: u32 = 0x1FFF;
const SERVICE_SHIFT: u32 = 14;
const SERVICE_MASK: u32 = 0x1FF;
const DESTINATION_SHIFT: u32 = 7;
const NODE_MASK: u32 = 0x7F;

/// Decoded 29-bit CAN identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanId {
    pub priority: Priority,
    pub data_specifier: DataSpecifier,
    /// Node-ID field. Holds a pseudo-ID when `anonymous` is set.
    pub source: NodeId,
    pub anonymous: bool,
    /// Service transfers only.
    pub destination: Option<NodeId>,
}

impl CanId {
    pub fn encode(&self) -> Result<u32> {
        self.data_specifier.validate()?;
        if self.source > MAX_NODE_ID {
            return Err(TransportError::InvalidFrame(format!(
                "source node-ID {} exceeds {MAX_NODE_ID}",
                self.source
            )));
        }
        let mut raw = (u8::from(self.priority) as u32) << PRIORITY_SHIFT;
        raw |= self.source as u32;
        match self.data_specifier {
            DataSpecifier::Message { subject_id } => {
                if self.destination.is_some() {
                    return Err(TransportError::InvalidFrame(
                        "message frames cannot be addressed".into(),
                    ));
                }
                raw |= MESSAGE_FILL | ((subject_id as u32) << SUBJECT_SHIFT);
                if self.anonymous {
                    raw |= ANONYMOUS_FLAG;
                }
            }
            DataSpecifier::Service { service_id, role } => {
                if self.anonymous {
                    return Err(TransportError::InvalidFrame(
                        "service frames cannot be anonymous".into(),
                    ));
                }
                let destination = match self.destination {
                    Some(d) if d <= MAX_NODE_ID => d,
                    Some(d) => {
                        return Err(TransportError::InvalidFrame(format!(
                            "destination node-ID {d} exceeds {MAX_NODE_ID}"
                        )))
                    }
                    None => {
                        return Err(TransportError::InvalidFrame(
                            "service frames require a destination".into(),
                        ))
                    }
                };
                raw |= SERVICE_FLAG
                    | ((service_id as u32) << SERVICE_SHIFT)
                    | ((destination as u32) << DESTINATION_SHIFT);
                if role == ServiceRole::Request {
                    raw |= REQUEST_FLAG;
                }
            }
        }
        Ok(raw)
    }

    pub fn decode(raw: u32) -> Result<Self> {
        if raw & !EXTENDED_ID_MASK != 0 {
            return Err(TransportError::InvalidFrame(format!(
                "identifier {raw:#x} exceeds 29 bits"
            )));
        }
        if raw & RESERVED_23 != 0 {
            return Err(TransportError::InvalidFrame("reserved bit 23 set".into()));
        }
        let priority = Priority::try_from(((raw >> PRIORITY_SHIFT) & 0x7) as u8)?;
        let source = (raw & NODE_MASK) as NodeId;

        if raw & SERVICE_FLAG == 0 {
            if raw & RESERVED_7 != 0 {
                return Err(TransportError::InvalidFrame("reserved bit 7 set".into()));
            }
            let subject_id = ((raw >> SUBJECT_SHIFT) & SUBJECT_MASK) as u16;
            Ok(Self {
                priority,
                data_specifier: DataSpecifier::Message { subject_id },
                source,
                anonymous: raw & ANONYMOUS_FLAG != 0,
                destination: None,
            })
        } else {
            let service_id = ((raw >> SERVICE_SHIFT) & SERVICE_MASK) as u16;
            let role = if raw & REQUEST_FLAG != 0 {
                ServiceRole::Request
            } else {
                ServiceRole::Response
            };
            Ok(Self {
                priority,
                data_specifier: DataSpecifier::Service { service_id, role },
                source,
                anonymous: false,
                destination: Some(((raw >> DESTINATION_SHIFT) & NODE_MASK) as NodeId),
            })
        }
    }
}

/// The last byte of every CAN frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailByte {
    pub start_of_transfer: bool,
    pub end_of_transfer: bool,
    pub toggle: bool,
    /// Transfer-ID modulo 32.
    pub transfer_id: u8,
}

impl TailByte {
    pub fn encode(self) -> u8 {
        ((self.start_of_transfer as u8) << 7)
            | ((self.end_of_transfer as u8) << 6)
            | ((self.toggle as u8) << 5)
            | (self.transfer_id & 0x1F)
    }

    pub fn decode(byte: u8) -> Self {
        Self {
            start_of_transfer: byte & 0x80 != 0,
            end_of_transfer: byte & 0x40 != 0,
            toggle: byte & 0x20 != 0,
            transfer_id: byte & 0x1F,
        }
    }
}

/// Node-ID field value for anonymous frames, derived from the payload.
pub fn pseudo_node_id(payload: &[u8]) -> NodeId {
    Crc16::compute(payload) & MAX_NODE_ID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_layout() {
        let id = CanId {
            priority: Priority::Nominal,
            data_specifier: DataSpecifier::message(7509).unwrap(),
            source: 42,
            anonymous: false,
            destination: None,
        };
        // Heartbeat from node 42 at nominal priority.
        assert_eq!(id.encode().unwrap(), 0x107D_552A);
        assert_eq!(CanId::decode(0x107D_552A).unwrap(), id);
    }

    #[test]
    fn test_service_id_layout() {
        let id = CanId {
            priority: Priority::Nominal,
            data_specifier: DataSpecifier::request(430).unwrap(),
            source: 123,
            anonymous: false,
            destination: Some(42),
        };
        assert_eq!(id.encode().unwrap(), 0x136B_957B);
        assert_eq!(CanId::decode(0x136B_957B).unwrap(), id);

        let resp = CanId {
            data_specifier: DataSpecifier::response(430).unwrap(),
            source: 42,
            destination: Some(123),
            ..id
        };
        let raw = resp.encode().unwrap();
        assert_eq!(raw & REQUEST_FLAG, 0);
        assert_eq!(CanId::decode(raw).unwrap(), resp);
    }

    #[test]
    fn test_anonymous_flag() {
        let id = CanId {
            priority: Priority::Low,
            data_specifier: DataSpecifier::message(1).unwrap(),
            source: pseudo_node_id(b"x"),
            anonymous: true,
            destination: None,
        };
        let decoded = CanId::decode(id.encode().unwrap()).unwrap();
        assert!(decoded.anonymous);
    }

    #[test]
    fn test_reject_reserved_and_oversized() {
        assert!(CanId::decode(RESERVED_23).is_err());
        assert!(CanId::decode(0x2000_0000).is_err());
        // Priority 7 is not defined.
        assert!(CanId::decode(7 << PRIORITY_SHIFT).is_err());
        let bad = CanId {
            priority: Priority::Nominal,
            data_specifier: DataSpecifier::request(1).unwrap(),
            source: 1,
            anonymous: false,
            destination: None,
        };
        assert!(bad.encode().is_err());
    }

    #[test]
    fn test_tail_byte() {
        let tail = TailByte {
            start_of_transfer: true,
            end_of_transfer: false,
            toggle: true,
            transfer_id: 29,
        };
        assert_eq!(tail.encode(), 0b1011_1101);
        assert_eq!(TailByte::decode(0b1011_1101), tail);
    }
}
