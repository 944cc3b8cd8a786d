use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Node identifier. Valid range depends on the medium.
pub type NodeId = u16;

/// Highest valid subject-ID.
pub const SUBJECT_ID_MAX: u16 = 8191;

/// Highest valid service-ID.
pub const SERVICE_ID_MAX: u16 = 511;

/// Transfer priority. Lower numeric value wins arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    Exceptional = 0,
    Immediate = 1,
    Fast = 2,
    High = 3,
    Nominal = 4,
    Low = 5,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Nominal
    }
}

impl TryFrom<u8> for Priority {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Exceptional),
            1 => Ok(Self::Immediate),
            2 => Ok(Self::Fast),
            3 => Ok(Self::High),
            4 => Ok(Self::Nominal),
            5 => Ok(Self::Low),
            other => Err(TransportError::InvalidFrame(format!(
                "priority {other} is not defined"
            ))),
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p as u8
    }
}

/// Direction of a service transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceRole {
    Request,
    Response,
}

/// What a transfer is about: a published subject or one half of a service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSpecifier {
    Message { subject_id: u16 },
    Service { service_id: u16, role: ServiceRole },
}

impl DataSpecifier {
    /// Message specifier; fails if the subject-ID is out of range.
    pub fn message(subject_id: u16) -> Result<Self> {
        if subject_id > SUBJECT_ID_MAX {
            return Err(TransportError::InvalidFrame(format!(
                "subject-ID {subject_id} exceeds {SUBJECT_ID_MAX}"
            )));
        }
        Ok(Self::Message { subject_id })
    }

    pub fn request(service_id: u16) -> Result<Self> {
        Self::service(service_id, ServiceRole::Request)
    }

    pub fn response(service_id: u16) -> Result<Self> {
        Self::service(service_id, ServiceRole::Response)
    }

    fn service(service_id: u16, role: ServiceRole) -> Result<Self> {
        if service_id > SERVICE_ID_MAX {
            return Err(TransportError::InvalidFrame(format!(
                "service-ID {service_id} exceeds {SERVICE_ID_MAX}"
            )));
        }
        Ok(Self::Service { service_id, role })
    }

    /// Subject-ID or service-ID.
    pub fn port_id(&self) -> u16 {
        match *self {
            Self::Message { subject_id } => subject_id,
            Self::Service { service_id, .. } => service_id,
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service { .. })
    }

    /// Re-check the identifier ranges (fields are public).
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Message { subject_id } => Self::message(subject_id).map(drop),
            Self::Service { service_id, role } => Self::service(service_id, role).map(drop),
        }
    }
}

impl fmt::Display for DataSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message { subject_id } => write!(f, "subject:{subject_id}"),
            Self::Service {
                service_id,
                role: ServiceRole::Request,
            } => write!(f, "request:{service_id}"),
            Self::Service {
                service_id,
                role: ServiceRole::Response,
            } => write!(f, "response:{service_id}"),
        }
    }
}

/// Cyclic transfer-ID arithmetic for a modulus of `2^bits`.
///
/// A transfer-ID `new` is newer than `old` when the forward distance
/// `(new - old) mod 2^bits` is non-zero and less than half the modulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferIdModulo {
    bits: u8,
}

impl TransferIdModulo {
    /// Five-bit transfer-ID carried in the CAN tail byte.
    pub const CAN: Self = Self { bits: 5 };
    /// Full 64-bit transfer-ID used by serial and UDP.
    pub const WIDE: Self = Self { bits: 64 };

    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits == 0 || bits > 64 {
            return Err(TransportError::InvalidConfiguration(format!(
                "transfer-ID width must be 1..=64 bits, got {bits}"
            )));
        }
        Ok(Self { bits })
    }

    pub fn bits(self) -> u8 {
        self.bits
    }

    /// Largest representable transfer-ID.
    pub fn mask(self) -> u64 {
        if self.bits == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        }
    }

    pub fn wrap(self, transfer_id: u64) -> u64 {
        transfer_id & self.mask()
    }

    pub fn increment(self, transfer_id: u64) -> u64 {
        transfer_id.wrapping_add(1) & self.mask()
    }

    /// `(to - from) mod 2^bits`.
    pub fn forward_distance(self, from: u64, to: u64) -> u64 {
        to.wrapping_sub(from) & self.mask()
    }

    pub fn is_newer(self, candidate: u64, reference: u64) -> bool {
        let d = self.forward_distance(reference, candidate);
        d != 0 && d <= self.mask() >> 1
    }

    /// The narrower of two moduli.
    pub fn min(self, other: Self) -> Self {
        if other.bits < self.bits {
            other
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_roundtrip_and_rejects_reserved() {
        for raw in 0u8..=5 {
            let p = Priority::try_from(raw).unwrap();
            assert_eq!(u8::from(p), raw);
        }
        assert!(Priority::try_from(6).is_err());
        assert!(Priority::try_from(7).is_err());
        assert!(Priority::Exceptional < Priority::Low);
    }

    #[test]
    fn test_port_ranges() {
        assert!(DataSpecifier::message(8191).is_ok());
        assert!(DataSpecifier::message(8192).is_err());
        assert!(DataSpecifier::request(511).is_ok());
        assert!(DataSpecifier::response(512).is_err());
        assert_eq!(DataSpecifier::request(42).unwrap().port_id(), 42);
    }

    #[test]
    fn test_wraparound_is_newer() {
        let m = TransferIdModulo::CAN;
        assert!(m.is_newer(0, 31));
        assert!(!m.is_newer(30, 31));
        assert!(!m.is_newer(31, 31));
        assert!(m.is_newer(15, 0));
        assert!(!m.is_newer(16, 0));
        assert_eq!(m.increment(31), 0);
    }

    #[test]
    fn test_wide_modulus() {
        let m = TransferIdModulo::WIDE;
        assert!(m.is_newer(0, u64::MAX));
        assert!(!m.is_newer(u64::MAX - 1, u64::MAX));
        assert_eq!(m.increment(u64::MAX), 0);
        assert_eq!(m.min(TransferIdModulo::CAN), TransferIdModulo::CAN);
    }

    #[test]
    fn test_from_bits_bounds() {
        assert!(TransferIdModulo::from_bits(0).is_err());
        assert!(TransferIdModulo::from_bits(65).is_err());
        assert_eq!(TransferIdModulo::from_bits(5).unwrap(), TransferIdModulo::CAN);
    }
}
