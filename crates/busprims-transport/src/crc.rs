//! Table-driven CRCs used on the wire.
//!
//! [`Crc16`] is CRC-16-CCITT-FALSE, protecting multi-frame transfers.
//! [`Crc32c`] is CRC-32C (Castagnoli), protecting serial and header images.

const CRC16_POLY: u16 = 0x1021;
const CRC32C_POLY_REFLECTED: u32 = 0x82F6_3B78;

const CRC16_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

const CRC32C_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32C_POLY_REFLECTED
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// CRC-16-CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no final XOR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    /// Length of the encoded CRC in bytes.
    pub const SIZE: usize = 2;

    pub fn new() -> Self {
        Self { value: 0xFFFF }
    }

    pub fn add(&mut self, bytes: &[u8]) {
        for &b in bytes {
            let idx = ((self.value >> 8) as u8 ^ b) as usize;
            self.value = (self.value << 8) ^ CRC16_TABLE[idx];
        }
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    pub fn compute(bytes: &[u8]) -> u16 {
        let mut crc = Self::new();
        crc.add(bytes);
        crc.value()
    }

    /// `true` if `image` ends with the little-endian CRC of the preceding bytes.
    pub fn verify_trailing(image: &[u8]) -> bool {
        let Some(split) = image.len().checked_sub(Self::SIZE) else {
            return false;
        };
        let (data, tail) = image.split_at(split);
        Self::compute(data) == u16::from_le_bytes([tail[0], tail[1]])
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-32C: reflected poly 0x1EDC6F41, init and final XOR 0xFFFFFFFF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc32c {
    state: u32,
}

impl Crc32c {
    pub const SIZE: usize = 4;

    pub fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    pub fn add(&mut self, bytes: &[u8]) {
        for &b in bytes {
            let idx = ((self.state ^ b as u32) & 0xFF) as usize;
            self.state = (self.state >> 8) ^ CRC32C_TABLE[idx];
        }
    }

    pub fn value(&self) -> u32 {
        self.state ^ 0xFFFF_FFFF
    }

    pub fn compute(bytes: &[u8]) -> u32 {
        let mut crc = Self::new();
        crc.add(bytes);
        crc.value()
    }

    pub fn verify_trailing(image: &[u8]) -> bool {
        let Some(split) = image.len().checked_sub(Self::SIZE) else {
            return false;
        };
        let (data, tail) = image.split_at(split);
        Self::compute(data) == u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]])
    }
}

impl Default for Crc32c {
    fn default() -> Self {
        Self::new()
    }
}
