//! LSB-first bit streams.
//!
//! Bit `n` of the stream is bit `n % 8` of byte `n / 8`, so the first field
//! written occupies the least significant bits of byte 0 and multi-byte
//! values come out little-endian.

/// Number of bits needed to represent every value in `0..=max`.
pub(crate) fn bits_for(max: u64) -> u32 {
    u64::BITS - max.leading_zeros()
}

pub(crate) fn align_up(position: u64, alignment: u32) -> u64 {
    let a = u64::from(alignment.max(1));
    position.div_ceil(a) * a
}

pub(crate) fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

#[derive(Debug, Default)]
pub(crate) struct BitWriter {
    buf: Vec<u8>,
    position: u64,
}

impl BitWriter {
    pub(crate) fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(bytes),
            position: 0,
        }
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    /// Append the low `bits` bits of `value`. Higher bits must be zero.
    pub(crate) fn write(&mut self, mut value: u64, bits: u32) {
        debug_assert!(bits <= 64);
        debug_assert_eq!(value & !mask(bits), 0);
        let mut remaining = bits;
        while remaining > 0 {
            let byte = (self.position / 8) as usize;
            let offset = (self.position % 8) as u32;
            if byte == self.buf.len() {
                self.buf.push(0);
            }
            let take = (8 - offset).min(remaining);
            self.buf[byte] |= ((value & mask(take)) as u8) << offset;
            value >>= take;
            remaining -= take;
            self.position += u64::from(take);
        }
    }

    /// Write zero bits up to the next multiple of `alignment`.
    pub(crate) fn align(&mut self, alignment: u32) {
        let target = align_up(self.position, alignment);
        while self.position < target {
            let step = (target - self.position).min(64) as u32;
            self.write(0, step);
        }
    }

    /// Finish the stream, zero-padding the last byte.
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads past the end of the input yield zero bits.
#[derive(Debug)]
pub(crate) struct BitReader<'a> {
    buf: &'a [u8],
    position: u64,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, position: 0 }
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn read(&mut self, bits: u32) -> u64 {
        debug_assert!(bits <= 64);
        let mut value = 0u64;
        let mut done = 0u32;
        while done < bits {
            let byte = (self.position / 8) as usize;
            let offset = (self.position % 8) as u32;
            let take = (8 - offset).min(bits - done);
            let chunk = self.buf.get(byte).map_or(0, |b| u64::from(b >> offset) & mask(take));
            value |= chunk << done;
            done += take;
            self.position += u64::from(take);
        }
        value
    }

    pub(crate) fn skip(&mut self, bits: u64) {
        self.position = self.position.saturating_add(bits);
    }

    pub(crate) fn align(&mut self, alignment: u32) {
        self.position = align_up(self.position, alignment);
    }
}
