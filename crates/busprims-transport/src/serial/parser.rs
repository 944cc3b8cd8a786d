use std::time::Instant;

use bytes::{Bytes, BytesMut};

use super::frame::{parse_unescaped_image, OVERHEAD};
use super::{ESCAPE_PREFIX, FRAME_DELIMITER};
use crate::frame::Frame;

/// Output of [`StreamParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedItem {
    Frame(Frame),
    /// Bytes that do not belong to any valid frame.
    OutOfBand(Bytes),
}

/// Incremental splitter of a serial byte stream into frames and out-of-band data.
///
/// A delimiter both ends the current frame candidate and starts the next one.
/// Candidates that fail to parse are reported as out-of-band data, raw and
/// still escaped.
#[derive(Debug)]
pub struct StreamParser {
    image: BytesMut,
    raw: BytesMut,
    out_of_band: BytesMut,
    inside: bool,
    escaped: bool,
    max_image_size: usize,
}

impl StreamParser {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            image: BytesMut::new(),
            raw: BytesMut::new(),
            out_of_band: BytesMut::new(),
            inside: false,
            escaped: false,
            max_image_size: max_payload_size.saturating_add(OVERHEAD),
        }
    }

    /// Feed a chunk; every completed item is passed to `emit` in stream order.
    pub fn process_chunk(
        &mut self,
        chunk: &[u8],
        timestamp: Instant,
        emit: &mut impl FnMut(ParsedItem),
    ) {
        for &b in chunk {
            if b == FRAME_DELIMITER {
                self.finish_candidate(timestamp, emit);
                self.inside = true;
                continue;
            }
            if !self.inside {
                self.out_of_band.extend_from_slice(&[b]);
                continue;
            }

            self.raw.extend_from_slice(&[b]);
            if self.escaped {
                self.image.extend_from_slice(&[b ^ 0xFF]);
                self.escaped = false;
            } else if b == ESCAPE_PREFIX {
                self.escaped = true;
            } else {
                self.image.extend_from_slice(&[b]);
            }

            if self.image.len() > self.max_image_size {
                // Too long to be a frame; treat everything up to the next
                // delimiter as noise.
                self.out_of_band.extend_from_slice(&self.raw);
                self.reset_candidate();
                self.inside = false;
            }
        }
        self.flush_out_of_band(emit);
    }

    fn finish_candidate(&mut self, timestamp: Instant, emit: &mut impl FnMut(ParsedItem)) {
        if self.inside && !self.raw.is_empty() {
            match parse_unescaped_image(&self.image, timestamp) {
                Some(frame) => {
                    self.flush_out_of_band(emit);
                    emit(ParsedItem::Frame(frame));
                }
                None => self.out_of_band.extend_from_slice(&self.raw),
            }
        }
        self.reset_candidate();
    }

    fn reset_candidate(&mut self) {
        self.image.clear();
        self.raw.clear();
        self.escaped = false;
    }

    fn flush_out_of_band(&mut self, emit: &mut impl FnMut(ParsedItem)) {
        if !self.out_of_band.is_empty() {
            emit(ParsedItem::OutOfBand(self.out_of_band.split().freeze()));
        }
    }
}
