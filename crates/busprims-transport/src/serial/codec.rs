use std::collections::VecDeque;
use std::time::Instant;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::frame::encode_frame;
use super::parser::{ParsedItem, StreamParser};
use super::MTU_RANGE;
use crate::error::{Result, TransportError};
use crate::frame::Frame;

/// `tokio_util` codec for serial frames over an async byte stream.
///
/// Out-of-band bytes are logged and dropped.
#[derive(Debug)]
pub struct SerialCodec {
    parser: StreamParser,
    ready: VecDeque<Frame>,
    mtu: usize,
}

impl SerialCodec {
    pub fn new(mtu: usize) -> Self {
        Self {
            parser: StreamParser::new(*MTU_RANGE.end()),
            ready: VecDeque::new(),
            mtu,
        }
    }
}

impl Default for SerialCodec {
    fn default() -> Self {
        Self::new(*MTU_RANGE.end())
    }
}

impl Decoder for SerialCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if !src.is_empty() {
            let chunk = src.split();
            let ready = &mut self.ready;
            self.parser
                .process_chunk(&chunk, Instant::now(), &mut |item| match item {
                    ParsedItem::Frame(frame) => ready.push_back(frame),
                    ParsedItem::OutOfBand(data) => {
                        warn!(data = %String::from_utf8_lossy(&data), "out-of-band data");
                    }
                });
        }
        Ok(self.ready.pop_front())
    }
}

impl<'a> Encoder<&'a Frame> for SerialCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: &'a Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.mtu {
            return Err(TransportError::CapacityExceeded {
                size: frame.payload.len(),
                max: self.mtu,
            });
        }
        encode_frame(frame, dst)
    }
}
