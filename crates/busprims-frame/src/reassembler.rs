use std::collections::HashMap;
use std::time::Instant;

use bytes::BytesMut;
use busprims_transport::crc::Crc16;
use busprims_transport::{Frame, Priority, TransferIdModulo};
use tracing::debug;

use crate::config::ReassemblyConfig;
use crate::error::{FrameError, Result};
use crate::splitter::TRANSFER_CRC_SIZE;
use crate::transfer::{SessionKey, Transfer};

/// Counters kept by a [`Reassembler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStatistics {
    pub frames: u64,
    pub transfers: u64,
    pub sequence_violations: u64,
    pub crc_mismatches: u64,
    pub timeouts: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct Partial {
    transfer_id: u64,
    priority: Priority,
    payload: BytesMut,
    next_index: u32,
    next_toggle: bool,
    started_at: Instant,
}

/// Rebuilds transfers from the frames of one interface.
///
/// Partial transfers are keyed by source, destination and data specifier.
/// Errors returned by [`accept`](Self::accept) describe what was dropped;
/// they never poison other keys.
#[derive(Debug)]
pub struct Reassembler {
    config: ReassemblyConfig,
    modulo: TransferIdModulo,
    partials: HashMap<SessionKey, Partial>,
    stats: ReassemblyStatistics,
}

impl Reassembler {
    pub fn new(config: ReassemblyConfig, modulo: TransferIdModulo) -> Self {
        Self {
            config,
            modulo,
            partials: HashMap::new(),
            stats: ReassemblyStatistics::default(),
        }
    }

    /// Feed one frame. Returns the transfer it completes, if any.
    pub fn accept(&mut self, frame: Frame) -> Result<Option<Transfer>> {
        self.stats.frames += 1;
        let result = self.process(frame);
        match &result {
            Ok(Some(_)) => self.stats.transfers += 1,
            Ok(None) => {}
            Err(FrameError::CrcMismatch) => self.stats.crc_mismatches += 1,
            Err(_) => self.stats.sequence_violations += 1,
        }
        result
    }

    fn process(&mut self, frame: Frame) -> Result<Option<Transfer>> {
        if frame.source_node_id.is_none() {
            return if frame.is_single_frame() {
                Ok(Some(Transfer::from_single_frame(frame)))
            } else {
                Err(FrameError::AnonymousMultiFrame)
            };
        }

        let key = SessionKey::of_frame(&frame);
        self.expire(&key, frame.timestamp);

        if frame.index == 0 {
            if let Some(partial) = self.partials.get(&key) {
                if !self.modulo.is_newer(frame.transfer_id, partial.transfer_id) {
                    return Err(FrameError::SequenceViolation(
                        "start frame does not advance the transfer-ID",
                    ));
                }
                debug!(?key, old = partial.transfer_id, new = frame.transfer_id, "partial transfer preempted");
                self.partials.remove(&key);
                self.stats.evictions += 1;
            }
            if frame.end_of_transfer {
                return Ok(Some(Transfer::from_single_frame(frame)));
            }
            if frame.payload.len() > self.config.max_payload_size + TRANSFER_CRC_SIZE {
                return Err(FrameError::SequenceViolation(
                    "payload exceeds reassembly limit",
                ));
            }
            self.make_room();
            self.partials.insert(
                key,
                Partial {
                    transfer_id: frame.transfer_id,
                    priority: frame.priority,
                    payload: BytesMut::from(&frame.payload[..]),
                    next_index: 1,
                    next_toggle: !frame.toggle,
                    started_at: frame.timestamp,
                },
            );
            return Ok(None);
        }

        let Some(mut partial) = self.partials.remove(&key) else {
            return Err(FrameError::SequenceViolation("continuation without start"));
        };
        if frame.transfer_id != partial.transfer_id {
            return Err(FrameError::SequenceViolation("transfer-ID changed mid-transfer"));
        }
        if frame.index != partial.next_index {
            return Err(FrameError::SequenceViolation("unexpected frame index"));
        }
        if frame.toggle != partial.next_toggle {
            return Err(FrameError::SequenceViolation("toggle did not alternate"));
        }
        if partial.payload.len() + frame.payload.len()
            > self.config.max_payload_size + TRANSFER_CRC_SIZE
        {
            return Err(FrameError::SequenceViolation(
                "payload exceeds reassembly limit",
            ));
        }
        partial.payload.extend_from_slice(&frame.payload);

        if !frame.end_of_transfer {
            partial.next_index += 1;
            partial.next_toggle = !partial.next_toggle;
            self.partials.insert(key, partial);
            return Ok(None);
        }

        if !Crc16::verify_trailing(&partial.payload) {
            return Err(FrameError::CrcMismatch);
        }
        let mut payload = partial.payload;
        payload.truncate(payload.len() - TRANSFER_CRC_SIZE);
        Ok(Some(Transfer {
            timestamp: partial.started_at,
            priority: partial.priority,
            data_specifier: key.data_specifier,
            source_node_id: key.source_node_id,
            destination_node_id: key.destination_node_id,
            transfer_id: partial.transfer_id,
            payload: payload.freeze(),
        }))
    }

    fn expire(&mut self, key: &SessionKey, now: Instant) {
        let timeout = self.config.transfer_id_timeout;
        let expired = self
            .partials
            .get(key)
            .is_some_and(|p| now.saturating_duration_since(p.started_at) > timeout);
        if expired {
            self.partials.remove(key);
            self.stats.timeouts += 1;
            debug!(?key, error = %FrameError::TimedOut(timeout), "partial transfer dropped");
        }
    }

    fn make_room(&mut self) {
        if self.partials.len() < self.config.max_sessions.max(1) {
            return;
        }
        let oldest = self
            .partials
            .iter()
            .min_by_key(|(_, p)| p.started_at)
            .map(|(k, _)| *k);
        if let Some(key) = oldest {
            self.partials.remove(&key);
            self.stats.evictions += 1;
            debug!(?key, "partial transfer evicted to make room");
        }
    }

    /// Drop every partial transfer older than the timeout. Returns how many.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let timeout = self.config.transfer_id_timeout;
        let before = self.partials.len();
        self.partials
            .retain(|_, p| now.saturating_duration_since(p.started_at) <= timeout);
        let dropped = before - self.partials.len();
        if dropped > 0 {
            self.stats.timeouts += dropped as u64;
            debug!(dropped, "expired partial transfers swept");
        }
        dropped
    }

    /// Number of transfers currently being accumulated.
    pub fn in_progress(&self) -> usize {
        self.partials.len()
    }

    pub fn statistics(&self) -> ReassemblyStatistics {
        self.stats
    }
}
