use std::collections::HashMap;
use std::time::{Duration, Instant};

use busprims_transport::crc::Crc32c;
use busprims_transport::{DataSpecifier, TransferIdModulo};

use crate::transfer::{SessionKey, Transfer};

#[derive(Debug, Clone, Copy)]
struct Delivered {
    transfer_id: u64,
    at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AnonymousKey {
    data_specifier: DataSpecifier,
    transfer_id: u64,
    payload_crc: u32,
    payload_len: usize,
}

/// Suppresses copies of a transfer completed on more than one interface.
///
/// For each session the last delivered transfer-ID is remembered for
/// `window`. A completion that is not newer than it is a copy. Anonymous
/// transfers have no session, so they are matched by content.
#[derive(Debug)]
pub(crate) struct Deduplicator {
    window: Duration,
    max_entries: usize,
    modulo: TransferIdModulo,
    sessions: HashMap<SessionKey, Delivered>,
    anonymous: HashMap<AnonymousKey, Instant>,
}

impl Deduplicator {
    pub(crate) fn new(window: Duration, max_entries: usize, modulo: TransferIdModulo) -> Self {
        Self {
            window,
            max_entries: max_entries.max(1),
            modulo,
            sessions: HashMap::new(),
            anonymous: HashMap::new(),
        }
    }

    /// `true` if `transfer` is the first copy and should be delivered.
    pub(crate) fn admit(&mut self, transfer: &Transfer, now: Instant) -> bool {
        let window = self.window;
        let fresh = |at: Instant| now.saturating_duration_since(at) <= window;

        if transfer.source_node_id.is_none() {
            let key = AnonymousKey {
                data_specifier: transfer.data_specifier,
                transfer_id: transfer.transfer_id,
                payload_crc: Crc32c::compute(&transfer.payload),
                payload_len: transfer.payload.len(),
            };
            if self.anonymous.get(&key).is_some_and(|&at| fresh(at)) {
                return false;
            }
            if !self.anonymous.contains_key(&key) && self.anonymous.len() >= self.max_entries {
                evict_oldest(&mut self.anonymous, |at| *at);
            }
            self.anonymous.insert(key, now);
            return true;
        }

        let key = transfer.session_key();
        match self.sessions.get_mut(&key) {
            Some(last)
                if fresh(last.at) && !self.modulo.is_newer(transfer.transfer_id, last.transfer_id) =>
            {
                false
            }
            Some(last) => {
                *last = Delivered {
                    transfer_id: transfer.transfer_id,
                    at: now,
                };
                true
            }
            None => {
                if self.sessions.len() >= self.max_entries {
                    evict_oldest(&mut self.sessions, |d| d.at);
                }
                self.sessions.insert(
                    key,
                    Delivered {
                        transfer_id: transfer.transfer_id,
                        at: now,
                    },
                );
                true
            }
        }
    }

    /// Forget everything older than the window.
    pub(crate) fn expire(&mut self, now: Instant) {
        let window = self.window;
        self.sessions
            .retain(|_, d| now.saturating_duration_since(d.at) <= window);
        self.anonymous
            .retain(|_, at| now.saturating_duration_since(*at) <= window);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sessions.len() + self.anonymous.len()
    }
}

fn evict_oldest<K: Copy + Eq + std::hash::Hash, V>(map: &mut HashMap<K, V>, at: impl Fn(&V) -> Instant) {
    let oldest = map.iter().min_by_key(|(_, v)| at(v)).map(|(k, _)| *k);
    if let Some(key) = oldest {
        map.remove(&key);
    }
}
