use std::collections::HashMap;
use std::time::{Duration, Instant};

use busprims_transport::{NodeId, TransferIdModulo};

#[derive(Debug, Clone, Copy)]
struct Seen {
    transfer_id: u64,
    at: Instant,
}

/// Last accepted transfer-ID per source.
///
/// A transfer is accepted when its source is unknown, idle for longer than
/// the idle timeout, or when its transfer-ID is newer than the last accepted
/// one under the link's modulus. Anonymous transfers are always accepted.
#[derive(Debug)]
pub struct TransferIdTracker {
    modulo: TransferIdModulo,
    max_sources: usize,
    idle_timeout: Duration,
    sources: HashMap<NodeId, Seen>,
}

impl TransferIdTracker {
    pub fn new(modulo: TransferIdModulo, max_sources: usize, idle_timeout: Duration) -> Self {
        Self {
            modulo,
            max_sources: max_sources.max(1),
            idle_timeout,
            sources: HashMap::new(),
        }
    }

    pub fn accept(&mut self, source: Option<NodeId>, transfer_id: u64, now: Instant) -> bool {
        let Some(source) = source else {
            return true;
        };
        let seen = Seen { transfer_id, at: now };
        match self.sources.get_mut(&source) {
            Some(last) if now.saturating_duration_since(last.at) <= self.idle_timeout => {
                if !self.modulo.is_newer(transfer_id, last.transfer_id) {
                    return false;
                }
                *last = seen;
                true
            }
            Some(last) => {
                *last = seen;
                true
            }
            None => {
                if self.sources.len() >= self.max_sources {
                    let oldest = self
                        .sources
                        .iter()
                        .min_by_key(|(_, s)| s.at)
                        .map(|(id, _)| *id);
                    if let Some(id) = oldest {
                        self.sources.remove(&id);
                    }
                }
                self.sources.insert(source, seen);
                true
            }
        }
    }

    /// Last accepted transfer-ID of `source`, if remembered.
    pub fn last(&self, source: NodeId) -> Option<u64> {
        self.sources.get(&source).map(|s| s.transfer_id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
