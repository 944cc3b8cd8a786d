use std::sync::atomic::{AtomicU64, Ordering};

/// Per-transport traffic counters, updated lock-free from send and receive paths.
#[derive(Debug, Default)]
pub struct TransportStatistics {
    in_frames: AtomicU64,
    in_bytes: AtomicU64,
    out_frames: AtomicU64,
    out_bytes: AtomicU64,
    out_errors: AtomicU64,
    out_transfers: AtomicU64,
    out_incomplete: AtomicU64,
    rejected_frames: AtomicU64,
    out_of_band_bytes: AtomicU64,
}

/// Point-in-time copy of [`TransportStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub in_frames: u64,
    pub in_bytes: u64,
    pub out_frames: u64,
    pub out_bytes: u64,
    pub out_errors: u64,
    /// Whole transfers written. Only transports that send a transfer as a
    /// unit (serial) count these; others leave them at zero.
    pub out_transfers: u64,
    /// Transfers abandoned part way through.
    pub out_incomplete: u64,
    pub rejected_frames: u64,
    pub out_of_band_bytes: u64,
}

impl TransportStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_in(&self, bytes: usize) {
        self.in_frames.fetch_add(1, Ordering::Relaxed);
        self.in_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_out(&self, bytes: usize) {
        self.out_frames.fetch_add(1, Ordering::Relaxed);
        self.out_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_out_error(&self) {
        self.out_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out_transfer(&self) {
        self.out_transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out_incomplete(&self) {
        self.out_incomplete.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out_of_band(&self, bytes: usize) {
        self.out_of_band_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            in_frames: self.in_frames.load(Ordering::Relaxed),
            in_bytes: self.in_bytes.load(Ordering::Relaxed),
            out_frames: self.out_frames.load(Ordering::Relaxed),
            out_bytes: self.out_bytes.load(Ordering::Relaxed),
            out_errors: self.out_errors.load(Ordering::Relaxed),
            out_transfers: self.out_transfers.load(Ordering::Relaxed),
            out_incomplete: self.out_incomplete.load(Ordering::Relaxed),
            rejected_frames: self.rejected_frames.load(Ordering::Relaxed),
            out_of_band_bytes: self.out_of_band_bytes.load(Ordering::Relaxed),
        }
    }
}
