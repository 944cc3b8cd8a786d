use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde adapter storing a [`Duration`] as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Limits of one interface's reassembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Partial transfers older than this are discarded. Default: 2 s.
    #[serde(with = "duration_ms", rename = "transfer_id_timeout_ms")]
    pub transfer_id_timeout: Duration,
    /// Concurrent partial transfers; the oldest is evicted beyond this.
    pub max_sessions: usize,
    /// Largest multi-frame payload accepted, excluding the CRC.
    pub max_payload_size: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            transfer_id_timeout: Duration::from_secs(2),
            max_sessions: 1024,
            max_payload_size: 1024 * 1024,
        }
    }
}

/// Configuration of a [`RedundantTransport`](crate::RedundantTransport).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedundancyConfig {
    pub reassembly: ReassemblyConfig,
    /// How long a delivered transfer suppresses late copies. Default: 2 s.
    #[serde(with = "duration_ms", rename = "dedup_window_ms")]
    pub dedup_window: Duration,
    /// Upper bound on remembered sessions; oldest evicted first.
    pub max_dedup_entries: usize,
    /// Receive workers wake up at least this often to notice shutdown.
    #[serde(with = "duration_ms", rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    /// Frames buffered between the receive workers and the consumer.
    pub channel_capacity: usize,
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            reassembly: ReassemblyConfig::default(),
            dedup_window: Duration::from_secs(2),
            max_dedup_entries: 4096,
            poll_interval: Duration::from_millis(50),
            channel_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RedundancyConfig =
            serde_json::from_str(r#"{"dedup_window_ms": 500, "reassembly": {"max_sessions": 8}}"#)
                .unwrap();
        assert_eq!(config.dedup_window, Duration::from_millis(500));
        assert_eq!(config.reassembly.max_sessions, 8);
        assert_eq!(
            config.reassembly.transfer_id_timeout,
            Duration::from_secs(2)
        );
        assert_eq!(config.channel_capacity, 1024);
    }
}
