use std::time::Duration;

use busprims_frame::config::duration_ms;
use busprims_frame::RedundancyConfig;
use busprims_transport::{NodeId, Priority};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Behavior of a [`Node`](crate::Node) and the sessions it opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Expected node-ID. When set, every transport must carry it.
    pub local_node_id: Option<NodeId>,
    /// Priority of transfers sent by new sessions.
    pub priority: Priority,
    pub redundancy: RedundancyConfig,
    /// Sources remembered per subscriber or server for transfer-ID filtering.
    pub max_tracked_sources: usize,
    /// A source silent for this long starts afresh. Default: 10 s.
    #[serde(with = "duration_ms", rename = "source_idle_timeout_ms")]
    pub source_idle_timeout: Duration,
    /// Transfers queued per receiving session before new ones are dropped.
    pub session_queue_capacity: usize,
    /// Deadline applied to each publish and response. Default: 1 s.
    #[serde(with = "duration_ms", rename = "send_timeout_ms")]
    pub send_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            local_node_id: None,
            priority: Priority::default(),
            redundancy: RedundancyConfig::default(),
            max_tracked_sources: 1024,
            source_idle_timeout: Duration::from_secs(10),
            session_queue_capacity: 256,
            send_timeout: Duration::from_secs(1),
        }
    }
}

impl NodeConfig {
    /// Parse a JSON document; absent keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tracked_sources == 0 {
            return Err(SessionError::Config(
                "max_tracked_sources must be non-zero".into(),
            ));
        }
        if self.session_queue_capacity == 0 {
            return Err(SessionError::Config(
                "session_queue_capacity must be non-zero".into(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(SessionError::Config("send_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let config = NodeConfig::from_json(
            r#"{
                "local_node_id": 42,
                "priority": "fast",
                "source_idle_timeout_ms": 1500,
                "redundancy": {"dedup_window_ms": 250}
            }"#,
        )
        .unwrap();
        assert_eq!(config.local_node_id, Some(42));
        assert_eq!(config.priority, Priority::Fast);
        assert_eq!(config.source_idle_timeout, Duration::from_millis(1500));
        assert_eq!(config.redundancy.dedup_window, Duration::from_millis(250));
        assert_eq!(config.session_queue_capacity, 256);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            NodeConfig::from_json(r#"{"session_queue_capacity": 0}"#),
            Err(SessionError::Config(_))
        ));
        assert!(matches!(
            NodeConfig::from_json(r#"{"priority": "urgent"}"#),
            Err(SessionError::Json(_))
        ));
    }
}
