//! Block-Builder Configuration
//!
//! All fields deserialize with defaults so a minimal config file only needs
//! the log address and the partition assignment. Durations serialize as
//! integer milliseconds.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracehouse_storage::{BlockConfig, WalConfig};

/// Consumer group the builder commits offsets under. The builder never
/// joins group-managed consumption; the group exists purely as an offset
/// store.
pub const CONSUMER_GROUP: &str = "block-builder";

/// Connection details for the partitioned log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Broker address
    #[serde(default = "default_address")]
    pub address: String,

    /// Topic carrying trace records
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group used as the offset store
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            topic: default_topic(),
            consumer_group: default_consumer_group(),
        }
    }
}

fn default_address() -> String {
    "localhost:9092".to_string()
}

fn default_topic() -> String {
    "traces".to_string()
}

fn default_consumer_group() -> String {
    CONSUMER_GROUP.to_string()
}

/// Top-level block-builder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockBuilderConfig {
    /// This instance's id, used to look up its partition assignment
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Static map of instance id to assigned partition ids
    #[serde(default)]
    pub assigned_partitions: HashMap<String, Vec<i32>>,

    /// Width of one consumption cycle; also the sweep interval
    #[serde(with = "duration_ms", default = "default_consume_cycle_duration")]
    pub consume_cycle_duration: Duration,

    /// Log connection settings
    #[serde(default)]
    pub log: LogConfig,

    /// Block creation settings
    #[serde(default)]
    pub block: BlockConfig,

    /// WAL scratch directory settings
    #[serde(default)]
    pub wal: WalConfig,
}

impl Default for BlockBuilderConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            assigned_partitions: HashMap::new(),
            consume_cycle_duration: default_consume_cycle_duration(),
            log: LogConfig::default(),
            block: BlockConfig::default(),
            wal: WalConfig::default(),
        }
    }
}

impl BlockBuilderConfig {
    /// Partitions statically assigned to this instance, before filtering
    /// against the ring.
    pub fn own_partitions(&self) -> &[i32] {
        self.assigned_partitions
            .get(&self.instance_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn default_instance_id() -> String {
    "block-builder-0".to_string()
}

fn default_consume_cycle_duration() -> Duration {
    Duration::from_secs(5 * 60)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = BlockBuilderConfig::default();
        assert_eq!(cfg.instance_id, "block-builder-0");
        assert_eq!(cfg.consume_cycle_duration, Duration::from_secs(300));
        assert_eq!(cfg.log.consumer_group, CONSUMER_GROUP);
        assert!(cfg.own_partitions().is_empty());
    }

    #[test]
    fn test_own_partitions_lookup() {
        let mut cfg = BlockBuilderConfig::default();
        cfg.assigned_partitions
            .insert(cfg.instance_id.clone(), vec![0, 2, 4]);
        cfg.assigned_partitions
            .insert("other".to_string(), vec![1, 3]);
        assert_eq!(cfg.own_partitions(), &[0, 2, 4]);
    }

    #[test]
    fn test_duration_roundtrips_as_millis() {
        let mut cfg = BlockBuilderConfig::default();
        cfg.consume_cycle_duration = Duration::from_millis(1500);

        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["consume_cycle_duration"], 1500);

        let back: BlockBuilderConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.consume_cycle_duration, Duration::from_millis(1500));
    }

    #[test]
    fn test_minimal_config_deserializes() {
        let cfg: BlockBuilderConfig = serde_json::from_str(
            r#"{"assigned_partitions": {"block-builder-0": [0]}}"#,
        )
        .unwrap();
        assert_eq!(cfg.own_partitions(), &[0]);
        assert_eq!(cfg.consume_cycle_duration, Duration::from_secs(300));
    }
}
