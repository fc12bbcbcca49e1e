//! Node configuration with TOML file support.

use agentmesh_network::{GossipConfig, MethodTable};
use agentmesh_types::{split_host_port, AddressPair, CapabilitySet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for an AgentMesh node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `host:port` the HTTP and stream endpoints bind to.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// `host:port` other nodes should dial, when it differs from the bind
    /// address (e.g. behind a container port mapping).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_address: Option<String>,

    /// Seed peers contacted at startup and on auto-reconnect.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Capability tags this node advertises.
    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default = "default_gossip_interval_ms")]
    pub gossip_interval_ms: u64,

    #[serde(default = "default_failure_check_interval_ms")]
    pub failure_check_interval_ms: u64,

    /// Neighbors contacted per gossip round.
    #[serde(default = "default_fanout")]
    pub fanout: usize,

    /// Upper bound on persistent stream links.
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,

    #[serde(default = "default_suspect_after_ms")]
    pub suspect_after_ms: u64,

    #[serde(default = "default_dead_after_ms")]
    pub dead_after_ms: u64,

    /// How long an evicted peer's tombstone blocks stale gossip.
    #[serde(default = "default_tombstone_ttl_ms")]
    pub tombstone_ttl_ms: u64,

    #[serde(default = "default_event_ttl")]
    pub default_event_ttl: u8,

    #[serde(default = "default_meta_event_ttl")]
    pub meta_event_ttl: u8,

    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Total attempts per outbound call, the first included.
    #[serde(default = "default_rpc_max_attempts")]
    pub rpc_max_attempts: u32,

    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    #[serde(default = "default_dedup_ttl_ms")]
    pub dedup_ttl_ms: u64,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Free-form labels advertised in this node's status.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Extra or replacement method → required capabilities entries.
    #[serde(default)]
    pub methods: BTreeMap<String, Vec<String>>,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_listen_address() -> String {
    "0.0.0.0:7400".to_string()
}

fn default_gossip_interval_ms() -> u64 {
    5_000
}

fn default_failure_check_interval_ms() -> u64 {
    5_000
}

fn default_fanout() -> usize {
    3
}

fn default_max_neighbors() -> usize {
    8
}

fn default_suspect_after_ms() -> u64 {
    15_000
}

fn default_dead_after_ms() -> u64 {
    30_000
}

fn default_tombstone_ttl_ms() -> u64 {
    60_000
}

fn default_event_ttl() -> u8 {
    agentmesh_messages::DEFAULT_EVENT_TTL
}

fn default_meta_event_ttl() -> u8 {
    agentmesh_messages::META_EVENT_TTL
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_rpc_max_attempts() -> u32 {
    3
}

fn default_dedup_capacity() -> usize {
    agentmesh_network::DEFAULT_DEDUP_CAPACITY
}

fn default_dedup_ttl_ms() -> u64 {
    600_000
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Config for a node listening on `listen_address` with the given
    /// capabilities and everything else defaulted.
    pub fn new<I, S>(listen_address: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            listen_address: listen_address.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Reject configurations the node cannot run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        split_host_port(&self.listen_address)?;
        if let Some(advertise) = &self.advertise_address {
            split_host_port(advertise)?;
        }
        for seed in &self.bootstrap_peers {
            split_host_port(seed)?;
        }
        self.capability_set()?;
        self.method_table()?;

        let positive: [(&str, u64); 8] = [
            ("gossip_interval_ms", self.gossip_interval_ms),
            ("failure_check_interval_ms", self.failure_check_interval_ms),
            ("fanout", self.fanout as u64),
            ("max_neighbors", self.max_neighbors as u64),
            ("rpc_timeout_ms", self.rpc_timeout_ms),
            ("rpc_max_attempts", u64::from(self.rpc_max_attempts)),
            ("dedup_capacity", self.dedup_capacity as u64),
            ("default_event_ttl", u64::from(self.default_event_ttl)),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(NodeError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.meta_event_ttl == 0 {
            return Err(NodeError::Config(
                "meta_event_ttl must be greater than zero".to_string(),
            ));
        }
        if self.suspect_after_ms >= self.dead_after_ms {
            return Err(NodeError::Config(format!(
                "suspect_after_ms ({}) must be less than dead_after_ms ({})",
                self.suspect_after_ms, self.dead_after_ms
            )));
        }
        Ok(())
    }

    pub fn capability_set(&self) -> Result<CapabilitySet, NodeError> {
        Ok(CapabilitySet::parse(self.capabilities.iter().cloned())?)
    }

    /// The default method table with the `[methods]` entries layered on top.
    pub fn method_table(&self) -> Result<MethodTable, NodeError> {
        let mut table = MethodTable::with_defaults();
        for (method, tags) in &self.methods {
            table.insert(method.clone(), CapabilitySet::parse(tags.iter().cloned())?);
        }
        Ok(table)
    }

    /// Addresses this node reports about itself.
    pub fn advertised_addresses(&self) -> AddressPair {
        AddressPair::same(
            self.advertise_address
                .clone()
                .unwrap_or_else(|| self.listen_address.clone()),
        )
    }

    pub fn gossip_config(&self) -> GossipConfig {
        GossipConfig {
            interval: Duration::from_millis(self.gossip_interval_ms),
            fanout: self.fanout,
            suspect_after: Duration::from_millis(self.suspect_after_ms),
            dead_after: Duration::from_millis(self.dead_after_ms),
        }
    }

    pub fn failure_check_interval(&self) -> Duration {
        Duration::from_millis(self.failure_check_interval_ms)
    }

    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_millis(self.tombstone_ttl_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            advertise_address: None,
            bootstrap_peers: Vec::new(),
            capabilities: Vec::new(),
            gossip_interval_ms: default_gossip_interval_ms(),
            failure_check_interval_ms: default_failure_check_interval_ms(),
            fanout: default_fanout(),
            max_neighbors: default_max_neighbors(),
            suspect_after_ms: default_suspect_after_ms(),
            dead_after_ms: default_dead_after_ms(),
            tombstone_ttl_ms: default_tombstone_ttl_ms(),
            default_event_ttl: default_event_ttl(),
            meta_event_ttl: default_meta_event_ttl(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            rpc_max_attempts: default_rpc_max_attempts(),
            dedup_capacity: default_dedup_capacity(),
            dedup_ttl_ms: default_dedup_ttl_ms(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            metadata: BTreeMap::new(),
            methods: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_round_trips_through_toml() {
        let mut config = NodeConfig::new("10.0.0.1:9000", ["storage-access"]);
        config.metadata.insert("role".into(), "store".into());
        config
            .methods
            .insert("reindex".into(), vec!["storage-access".into()]);
        let toml_str = config.to_toml_string().unwrap();
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.gossip_interval_ms, 5_000);
        assert_eq!(config.fanout, 3);
        assert_eq!(config.max_neighbors, 8);
        assert_eq!(config.suspect_after_ms, 15_000);
        assert_eq!(config.dead_after_ms, 30_000);
        assert_eq!(config.default_event_ttl, 3);
        assert_eq!(config.meta_event_ttl, 5);
        assert_eq!(config.rpc_timeout_ms, 10_000);
        assert_eq!(config.rpc_max_attempts, 3);
        assert_eq!(config.dedup_capacity, 65_536);
        assert_eq!(config.log_format, LogFormat::Human);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            listen_address = "127.0.0.1:9100"
            capabilities = ["language-model", "inference-logic"]
            bootstrap_peers = ["seed.example:9000"]
            log_format = "json"

            [methods]
            transcribe = ["language-model"]
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.listen_address, "127.0.0.1:9100");
        assert_eq!(config.capability_set().unwrap().len(), 2);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.fanout, 3); // default
        let table = config.method_table().unwrap();
        assert!(table.required("transcribe").unwrap().contains("language-model"));
        assert!(table.contains("observe"));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fanout = 5").unwrap();
        let config = NodeConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.fanout, 5);
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/agentmesh.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = NodeConfig::new("127.0.0.1:9000", ["storage-access"]);
        assert!(config.validate().is_ok());

        config.capabilities.push("bad tag".into());
        assert!(config.validate().is_err());
        config.capabilities.pop();

        config.suspect_after_ms = config.dead_after_ms;
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
        config.suspect_after_ms = 15_000;

        config.fanout = 0;
        assert!(config.validate().is_err());
        config.fanout = 3;

        config.listen_address = "no-port".into();
        assert!(matches!(config.validate(), Err(NodeError::Types(_))));
    }

    #[test]
    fn advertise_address_wins_over_listen() {
        let mut config = NodeConfig::new("0.0.0.0:9000", Vec::<String>::new());
        assert_eq!(config.advertised_addresses(), AddressPair::same("0.0.0.0:9000"));
        config.advertise_address = Some("node-a:9000".into());
        assert_eq!(config.advertised_addresses(), AddressPair::same("node-a:9000"));
    }
}
