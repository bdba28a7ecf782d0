use crate::models::{Endpoint, PortNo, SwitchId};
use crate::qos::{QosScope, RemovalMode};
use crate::rules::RulePriorities;
use crate::topology::{TopologyEvent, MAX_LINK_CAPACITY_MBPS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

/// Priority of the switches' own L2 forwarding; isolation must sit above it.
pub const DEFAULT_FORWARDING_PRIORITY: u16 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub mqtt: MqttConf,
    pub catalog_path: String,
    /// Host aliases usable in the catalog and the static topology.
    pub hosts: BTreeMap<String, Ipv4Addr>,
    pub topology: Option<StaticTopology>,
    pub rules: RulesConf,
    pub qos: QosConf,
    pub engine: EngineConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    /// Only ever taken from SLICE_API_KEY.
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticTopology {
    #[serde(default)]
    pub switches: Vec<u64>,
    #[serde(default)]
    pub links: Vec<StaticLink>,
    #[serde(default)]
    pub hosts: Vec<StaticHost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticLink {
    pub a: Endpoint,
    pub b: Endpoint,
    pub capacity_mbps: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticHost {
    /// Alias from `hosts` or a literal address.
    pub host: String,
    pub switch: u64,
    pub port: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConf {
    pub forward_priority: u16,
    pub reverse_priority: u16,
    pub isolation_priority: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosBackendKind {
    Tc,
    Script,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QosConf {
    pub backend: QosBackendKind,
    pub tc_binary: String,
    pub removal: RemovalMode,
    pub create_command: String, // ex: "./queue_create.sh {slice} {pct} {src} {dst} {iface}"
    pub delete_command: String, // ex: "./queue_delete.sh {slice} {iface}"
    pub interface_template: String,
    pub scope: QosScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConf {
    pub queue_capacity: usize,
    pub backend_timeout_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            http: HttpConf::default(),
            mqtt: MqttConf::default(),
            catalog_path: "slices.yaml".into(),
            hosts: BTreeMap::new(),
            topology: None,
            rules: RulesConf::default(),
            qos: QosConf::default(),
            engine: EngineConf::default(),
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into(), api_key: None }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "slice-kernel".into(),
            keep_alive_secs: 15,
            topic_prefix: "slices".into(),
        }
    }
}

impl Default for RulesConf {
    fn default() -> Self {
        let p = RulePriorities::default();
        Self { forward_priority: p.forward, reverse_priority: p.reverse, isolation_priority: p.isolation }
    }
}

impl Default for QosConf {
    fn default() -> Self {
        Self {
            backend: QosBackendKind::Tc,
            tc_binary: "tc".into(),
            removal: RemovalMode::Purge,
            create_command: "./queue_create.sh {slice} {pct} {src} {dst} {iface}".into(),
            delete_command: "./queue_delete.sh {slice} {iface}".into(),
            interface_template: "s{switch}-eth{port}".into(),
            scope: QosScope::EveryHop,
        }
    }
}

impl Default for EngineConf {
    fn default() -> Self {
        Self { queue_capacity: 64, backend_timeout_ms: 5000 }
    }
}

impl RulesConf {
    pub fn priorities(&self) -> RulePriorities {
        RulePriorities {
            forward: self.forward_priority,
            reverse: self.reverse_priority,
            isolation: self.isolation_priority,
        }
    }
}

impl EngineConf {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

impl KernelConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Environment overrides, read through `lookup` so tests need no real env.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(key) = lookup("SLICE_API_KEY").filter(|k| !k.is_empty()) {
            self.http.api_key = Some(key);
        }
        if let Some(host) = lookup("SLICE_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("SLICE_MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("SLICE_MQTT_PORT '{port}' is not a port number")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.rules;
        if !(r.forward_priority > r.reverse_priority && r.reverse_priority > r.isolation_priority) {
            return Err(ConfigError::Invalid(format!(
                "rule priorities must be strictly decreasing forward > reverse > isolation (got {} / {} / {})",
                r.forward_priority, r.reverse_priority, r.isolation_priority
            )));
        }
        if r.isolation_priority <= DEFAULT_FORWARDING_PRIORITY {
            return Err(ConfigError::Invalid(format!(
                "isolation_priority {} must be above the default forwarding priority {}",
                r.isolation_priority, DEFAULT_FORWARDING_PRIORITY
            )));
        }
        if self.engine.queue_capacity == 0 {
            return Err(ConfigError::Invalid("engine.queue_capacity must be at least 1".into()));
        }
        if self.engine.backend_timeout_ms == 0 {
            return Err(ConfigError::Invalid("engine.backend_timeout_ms must be positive".into()));
        }
        if let Some(topology) = &self.topology {
            topology.events(&self.hosts)?;
        }
        Ok(())
    }
}

impl StaticTopology {
    /// Discovery events equivalent to this preload: switches, then links,
    /// then hosts.
    pub fn events(&self, aliases: &BTreeMap<String, Ipv4Addr>) -> Result<Vec<TopologyEvent>, ConfigError> {
        let mut events: Vec<TopologyEvent> = self
            .switches
            .iter()
            .map(|s| TopologyEvent::SwitchJoined { switch: SwitchId(*s), ports: Vec::new() })
            .collect();

        for link in &self.links {
            if link.capacity_mbps == 0 || link.capacity_mbps > MAX_LINK_CAPACITY_MBPS {
                return Err(ConfigError::Invalid(format!(
                    "link {} <-> {} capacity {} Mbps outside 1..={}",
                    link.a, link.b, link.capacity_mbps, MAX_LINK_CAPACITY_MBPS
                )));
            }
            events.push(TopologyEvent::LinkUp { a: link.a, b: link.b, capacity_mbps: link.capacity_mbps });
        }

        for host in &self.hosts {
            let address = aliases
                .get(&host.host)
                .copied()
                .or_else(|| host.host.parse().ok())
                .ok_or_else(|| ConfigError::Invalid(format!("topology host '{}' is not an alias or IPv4 address", host.host)))?;
            events.push(TopologyEvent::HostDiscovered { address, switch: SwitchId(host.switch), port: PortNo(host.port) });
        }
        Ok(events)
    }
}

pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = std::env::var("SLICE_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.map_err(|source| ConfigError::Io { path: path.clone(), source })?;
        KernelConfig::from_yaml(&txt)?
    } else {
        warn!("[kernel] no config at {}, using defaults", path);
        KernelConfig::default()
    };
    cfg.apply_env(|k| std::env::var(k).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
