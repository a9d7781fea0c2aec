//! Pool configuration
//!
//! [`PoolConfig`] is everything a pool needs to provision capacity: backend
//! location, provider selection and credentials, instance shape, and the
//! scaling knobs. It deserializes from JSON (the CLI host loads it from a
//! file) and can also be built from a validated flat string map through
//! [`ConfigSchema`] — an ordered list of field records consumed by a generic
//! validator, decoupled from any presentation layer.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default estimated startup time of the nodes, including VM boot (4 min)
pub const DEFAULT_NODES_INIT_DELAY_MS: u64 = 4 * 60 * 1000;

/// Default poll cadence while waiting for nodes to report in
pub const DEFAULT_NODE_WAIT_POLL_MS: u64 = 30 * 1000;

/// Which provider capability implementation the orchestrator uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Cores/RAM shaped instances on any backend-supported cloud
    Generic,
    /// Openstack Nova: flavors, networks, security groups
    Openstack,
    /// AWS EC2: vm types, key pairs, spot pricing
    AwsEc2,
}

impl ProviderKind {
    /// Parse from a configuration value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generic" => Some(Self::Generic),
            "openstack" => Some(Self::Openstack),
            "aws-ec2" => Some(Self::AwsEc2),
            _ => None,
        }
    }
}

/// Static configuration of a node pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Base URL of the provisioning backend
    pub backend_url: String,

    /// Backend-side identity for this pool's instances
    pub infrastructure_id: String,

    /// Provider capability implementation
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Provider account username
    #[serde(default)]
    pub username: Option<String>,

    /// Provider account password
    #[serde(default)]
    pub password: Option<String>,

    /// Access key (EC2-style credentials)
    #[serde(default)]
    pub access_key: Option<String>,

    /// Secret key (EC2-style credentials)
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Identity user domain (Openstack)
    #[serde(default)]
    pub domain: Option<String>,

    /// Identity endpoint (Openstack)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Provider region
    #[serde(default)]
    pub region: Option<String>,

    /// Identity protocol version (Openstack)
    #[serde(default)]
    pub identity_version: Option<String>,

    /// Authorization scope prefix (Openstack)
    #[serde(default)]
    pub scope_prefix: Option<String>,

    /// Authorization scope value (Openstack)
    #[serde(default)]
    pub scope_value: Option<String>,

    /// Image the instances boot from
    pub image: String,

    /// Machine type / flavor
    #[serde(default)]
    pub flavor: Option<String>,

    /// CPU cores (generic shape)
    #[serde(default)]
    pub cores: Option<u32>,

    /// RAM in MiB (generic shape)
    #[serde(default)]
    pub ram: Option<u32>,

    /// Key pair name installed on the instances
    #[serde(default)]
    pub public_key_name: Option<String>,

    /// Network the instances attach to
    #[serde(default)]
    pub network_id: Option<String>,

    /// Security group names
    #[serde(default)]
    pub security_groups: Vec<String>,

    /// Ports always opened on every instance, merged with per-request ports
    #[serde(default)]
    pub default_ports: Vec<u16>,

    /// Spot/preemptible price ceiling
    #[serde(default)]
    pub spot_price: Option<String>,

    /// Total (max) number of instances the pool may hold
    #[serde(default = "default_number_of_instances")]
    pub number_of_instances: u32,

    /// Nodes hosted per instance
    #[serde(default = "default_nodes_per_instance")]
    pub nodes_per_instance: u32,

    /// Estimated startup time of the nodes, the registration deadline
    #[serde(default = "default_nodes_init_delay_ms")]
    pub nodes_init_delay_ms: u64,

    /// Poll cadence while waiting for node registration
    #[serde(default = "default_node_wait_poll_ms")]
    pub node_wait_poll_ms: u64,

    /// Startup script template executed on each instance
    #[serde(default)]
    pub startup_script: String,

    /// Whether the backend destroys instances on its own shutdown
    #[serde(default = "default_true")]
    pub destroy_on_shutdown: bool,

    /// Terminate an instance as soon as its last node is removed
    #[serde(default = "default_true")]
    pub eager_reclaim: bool,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Generic
}

fn default_number_of_instances() -> u32 {
    1
}

fn default_nodes_per_instance() -> u32 {
    1
}

fn default_nodes_init_delay_ms() -> u64 {
    DEFAULT_NODES_INIT_DELAY_MS
}

fn default_node_wait_poll_ms() -> u64 {
    DEFAULT_NODE_WAIT_POLL_MS
}

fn default_true() -> bool {
    true
}

impl PoolConfig {
    /// Minimal config for a generic provider pool
    pub fn new(
        backend_url: impl Into<String>,
        infrastructure_id: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            backend_url: backend_url.into(),
            infrastructure_id: infrastructure_id.into(),
            provider: default_provider(),
            username: None,
            password: None,
            access_key: None,
            secret_key: None,
            domain: None,
            endpoint: None,
            region: None,
            identity_version: None,
            scope_prefix: None,
            scope_value: None,
            image: image.into(),
            flavor: None,
            cores: None,
            ram: None,
            public_key_name: None,
            network_id: None,
            security_groups: Vec::new(),
            default_ports: Vec::new(),
            spot_price: None,
            number_of_instances: default_number_of_instances(),
            nodes_per_instance: default_nodes_per_instance(),
            nodes_init_delay_ms: default_nodes_init_delay_ms(),
            node_wait_poll_ms: default_node_wait_poll_ms(),
            startup_script: String::new(),
            destroy_on_shutdown: true,
            eager_reclaim: true,
        }
    }

    /// Set the provider kind
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// Set the pool size: max instances and nodes per instance
    pub fn with_pool_size(mut self, number_of_instances: u32, nodes_per_instance: u32) -> Self {
        self.number_of_instances = number_of_instances;
        self.nodes_per_instance = nodes_per_instance;
        self
    }

    /// Set the node registration deadline
    pub fn with_nodes_init_delay(mut self, delay: Duration) -> Self {
        self.nodes_init_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the node-wait poll cadence
    pub fn with_node_wait_poll(mut self, poll: Duration) -> Self {
        self.node_wait_poll_ms = poll.as_millis() as u64;
        self
    }

    /// Set the startup script template
    pub fn with_startup_script(mut self, script: impl Into<String>) -> Self {
        self.startup_script = script.into();
        self
    }

    /// Node registration deadline as a [`Duration`]
    pub fn nodes_init_delay(&self) -> Duration {
        Duration::from_millis(self.nodes_init_delay_ms)
    }

    /// Node-wait poll cadence as a [`Duration`]
    pub fn node_wait_poll(&self) -> Duration {
        Duration::from_millis(self.node_wait_poll_ms)
    }
}

/// Per-request overrides of the pool's instance shape
///
/// A scale request may carry node-specific configuration that overlays the
/// pool defaults for the instances it deploys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOverrides {
    /// Override image
    #[serde(default)]
    pub image: Option<String>,

    /// Override machine type / flavor
    #[serde(default)]
    pub vm_type: Option<String>,

    /// Override key pair name
    #[serde(default)]
    pub public_key_name: Option<String>,

    /// Override security groups
    #[serde(default)]
    pub security_groups: Option<Vec<String>>,

    /// Additional ports to open
    #[serde(default)]
    pub ports_to_open: Option<Vec<u16>>,

    /// Override spot price ceiling
    #[serde(default)]
    pub spot_price: Option<String>,
}

/// Pool defaults with a request's overrides applied
#[derive(Debug, Clone)]
pub struct NodeParams {
    /// Image to boot from
    pub image: String,
    /// Machine type / flavor, if the provider uses one
    pub vm_type: Option<String>,
    /// Key pair name
    pub public_key_name: Option<String>,
    /// Security group names
    pub security_groups: Vec<String>,
    /// Ports to open: pool defaults plus request additions
    pub ports_to_open: Vec<u16>,
    /// Spot price ceiling
    pub spot_price: Option<String>,
}

impl NodeOverrides {
    /// Overlay these overrides on the pool defaults
    pub fn resolve(&self, cfg: &PoolConfig) -> NodeParams {
        let mut ports = cfg.default_ports.clone();
        if let Some(extra) = &self.ports_to_open {
            for p in extra {
                if !ports.contains(p) {
                    ports.push(*p);
                }
            }
        }
        NodeParams {
            image: self.image.clone().unwrap_or_else(|| cfg.image.clone()),
            vm_type: self.vm_type.clone().or_else(|| cfg.flavor.clone()),
            public_key_name: self
                .public_key_name
                .clone()
                .or_else(|| cfg.public_key_name.clone()),
            security_groups: self
                .security_groups
                .clone()
                .unwrap_or_else(|| cfg.security_groups.clone()),
            ports_to_open: ports,
            spot_price: self.spot_price.clone().or_else(|| cfg.spot_price.clone()),
        }
    }
}

/// Kind of a configuration field, for generic validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free-form text
    Text,
    /// Sensitive text, never logged or echoed
    Secret,
    /// Non-negative integer
    Integer,
    /// Duration in milliseconds
    DurationMillis,
    /// Boolean flag
    Flag,
}

/// One field of the configuration schema
#[derive(Debug, Clone)]
pub struct ConfigField {
    /// Field name, the key in the value map
    pub name: &'static str,
    /// Field kind
    pub kind: FieldKind,
    /// Whether a value must be present (possibly via default)
    pub required: bool,
    /// Default applied when the field is absent
    pub default_value: Option<&'static str>,
    /// Human-readable description
    pub description: &'static str,
}

/// Ordered configuration schema with a generic validator
#[derive(Debug, Clone)]
pub struct ConfigSchema {
    fields: Vec<ConfigField>,
}

impl ConfigSchema {
    /// Create a schema from an ordered field list
    pub fn new(fields: Vec<ConfigField>) -> Self {
        Self { fields }
    }

    /// The ordered field records
    pub fn fields(&self) -> &[ConfigField] {
        &self.fields
    }

    /// Validate a flat value map against the schema
    ///
    /// Fills defaults for absent fields, rejects missing required fields and
    /// values that do not parse for their kind. Returns the completed map.
    pub fn validate(&self, values: &HashMap<String, String>) -> Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        for field in &self.fields {
            let value = values
                .get(field.name)
                .map(|s| s.as_str())
                .filter(|s| !s.is_empty())
                .or(field.default_value);

            let value = match value {
                Some(v) => v,
                None if field.required => {
                    return Err(OrchestratorError::config(format!(
                        "missing mandatory field '{}'",
                        field.name
                    )));
                }
                None => continue,
            };

            match field.kind {
                FieldKind::Integer | FieldKind::DurationMillis => {
                    value.parse::<u64>().map_err(|_| {
                        OrchestratorError::config(format!(
                            "field '{}' must be a non-negative integer, got '{}'",
                            field.name, value
                        ))
                    })?;
                }
                FieldKind::Flag => {
                    value.parse::<bool>().map_err(|_| {
                        OrchestratorError::config(format!(
                            "field '{}' must be true or false, got '{}'",
                            field.name, value
                        ))
                    })?;
                }
                FieldKind::Text | FieldKind::Secret => {}
            }

            out.insert(field.name.to_string(), value.to_string());
        }
        Ok(out)
    }
}

impl PoolConfig {
    /// The pool configuration schema, in presentation order
    pub fn schema() -> ConfigSchema {
        ConfigSchema::new(vec![
            ConfigField {
                name: "backendUrl",
                kind: FieldKind::Text,
                required: true,
                default_value: None,
                description: "Base URL of the provisioning backend",
            },
            ConfigField {
                name: "infrastructureId",
                kind: FieldKind::Text,
                required: true,
                default_value: None,
                description: "Backend-side identity for this pool",
            },
            ConfigField {
                name: "provider",
                kind: FieldKind::Text,
                required: true,
                default_value: Some("generic"),
                description: "Provider kind: generic, openstack or aws-ec2",
            },
            ConfigField {
                name: "username",
                kind: FieldKind::Text,
                required: false,
                default_value: None,
                description: "Provider account username",
            },
            ConfigField {
                name: "password",
                kind: FieldKind::Secret,
                required: false,
                default_value: None,
                description: "Provider account password",
            },
            ConfigField {
                name: "domain",
                kind: FieldKind::Text,
                required: false,
                default_value: None,
                description: "Identity user domain",
            },
            ConfigField {
                name: "endpoint",
                kind: FieldKind::Text,
                required: false,
                default_value: None,
                description: "Identity endpoint",
            },
            ConfigField {
                name: "region",
                kind: FieldKind::Text,
                required: false,
                default_value: None,
                description: "Provider region",
            },
            ConfigField {
                name: "identityVersion",
                kind: FieldKind::Text,
                required: false,
                default_value: None,
                description: "Identity protocol version",
            },
            ConfigField {
                name: "image",
                kind: FieldKind::Text,
                required: true,
                default_value: None,
                description: "Image the instances boot from",
            },
            ConfigField {
                name: "flavor",
                kind: FieldKind::Text,
                required: false,
                default_value: None,
                description: "Machine type or flavor",
            },
            ConfigField {
                name: "networkId",
                kind: FieldKind::Text,
                required: false,
                default_value: None,
                description: "Network the instances attach to",
            },
            ConfigField {
                name: "publicKeyName",
                kind: FieldKind::Text,
                required: false,
                default_value: None,
                description: "Key pair name installed on the instances",
            },
            ConfigField {
                name: "numberOfInstances",
                kind: FieldKind::Integer,
                required: true,
                default_value: Some("1"),
                description: "Total (max) number of instances to create",
            },
            ConfigField {
                name: "nodesPerInstance",
                kind: FieldKind::Integer,
                required: true,
                default_value: Some("1"),
                description: "Total nodes to create per instance",
            },
            ConfigField {
                name: "nodesInitDelay",
                kind: FieldKind::DurationMillis,
                required: true,
                default_value: Some("240000"),
                description: "Estimated startup time of the nodes, including VM boot",
            },
            ConfigField {
                name: "startupScript",
                kind: FieldKind::Text,
                required: false,
                default_value: None,
                description: "VM startup script template launching the nodes",
            },
            ConfigField {
                name: "destroyOnShutdown",
                kind: FieldKind::Flag,
                required: true,
                default_value: Some("true"),
                description: "Destroy instances when the backend shuts down",
            },
        ])
    }

    /// Build a config from a schema-validated value map
    pub fn from_values(values: &HashMap<String, String>) -> Result<Self> {
        let validated = Self::schema().validate(values)?;
        let get = |k: &str| validated.get(k).cloned();
        let require = |k: &str| {
            get(k).ok_or_else(|| OrchestratorError::config(format!("missing mandatory field '{k}'")))
        };

        let provider_name = require("provider")?;
        let provider = ProviderKind::parse(&provider_name).ok_or_else(|| {
            OrchestratorError::config(format!("unknown provider '{provider_name}'"))
        })?;

        let mut cfg = PoolConfig::new(
            require("backendUrl")?,
            require("infrastructureId")?,
            require("image")?,
        )
        .with_provider(provider);

        cfg.username = get("username");
        cfg.password = get("password");
        cfg.domain = get("domain");
        cfg.endpoint = get("endpoint");
        cfg.region = get("region");
        cfg.identity_version = get("identityVersion");
        cfg.flavor = get("flavor");
        cfg.network_id = get("networkId");
        cfg.public_key_name = get("publicKeyName");
        cfg.number_of_instances = require("numberOfInstances")?.parse().unwrap_or(1);
        cfg.nodes_per_instance = require("nodesPerInstance")?.parse().unwrap_or(1);
        cfg.nodes_init_delay_ms = require("nodesInitDelay")?
            .parse()
            .unwrap_or(DEFAULT_NODES_INIT_DELAY_MS);
        cfg.startup_script = get("startupScript").unwrap_or_default();
        cfg.destroy_on_shutdown = require("destroyOnShutdown")?.parse().unwrap_or(true);
        Ok(cfg)
    }
}
