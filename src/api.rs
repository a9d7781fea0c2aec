//! Provisioning wire format
//!
//! JSON request and response bodies exchanged with the IaaS backend.
//! The backend accepts an infrastructure spec, instance specs namespaced
//! under an infrastructure, and script specs executed against a single
//! instance; it answers instance queries with arrays of descriptors that
//! carry at least `{id, tag}`.

use serde::{Deserialize, Serialize};

/// Credentials carried inside an infrastructure spec
///
/// Providers differ in which fields they need; unset fields are omitted
/// from the serialized body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsSpec {
    /// Account username (Openstack, generic)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Account password or secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// User domain (Openstack identity v3)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Access key / client id (EC2, Azure)
    #[serde(rename = "accessKey", skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    /// Secret key (EC2, Azure)
    #[serde(rename = "secretKey", skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

/// Infrastructure creation request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureSpec {
    /// Backend-side identity grouping all instances of this pool
    pub id: String,

    /// Provider type tag understood by the backend (e.g. "openstack-nova")
    #[serde(rename = "type")]
    pub infrastructure_type: String,

    /// Provider credentials
    pub credentials: CredentialsSpec,

    /// Identity/API endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Provider region
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Identity protocol version (Openstack)
    #[serde(rename = "identityVersion", skip_serializing_if = "Option::is_none")]
    pub identity_version: Option<String>,

    /// Authorization scope, rendered as "prefix:value" (Openstack)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Whether the backend should destroy instances when it shuts down
    #[serde(rename = "destroyOnShutdown")]
    pub destroy_on_shutdown: bool,
}

impl InfrastructureSpec {
    /// Create a spec with the mandatory fields set
    pub fn new(
        id: impl Into<String>,
        infrastructure_type: impl Into<String>,
        credentials: CredentialsSpec,
    ) -> Self {
        Self {
            id: id.into(),
            infrastructure_type: infrastructure_type.into(),
            credentials,
            endpoint: None,
            region: None,
            identity_version: None,
            scope: None,
            destroy_on_shutdown: true,
        }
    }

    /// Set the identity endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the identity version
    pub fn with_identity_version(mut self, version: impl Into<String>) -> Self {
        self.identity_version = Some(version.into());
        self
    }

    /// Set the authorization scope
    pub fn with_scope(mut self, prefix: &str, value: &str) -> Self {
        self.scope = Some(format!("{}:{}", prefix, value));
        self
    }

    /// Set the destroy-on-shutdown flag
    pub fn with_destroy_on_shutdown(mut self, destroy: bool) -> Self {
        self.destroy_on_shutdown = destroy;
        self
    }
}

/// Instance creation request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Controller-chosen stable tag, the idempotency key
    pub tag: String,

    /// Image id or name
    pub image: String,

    /// Number of instances to create under this tag
    #[serde(rename = "numberOfInstances")]
    pub number_of_instances: u32,

    /// CPU cores (generic shape)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,

    /// RAM in MiB (generic shape)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram: Option<u32>,

    /// Provider machine type / flavor
    #[serde(rename = "vmType", skip_serializing_if = "Option::is_none")]
    pub vm_type: Option<String>,

    /// Spot/preemptible price ceiling
    #[serde(rename = "spotPrice", skip_serializing_if = "Option::is_none")]
    pub spot_price: Option<String>,

    /// Key pair name installed on the instance
    #[serde(rename = "publicKeyName", skip_serializing_if = "Option::is_none")]
    pub public_key_name: Option<String>,

    /// Network to attach the instance to
    #[serde(rename = "networkId", skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,

    /// Subnet within the network
    #[serde(rename = "subnetId", skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,

    /// Security group names
    #[serde(
        rename = "securityGroupNames",
        skip_serializing_if = "Vec::is_empty",
        default
    )]
    pub security_group_names: Vec<String>,

    /// Ports the backend should open on the instance
    #[serde(rename = "portsToOpen", skip_serializing_if = "Vec::is_empty", default)]
    pub ports_to_open: Vec<u16>,

    /// Startup scripts executed at boot
    #[serde(rename = "initScripts", skip_serializing_if = "Vec::is_empty", default)]
    pub init_scripts: Vec<String>,
}

impl InstanceSpec {
    /// Create a spec with the mandatory fields set
    pub fn new(tag: impl Into<String>, image: impl Into<String>, number_of_instances: u32) -> Self {
        Self {
            tag: tag.into(),
            image: image.into(),
            number_of_instances,
            cores: None,
            ram: None,
            vm_type: None,
            spot_price: None,
            public_key_name: None,
            network_id: None,
            subnet_id: None,
            security_group_names: Vec::new(),
            ports_to_open: Vec::new(),
            init_scripts: Vec::new(),
        }
    }

    /// Set cores and RAM (generic hardware shape)
    pub fn with_hardware(mut self, cores: u32, ram: u32) -> Self {
        self.cores = Some(cores);
        self.ram = Some(ram);
        self
    }

    /// Set the machine type / flavor
    pub fn with_vm_type(mut self, vm_type: impl Into<String>) -> Self {
        self.vm_type = Some(vm_type.into());
        self
    }

    /// Set a spot price ceiling
    pub fn with_spot_price(mut self, price: impl Into<String>) -> Self {
        self.spot_price = Some(price.into());
        self
    }

    /// Set the key pair name
    pub fn with_public_key_name(mut self, name: impl Into<String>) -> Self {
        self.public_key_name = Some(name.into());
        self
    }

    /// Set the network id
    pub fn with_network(mut self, network_id: impl Into<String>) -> Self {
        self.network_id = Some(network_id.into());
        self
    }

    /// Set security groups
    pub fn with_security_groups(mut self, groups: Vec<String>) -> Self {
        self.security_group_names = groups;
        self
    }

    /// Set ports to open
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports_to_open = ports;
        self
    }

    /// Set startup scripts
    pub fn with_init_scripts(mut self, scripts: Vec<String>) -> Self {
        self.init_scripts = scripts;
        self
    }
}

/// Script credentials: password or private key, never both
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptCredentials {
    /// Login user on the instance
    pub username: String,

    /// Login password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Private key material
    #[serde(rename = "privateKey", skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl ScriptCredentials {
    /// Password-based credentials
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
            private_key: None,
        }
    }

    /// Key-based credentials
    pub fn key(username: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
            private_key: Some(private_key.into()),
        }
    }
}

/// Remote script execution request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSpec {
    /// Script lines to execute in order
    pub scripts: Vec<String>,

    /// Optional execution credentials
    #[serde(flatten)]
    pub credentials: Option<ScriptCredentials>,
}

impl ScriptSpec {
    /// Script spec without credentials
    pub fn new(scripts: Vec<String>) -> Self {
        Self {
            scripts,
            credentials: None,
        }
    }

    /// Attach credentials
    pub fn with_credentials(mut self, credentials: ScriptCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Backend's view of an instance
///
/// Deserialization is tolerant: the backend may return more fields than
/// listed here, only `id` and `tag` are guaranteed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    /// Backend-assigned instance id
    pub id: String,

    /// Controller-chosen tag
    pub tag: String,

    /// Image the instance was created from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Instance status as reported by the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Public addresses, if any
    #[serde(rename = "publicAddresses", skip_serializing_if = "Vec::is_empty", default)]
    pub public_addresses: Vec<String>,
}
