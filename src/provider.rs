//! Provider capability interface
//!
//! The orchestrator is provider-agnostic: everything cloud-specific is the
//! shape of the infrastructure and instance request bodies. Each provider
//! implements [`Provider`] to build those bodies; the implementation is
//! selected by configuration, never by subtyping.

use crate::api::{CredentialsSpec, InfrastructureSpec, InstanceSpec};
use crate::config::{NodeParams, PoolConfig, ProviderKind};
use std::sync::Arc;

/// Builds provider-specific request bodies
pub trait Provider: Send + Sync {
    /// Provider type tag understood by the backend
    fn infrastructure_type(&self) -> &'static str;

    /// Build the infrastructure creation body for a pool
    fn infrastructure_spec(&self, cfg: &PoolConfig) -> InfrastructureSpec;

    /// Build the instance creation body for one tagged instance
    fn instance_spec(
        &self,
        cfg: &PoolConfig,
        params: &NodeParams,
        tag: &str,
        init_scripts: Vec<String>,
    ) -> InstanceSpec;
}

/// Select the provider implementation for a configuration
pub fn for_kind(kind: ProviderKind) -> Arc<dyn Provider> {
    match kind {
        ProviderKind::Generic => Arc::new(GenericProvider),
        ProviderKind::Openstack => Arc::new(OpenstackProvider),
        ProviderKind::AwsEc2 => Arc::new(AwsEc2Provider),
    }
}

/// Cores/RAM shaped instances on any backend-supported cloud
pub struct GenericProvider;

impl Provider for GenericProvider {
    fn infrastructure_type(&self) -> &'static str {
        "generic"
    }

    fn infrastructure_spec(&self, cfg: &PoolConfig) -> InfrastructureSpec {
        let credentials = CredentialsSpec {
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            ..Default::default()
        };
        let mut spec = InfrastructureSpec::new(
            cfg.infrastructure_id.clone(),
            self.infrastructure_type(),
            credentials,
        )
        .with_destroy_on_shutdown(cfg.destroy_on_shutdown);
        if let Some(endpoint) = &cfg.endpoint {
            spec = spec.with_endpoint(endpoint.clone());
        }
        if let Some(region) = &cfg.region {
            spec = spec.with_region(region.clone());
        }
        spec
    }

    fn instance_spec(
        &self,
        cfg: &PoolConfig,
        params: &NodeParams,
        tag: &str,
        init_scripts: Vec<String>,
    ) -> InstanceSpec {
        let mut spec = InstanceSpec::new(tag, params.image.clone(), 1)
            .with_security_groups(params.security_groups.clone())
            .with_ports(params.ports_to_open.clone())
            .with_init_scripts(init_scripts);
        if let (Some(cores), Some(ram)) = (cfg.cores, cfg.ram) {
            spec = spec.with_hardware(cores, ram);
        }
        if let Some(price) = &params.spot_price {
            spec = spec.with_spot_price(price.clone());
        }
        spec
    }
}

/// Openstack Nova: flavors, networks, security groups
pub struct OpenstackProvider;

impl Provider for OpenstackProvider {
    fn infrastructure_type(&self) -> &'static str {
        "openstack-nova"
    }

    fn infrastructure_spec(&self, cfg: &PoolConfig) -> InfrastructureSpec {
        let credentials = CredentialsSpec {
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            domain: cfg.domain.clone(),
            ..Default::default()
        };
        let mut spec = InfrastructureSpec::new(
            cfg.infrastructure_id.clone(),
            self.infrastructure_type(),
            credentials,
        )
        .with_destroy_on_shutdown(cfg.destroy_on_shutdown);
        if let Some(endpoint) = &cfg.endpoint {
            spec = spec.with_endpoint(endpoint.clone());
        }
        if let Some(region) = &cfg.region {
            spec = spec.with_region(region.clone());
        }
        if let Some(version) = &cfg.identity_version {
            spec = spec.with_identity_version(version.clone());
        }
        if let (Some(prefix), Some(value)) = (&cfg.scope_prefix, &cfg.scope_value) {
            spec = spec.with_scope(prefix, value);
        }
        spec
    }

    fn instance_spec(
        &self,
        cfg: &PoolConfig,
        params: &NodeParams,
        tag: &str,
        init_scripts: Vec<String>,
    ) -> InstanceSpec {
        let mut spec = InstanceSpec::new(tag, params.image.clone(), 1)
            .with_security_groups(params.security_groups.clone())
            .with_ports(params.ports_to_open.clone())
            .with_init_scripts(init_scripts);
        if let Some(flavor) = &params.vm_type {
            spec = spec.with_vm_type(flavor.clone());
        }
        if let Some(key) = &params.public_key_name {
            spec = spec.with_public_key_name(key.clone());
        }
        if let Some(network) = &cfg.network_id {
            spec = spec.with_network(network.clone());
        }
        spec
    }
}

/// AWS EC2: vm types, key pairs, spot pricing
pub struct AwsEc2Provider;

impl Provider for AwsEc2Provider {
    fn infrastructure_type(&self) -> &'static str {
        "aws-ec2"
    }

    fn infrastructure_spec(&self, cfg: &PoolConfig) -> InfrastructureSpec {
        let credentials = CredentialsSpec {
            access_key: cfg.access_key.clone(),
            secret_key: cfg.secret_key.clone(),
            ..Default::default()
        };
        let mut spec = InfrastructureSpec::new(
            cfg.infrastructure_id.clone(),
            self.infrastructure_type(),
            credentials,
        )
        .with_destroy_on_shutdown(cfg.destroy_on_shutdown);
        if let Some(region) = &cfg.region {
            spec = spec.with_region(region.clone());
        }
        spec
    }

    fn instance_spec(
        &self,
        cfg: &PoolConfig,
        params: &NodeParams,
        tag: &str,
        init_scripts: Vec<String>,
    ) -> InstanceSpec {
        let mut spec = InstanceSpec::new(tag, params.image.clone(), 1)
            .with_security_groups(params.security_groups.clone())
            .with_ports(params.ports_to_open.clone())
            .with_init_scripts(init_scripts);
        if let (Some(cores), Some(ram)) = (cfg.cores, cfg.ram) {
            spec = spec.with_hardware(cores, ram);
        }
        if let Some(vm_type) = &params.vm_type {
            spec = spec.with_vm_type(vm_type.clone());
        }
        if let Some(key) = &params.public_key_name {
            spec = spec.with_public_key_name(key.clone());
        }
        if let Some(price) = &params.spot_price {
            spec = spec.with_spot_price(price.clone());
        }
        spec
    }
}
