//! Infrastructure orchestration
//!
//! Stateless translation from high-level intent (pool config, tag, node
//! shape) into provisioning requests. Holds the backend client and the
//! provider capability implementation, nothing else; all pool state lives
//! with the controller.
//!
//! Callers of this layer never see raw transport errors: creation failures
//! come back as [`OrchestratorError::InstanceNotCreated`] and script failures
//! as [`OrchestratorError::ScriptNotExecuted`], each carrying the cause.

use crate::api::{ScriptCredentials, ScriptSpec};
use crate::client::BackendClient;
use crate::config::{NodeParams, PoolConfig};
use crate::error::Result;
use crate::provider::Provider;
use std::sync::Arc;
use tracing::{info, warn};

/// Stateless request-building and delegation layer over the backend client
#[derive(Clone)]
pub struct InfrastructureOrchestrator {
    client: BackendClient,
    provider: Arc<dyn Provider>,
}

impl InfrastructureOrchestrator {
    /// Create an orchestrator over a client and a provider implementation
    pub fn new(client: BackendClient, provider: Arc<dyn Provider>) -> Self {
        Self { client, provider }
    }

    /// Block until the provisioning backend is reachable
    pub async fn wait_until_ready(&self) -> Result<()> {
        self.client.wait_until_ready().await
    }

    /// Create the pool's infrastructure (idempotent delete-then-create)
    pub async fn create_infrastructure(&self, cfg: &PoolConfig) -> Result<()> {
        let spec = self.provider.infrastructure_spec(cfg);
        info!(
            infrastructure_id = %spec.id,
            infrastructure_type = %spec.infrastructure_type,
            destroy_on_shutdown = spec.destroy_on_shutdown,
            "creating infrastructure"
        );
        self.client.create_infrastructure(&spec).await?;
        info!(infrastructure_id = %spec.id, "infrastructure created");
        Ok(())
    }

    /// Create the instances for one tag, deduplicating against existing ones
    ///
    /// Lists the backend's instances first so dedup-by-tag holds even across
    /// process restarts; any failure is wrapped into `InstanceNotCreated`.
    pub async fn create_instances(
        &self,
        cfg: &PoolConfig,
        params: &NodeParams,
        tag: &str,
        init_scripts: Vec<String>,
    ) -> Result<Vec<String>> {
        let spec = self.provider.instance_spec(cfg, params, tag, init_scripts);
        let result = async {
            let existing = self.client.list_instances(&cfg.infrastructure_id).await?;
            info!(
                infrastructure_id = %cfg.infrastructure_id,
                existing = existing.len(),
                tag = %tag,
                "requesting instance creation"
            );
            self.client
                .create_instances_if_absent(&cfg.infrastructure_id, tag, &spec, &existing)
                .await
        }
        .await;

        match result {
            Ok(ids) => {
                info!(tag = %tag, ids = ?ids, "instances created");
                Ok(ids)
            }
            Err(e) => Err(e.into_not_created(tag)),
        }
    }

    /// Run a script on an instance without credentials
    pub async fn run_script(
        &self,
        infrastructure_id: &str,
        instance_id: &str,
        scripts: Vec<String>,
    ) -> Result<()> {
        self.execute(infrastructure_id, instance_id, ScriptSpec::new(scripts))
            .await
    }

    /// Run a script with username/password authentication
    pub async fn run_script_with_credentials(
        &self,
        infrastructure_id: &str,
        instance_id: &str,
        scripts: Vec<String>,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let spec = ScriptSpec::new(scripts)
            .with_credentials(ScriptCredentials::password(username, password));
        self.execute(infrastructure_id, instance_id, spec).await
    }

    /// Run a script with key authentication
    pub async fn run_script_with_key(
        &self,
        infrastructure_id: &str,
        instance_id: &str,
        scripts: Vec<String>,
        username: &str,
        private_key: &str,
    ) -> Result<()> {
        let spec =
            ScriptSpec::new(scripts).with_credentials(ScriptCredentials::key(username, private_key));
        self.execute(infrastructure_id, instance_id, spec).await
    }

    async fn execute(
        &self,
        infrastructure_id: &str,
        instance_id: &str,
        spec: ScriptSpec,
    ) -> Result<()> {
        info!(instance_id = %instance_id, "executing script on instance");
        match self
            .client
            .run_script(infrastructure_id, instance_id, &spec)
            .await
        {
            Ok(output) => {
                info!(instance_id = %instance_id, output = %output, "script executed");
                Ok(())
            }
            Err(e) => Err(e.into_script_failed(instance_id)),
        }
    }

    /// Delete the whole infrastructure; "not found" is success
    pub async fn terminate_infrastructure(&self, infrastructure_id: &str) -> Result<()> {
        info!(infrastructure_id = %infrastructure_id, "deleting infrastructure and its instances");
        self.client.delete_infrastructure(infrastructure_id).await
    }

    /// Delete one instance by backend id
    pub async fn terminate_instance(&self, infrastructure_id: &str, instance_id: &str) -> Result<()> {
        info!(instance_id = %instance_id, "deleting instance");
        self.client
            .delete_instance(infrastructure_id, instance_id)
            .await
    }

    /// Delete all instances under a tag
    ///
    /// Best-effort: failures are logged, never propagated — reclamation must
    /// make forward progress even when the remote side is already gone.
    pub async fn terminate_instance_by_tag(&self, infrastructure_id: &str, tag: &str) {
        info!(tag = %tag, "deleting instance by tag");
        if let Err(e) = self
            .client
            .delete_instances_by_tag(infrastructure_id, tag)
            .await
        {
            warn!(tag = %tag, error = %e, "instance deletion failed, leaving it to the backend");
        }
    }

    /// List the backend's instances for an infrastructure
    pub async fn list_instances(
        &self,
        infrastructure_id: &str,
    ) -> Result<Vec<crate::api::InstanceDescriptor>> {
        self.client.list_instances(infrastructure_id).await
    }
}
