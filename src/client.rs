//! Resilient client for the provisioning backend
//!
//! The backend is a REST service that owns the actual IaaS API calls. This
//! module splits the client in two:
//!
//! - [`BackendTransport`]: the raw HTTP surface, one method per endpoint.
//!   [`RestBackend`] is the reqwest implementation; tests substitute their own.
//! - [`BackendClient`]: the policy layer — bounded retry, idempotent
//!   infrastructure creation, dedup-by-tag instance creation.
//!
//! ## Retry policy
//!
//! Health checks and script execution retry up to a fixed attempt ceiling with
//! a fixed delay and no jitter. Any error counts as retryable. The sleep is a
//! plain `tokio::time::sleep`, not cancellable mid-wait; callers that need a
//! hard deadline race the whole call against their own timeout.

use crate::api::{InfrastructureSpec, InstanceDescriptor, InstanceSpec, ScriptSpec};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Maximum attempts for retried backend calls
pub const MAX_RETRIES: u32 = 50;

/// Fixed delay between retry attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Maximum response body length kept in error messages
const ERROR_BODY_LIMIT: usize = 512;

/// Selects an instance for deletion, by backend id or by controller tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceSelector<'a> {
    /// Backend-assigned instance id
    Id(&'a str),
    /// Controller-chosen tag
    Tag(&'a str),
}

impl<'a> InstanceSelector<'a> {
    /// Query parameter pair for the delete endpoint
    pub fn query(&self) -> (&'static str, &'a str) {
        match self {
            Self::Id(id) => ("instanceId", id),
            Self::Tag(tag) => ("instanceTag", tag),
        }
    }
}

/// Raw HTTP surface of the provisioning backend
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// List all infrastructures; doubles as the health probe
    async fn list_infrastructures(&self) -> Result<Value>;

    /// Create an infrastructure
    async fn create_infrastructure(&self, spec: &InfrastructureSpec) -> Result<()>;

    /// Delete an infrastructure and everything under it
    async fn delete_infrastructure(&self, infrastructure_id: &str) -> Result<()>;

    /// List instances of an infrastructure
    async fn list_instances(&self, infrastructure_id: &str) -> Result<Vec<InstanceDescriptor>>;

    /// Create instances; returns the backend's descriptors for them
    async fn create_instances(
        &self,
        infrastructure_id: &str,
        spec: &InstanceSpec,
    ) -> Result<Vec<InstanceDescriptor>>;

    /// Delete one instance (or all instances of a tag)
    async fn delete_instance(
        &self,
        infrastructure_id: &str,
        selector: InstanceSelector<'_>,
    ) -> Result<()>;

    /// Run a script on an instance; returns the script output body
    async fn run_script(
        &self,
        infrastructure_id: &str,
        instance_id: &str,
        spec: &ScriptSpec,
    ) -> Result<Value>;
}

/// reqwest implementation of [`BackendTransport`]
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
}

impl RestBackend {
    /// Create a transport for the backend at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "created backend transport");
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-success response into a backend error with a bounded body
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(ERROR_BODY_LIMIT)
            .collect();
        Err(OrchestratorError::Backend {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl BackendTransport for RestBackend {
    async fn list_infrastructures(&self) -> Result<Value> {
        let response = self.client.get(self.url("/infrastructures")).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn create_infrastructure(&self, spec: &InfrastructureSpec) -> Result<()> {
        let response = self
            .client
            .post(self.url("/infrastructures"))
            .json(spec)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_infrastructure(&self, infrastructure_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/infrastructures/{}", infrastructure_id)))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_instances(&self, infrastructure_id: &str) -> Result<Vec<InstanceDescriptor>> {
        let response = self
            .client
            .get(self.url(&format!("/infrastructures/{}/instances", infrastructure_id)))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn create_instances(
        &self,
        infrastructure_id: &str,
        spec: &InstanceSpec,
    ) -> Result<Vec<InstanceDescriptor>> {
        let response = self
            .client
            .post(self.url(&format!("/infrastructures/{}/instances", infrastructure_id)))
            .json(spec)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete_instance(
        &self,
        infrastructure_id: &str,
        selector: InstanceSelector<'_>,
    ) -> Result<()> {
        let (key, value) = selector.query();
        let response = self
            .client
            .delete(self.url(&format!("/infrastructures/{}/instances", infrastructure_id)))
            .query(&[(key, value)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn run_script(
        &self,
        infrastructure_id: &str,
        instance_id: &str,
        spec: &ScriptSpec,
    ) -> Result<Value> {
        let response = self
            .client
            .post(self.url(&format!(
                "/infrastructures/{}/instances/scripts",
                infrastructure_id
            )))
            .query(&[("instanceId", instance_id)])
            .json(spec)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

/// Policy layer over the backend transport
///
/// Owns the retry discipline and the idempotency contracts the controller
/// relies on. Cloning is cheap; the transport is shared.
#[derive(Clone)]
pub struct BackendClient {
    transport: Arc<dyn BackendTransport>,
    max_retries: u32,
    retry_delay: Duration,
}

impl BackendClient {
    /// Create a client with the standard retry policy
    pub fn new(transport: Arc<dyn BackendTransport>) -> Self {
        Self {
            transport,
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Override the retry policy (tests, or callers with tighter budgets)
    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Block until the backend answers its health probe
    ///
    /// Retries up to the attempt ceiling with the fixed delay; on exhaustion
    /// fails with [`OrchestratorError::BackendUnavailable`] carrying the last
    /// error.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.transport.list_infrastructures().await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        error!(attempts = attempt, error = %e, "backend never became ready");
                        return Err(OrchestratorError::BackendUnavailable {
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    debug!(attempt, error = %e, "backend not ready, will retry");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Create an infrastructure with a known-clean starting state
    ///
    /// The backend has no upsert, so any infrastructure with the same id is
    /// deleted first; "not found" on that delete is the normal case.
    pub async fn create_infrastructure(&self, spec: &InfrastructureSpec) -> Result<()> {
        match self.transport.delete_infrastructure(&spec.id).await {
            Ok(()) => debug!(infrastructure_id = %spec.id, "deleted previous infrastructure"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(
                infrastructure_id = %spec.id,
                error = %e,
                "could not delete previous infrastructure, creating anyway"
            ),
        }
        self.transport.create_infrastructure(spec).await
    }

    /// List all instances known to the backend for an infrastructure
    pub async fn list_instances(&self, infrastructure_id: &str) -> Result<Vec<InstanceDescriptor>> {
        self.transport.list_instances(infrastructure_id).await
    }

    /// Create instances unless the tag already exists
    ///
    /// The dedup key is the controller-chosen tag, not the backend id: tags
    /// are stable across retries while backend ids are not known in advance.
    /// When `existing` already carries instances with this tag, their ids are
    /// returned without a backend call.
    pub async fn create_instances_if_absent(
        &self,
        infrastructure_id: &str,
        tag: &str,
        spec: &InstanceSpec,
        existing: &[InstanceDescriptor],
    ) -> Result<Vec<String>> {
        let existing_ids: Vec<String> = existing
            .iter()
            .filter(|d| d.tag == tag)
            .map(|d| d.id.clone())
            .collect();

        if !existing_ids.is_empty() {
            info!(
                tag = %tag,
                count = existing_ids.len(),
                "instances already exist for tag, skipping create"
            );
            return Ok(existing_ids);
        }

        let created = self
            .transport
            .create_instances(infrastructure_id, spec)
            .await?;
        Ok(created.into_iter().map(|d| d.id).collect())
    }

    /// Delete one instance by backend id; "not found" is success
    pub async fn delete_instance(&self, infrastructure_id: &str, instance_id: &str) -> Result<()> {
        self.delete(infrastructure_id, InstanceSelector::Id(instance_id))
            .await
    }

    /// Delete all instances of a tag; "not found" is success
    pub async fn delete_instances_by_tag(&self, infrastructure_id: &str, tag: &str) -> Result<()> {
        self.delete(infrastructure_id, InstanceSelector::Tag(tag))
            .await
    }

    async fn delete(
        &self,
        infrastructure_id: &str,
        selector: InstanceSelector<'_>,
    ) -> Result<()> {
        match self.transport.delete_instance(infrastructure_id, selector).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(?selector, "instance already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a whole infrastructure; "not found" is success
    pub async fn delete_infrastructure(&self, infrastructure_id: &str) -> Result<()> {
        match self.transport.delete_infrastructure(infrastructure_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(infrastructure_id = %infrastructure_id, "infrastructure already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run a script on an instance, with the bounded retry policy
    pub async fn run_script(
        &self,
        infrastructure_id: &str,
        instance_id: &str,
        spec: &ScriptSpec,
    ) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            match self
                .transport
                .run_script(infrastructure_id, instance_id, spec)
                .await
            {
                Ok(output) => return Ok(output),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        error!(
                            instance_id = %instance_id,
                            attempts = attempt,
                            error = %e,
                            "script execution retries exhausted"
                        );
                        return Err(e);
                    }
                    debug!(instance_id = %instance_id, attempt, "script execution failed, will retry");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}
