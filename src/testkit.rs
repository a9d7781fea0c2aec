//! Test doubles shared across module tests

use crate::api::{InfrastructureSpec, InstanceDescriptor, InstanceSpec, ScriptSpec};
use crate::client::{BackendTransport, InstanceSelector};
use crate::error::{OrchestratorError, Result};
use crate::host::NodeRuntime;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Mutex;

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    ListInfrastructures,
    CreateInfrastructure(String),
    DeleteInfrastructure(String),
    ListInstances(String),
    CreateInstances {
        infrastructure_id: String,
        tag: String,
    },
    DeleteInstance {
        infrastructure_id: String,
        key: String,
        value: String,
    },
    RunScript {
        infrastructure_id: String,
        instance_id: String,
    },
}

#[derive(Default)]
struct MockState {
    calls: Vec<BackendCall>,
    instances: Vec<InstanceDescriptor>,
    created_ids: Option<Vec<String>>,
    next_id: u32,
    health_failures: u32,
    script_failures: u32,
    create_failures: u32,
    delete_status: Option<u16>,
}

/// In-memory backend transport recording every call
///
/// Tracks created instances so `list_instances` reflects prior creates, the
/// way the real backend does. Failure injection is per-operation with a
/// remaining-failure counter; `u32::MAX` fails forever.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    /// Tags of `CreateInstances` calls, in order
    pub fn created_tags(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::CreateInstances { tag, .. } => Some(tag.clone()),
                _ => None,
            })
            .collect()
    }

    /// Force the ids returned by the next creates instead of auto-generated ones
    pub fn set_created_ids(&self, ids: Vec<String>) {
        self.state.lock().unwrap().created_ids = Some(ids);
    }

    /// Fail the next `n` health checks with 503
    pub fn fail_health_checks(&self, n: u32) {
        self.state.lock().unwrap().health_failures = n;
    }

    /// Fail the next `n` script executions with 500
    pub fn fail_scripts(&self, n: u32) {
        self.state.lock().unwrap().script_failures = n;
    }

    /// Fail the next `n` instance creations with 500
    pub fn fail_creates(&self, n: u32) {
        self.state.lock().unwrap().create_failures = n;
    }

    /// All deletes answer 404
    pub fn fail_deletes_with_not_found(&self) {
        self.state.lock().unwrap().delete_status = Some(404);
    }

    /// All deletes answer the given status
    pub fn fail_deletes_with_status(&self, status: u16) {
        self.state.lock().unwrap().delete_status = Some(status);
    }

    fn backend_error(status: u16) -> OrchestratorError {
        OrchestratorError::Backend {
            status,
            body: String::new(),
        }
    }

    fn take_failure(counter: &mut u32) -> bool {
        match *counter {
            0 => false,
            u32::MAX => true,
            ref mut n => {
                *n -= 1;
                true
            }
        }
    }
}

#[async_trait]
impl BackendTransport for MockTransport {
    async fn list_infrastructures(&self) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BackendCall::ListInfrastructures);
        if Self::take_failure(&mut state.health_failures) {
            return Err(Self::backend_error(503));
        }
        Ok(json!([]))
    }

    async fn create_infrastructure(&self, spec: &InfrastructureSpec) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(BackendCall::CreateInfrastructure(spec.id.clone()));
        Ok(())
    }

    async fn delete_infrastructure(&self, infrastructure_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(BackendCall::DeleteInfrastructure(infrastructure_id.to_string()));
        if let Some(status) = state.delete_status {
            return Err(Self::backend_error(status));
        }
        state.instances.clear();
        Ok(())
    }

    async fn list_instances(&self, infrastructure_id: &str) -> Result<Vec<InstanceDescriptor>> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(BackendCall::ListInstances(infrastructure_id.to_string()));
        Ok(state.instances.clone())
    }

    async fn create_instances(
        &self,
        infrastructure_id: &str,
        spec: &InstanceSpec,
    ) -> Result<Vec<InstanceDescriptor>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BackendCall::CreateInstances {
            infrastructure_id: infrastructure_id.to_string(),
            tag: spec.tag.clone(),
        });
        if Self::take_failure(&mut state.create_failures) {
            return Err(Self::backend_error(500));
        }

        let count = spec.number_of_instances.max(1);
        let mut created = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = match &mut state.created_ids {
                Some(ids) if !ids.is_empty() => ids.remove(0),
                _ => {
                    state.next_id += 1;
                    format!("i-{}", state.next_id)
                }
            };
            created.push(InstanceDescriptor {
                id,
                tag: spec.tag.clone(),
                image: Some(spec.image.clone()),
                status: Some("RUNNING".to_string()),
                public_addresses: vec![],
            });
        }
        state.instances.extend(created.clone());
        Ok(created)
    }

    async fn delete_instance(
        &self,
        infrastructure_id: &str,
        selector: InstanceSelector<'_>,
    ) -> Result<()> {
        let (key, value) = selector.query();
        let mut state = self.state.lock().unwrap();
        state.calls.push(BackendCall::DeleteInstance {
            infrastructure_id: infrastructure_id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        if let Some(status) = state.delete_status {
            return Err(Self::backend_error(status));
        }
        match selector {
            InstanceSelector::Id(id) => state.instances.retain(|d| d.id != id),
            InstanceSelector::Tag(tag) => state.instances.retain(|d| d.tag != tag),
        }
        Ok(())
    }

    async fn run_script(
        &self,
        infrastructure_id: &str,
        instance_id: &str,
        _spec: &ScriptSpec,
    ) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BackendCall::RunScript {
            infrastructure_id: infrastructure_id.to_string(),
            instance_id: instance_id.to_string(),
        });
        if Self::take_failure(&mut state.script_failures) {
            return Err(Self::backend_error(500));
        }
        Ok(json!({"output": ""}))
    }
}

/// [`NodeRuntime`] recording kill requests, optionally failing them
#[derive(Default)]
pub struct RecordingRuntime {
    pub kills: Mutex<Vec<String>>,
    pub fail: bool,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            kills: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl NodeRuntime for RecordingRuntime {
    async fn kill_node(&self, name: &str) -> Result<()> {
        self.kills.lock().unwrap().push(name.to_string());
        if self.fail {
            return Err(OrchestratorError::config("no route to node"));
        }
        Ok(())
    }
}
