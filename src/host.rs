//! Host resource-manager interfaces
//!
//! The controller runs on behalf of a cluster resource manager and talks to
//! it through three narrow contracts: the deploying-node registry, the remote
//! node runtime, and the startup-script provider. The controller works
//! through these interfaces only, never concrete host types.

use crate::config::PoolConfig;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A node as seen by the host's lifecycle callbacks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    /// Node name, unique within the pool
    pub name: String,
    /// Tag of the instance hosting the node
    pub instance_tag: String,
}

impl NodeHandle {
    /// Create a handle
    pub fn new(name: impl Into<String>, instance_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_tag: instance_tag.into(),
        }
    }
}

/// The host's deploying-node registry
///
/// A deploying node is expected-but-not-yet-confirmed and expires after its
/// timeout; confirmation moves it out of deploying state.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Register a node as deploying, with an expiry timeout
    async fn register_deploying(
        &self,
        name: &str,
        reason: &str,
        description: &str,
        timeout: Duration,
    ) -> Result<()>;

    /// Mark a deploying node as acquired
    async fn confirm_acquired(&self, name: &str) -> Result<()>;

    /// Remove a node from the registry, whatever its state
    async fn unregister(&self, name: &str) -> Result<()>;
}

/// The host's handle on a node's remote process
#[async_trait]
pub trait NodeRuntime: Send + Sync {
    /// Terminate the process hosting a node; best-effort, callers log failures
    async fn kill_node(&self, name: &str) -> Result<()>;
}

/// Builds the per-instance node startup script
///
/// A key-material failure here must not abort instance creation: the
/// controller falls back to an empty script list.
pub trait ScriptGenerator: Send + Sync {
    /// Build the startup script lines for `node_count` nodes on one instance
    fn build_startup_script(
        &self,
        instance_tag: &str,
        node_base_name: &str,
        node_count: u32,
        cfg: &PoolConfig,
    ) -> Result<Vec<String>>;
}

/// Registration state of a node in the in-memory registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Registered, waiting to report in; carries an expiry deadline
    Deploying,
    /// Confirmed by the runtime
    Acquired,
}

#[derive(Debug, Clone)]
struct RegisteredNode {
    status: NodeStatus,
    deadline: DateTime<Utc>,
}

/// In-memory [`NodeRegistry`]
///
/// Used by the CLI host and by tests. Deploying entries past their deadline
/// are dropped when observed.
#[derive(Default)]
pub struct InMemoryRegistry {
    nodes: Mutex<HashMap<String, RegisteredNode>>,
}

impl InMemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of a node, dropping it first if its deploying deadline passed
    pub fn status(&self, name: &str) -> Option<NodeStatus> {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get(name) {
            Some(node) if node.status == NodeStatus::Deploying && node.deadline <= Utc::now() => {
                debug!(node = %name, "deploying node expired");
                nodes.remove(name);
                None
            }
            Some(node) => Some(node.status),
            None => None,
        }
    }

    /// Number of registered, unexpired nodes
    pub fn len(&self) -> usize {
        let mut nodes = self.nodes.lock().unwrap();
        let now = Utc::now();
        nodes.retain(|_, n| n.status == NodeStatus::Acquired || n.deadline > now);
        nodes.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NodeRegistry for InMemoryRegistry {
    async fn register_deploying(
        &self,
        name: &str,
        reason: &str,
        _description: &str,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Utc::now()
            + ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::seconds(0));
        info!(node = %name, reason = %reason, "deploying node registered");
        self.nodes.lock().unwrap().insert(
            name.to_string(),
            RegisteredNode {
                status: NodeStatus::Deploying,
                deadline,
            },
        );
        Ok(())
    }

    async fn confirm_acquired(&self, name: &str) -> Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(name) {
            Some(node) => node.status = NodeStatus::Acquired,
            None => {
                // Late confirmation after expiry; track it anyway
                nodes.insert(
                    name.to_string(),
                    RegisteredNode {
                        status: NodeStatus::Acquired,
                        deadline: Utc::now(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn unregister(&self, name: &str) -> Result<()> {
        self.nodes.lock().unwrap().remove(name);
        Ok(())
    }
}

/// [`NodeRuntime`] that only logs
///
/// Stands in when the host has no channel to the remote process; kill
/// requests become log lines and the instance-level reclamation still runs.
#[derive(Default)]
pub struct LoggingRuntime;

#[async_trait]
impl NodeRuntime for LoggingRuntime {
    async fn kill_node(&self, name: &str) -> Result<()> {
        warn!(node = %name, "no remote runtime channel, node process left to the instance teardown");
        Ok(())
    }
}

/// Template-substituting [`ScriptGenerator`]
///
/// Replaces `%instance_tag%`, `%node_base_name%` and `%node_count%` in the
/// configured startup script. An empty template yields an empty script list.
#[derive(Default)]
pub struct TemplateScriptGenerator;

impl ScriptGenerator for TemplateScriptGenerator {
    fn build_startup_script(
        &self,
        instance_tag: &str,
        node_base_name: &str,
        node_count: u32,
        cfg: &PoolConfig,
    ) -> Result<Vec<String>> {
        if cfg.startup_script.is_empty() {
            return Ok(Vec::new());
        }
        let script = cfg
            .startup_script
            .replace("%instance_tag%", instance_tag)
            .replace("%node_base_name%", node_base_name)
            .replace("%node_count%", &node_count.to_string());
        Ok(script.lines().map(|l| l.to_string()).collect())
    }
}
