//! Node-pool controller
//!
//! The state machine that elastically grows and shrinks a pool of worker
//! nodes hosted on provisioned instances:
//!
//! ```text
//! scale request
//!     │
//!     ├── 1. Try the exclusive scaling lock (bounded); busy ⇒ drop request
//!     │
//!     ├── 2. Size the deficit in whole instances, capped by the pool max
//!     │
//!     ├── 3. Lazily initialize the infrastructure (idempotent)
//!     │
//!     ├── 4. Per instance: mint tag, register deploying nodes, create
//!     │
//!     ├── 5. Wait (cancellable, bounded) for nodes to report in
//!     │
//!     └── 6. On deadline: roll back instances and node registrations
//! ```
//!
//! Scaling decisions never shrink the pool; shrinkage happens solely through
//! [`remove_node`](NodePoolController::remove_node) reclamation, which
//! terminates an instance when its last bound node disappears.
//!
//! All map/counter mutations run inside the state store's single-writer
//! critical section, so node callbacks arriving during an in-flight rollback
//! cannot tear the persisted state.

use crate::config::{NodeOverrides, PoolConfig};
use crate::error::Result;
use crate::host::{NodeHandle, NodeRegistry, NodeRuntime, ScriptGenerator};
use crate::orchestrator::InfrastructureOrchestrator;
use crate::state::StateStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why deploying nodes are registered
const DEPLOYING_REASON: &str = "Initiated by the node pool controller";

/// Registry description for deploying nodes
const DEPLOYING_DESCRIPTION: &str = "Nodes running in pool compute instances";

/// Outcome of a scale-out request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The pool is already converging; the request was dropped
    Busy,
    /// No new instances were needed (deficit zero or pool at its cap)
    Satisfied,
    /// Instances deployed and all their nodes reported in
    Deployed {
        /// Instances created
        instances: u32,
        /// Nodes registered and confirmed
        nodes: u32,
    },
    /// Nodes missed the registration deadline; the capacity was rolled back
    RolledBack {
        /// Instances created and deleted again
        instances: u32,
    },
}

/// The node-pool state machine
pub struct NodePoolController {
    cfg: PoolConfig,
    orchestrator: InfrastructureOrchestrator,
    state: Arc<StateStore>,
    registry: Arc<dyn NodeRegistry>,
    runtime: Arc<dyn NodeRuntime>,
    scripts: Arc<dyn ScriptGenerator>,
    /// Exclusive scaling lock: at most one scale-out in flight per pool
    scaling: Mutex<()>,
    initialized: AtomicBool,
}

impl NodePoolController {
    /// Assemble a controller from its collaborators
    pub fn new(
        cfg: PoolConfig,
        orchestrator: InfrastructureOrchestrator,
        state: Arc<StateStore>,
        registry: Arc<dyn NodeRegistry>,
        runtime: Arc<dyn NodeRuntime>,
        scripts: Arc<dyn ScriptGenerator>,
    ) -> Self {
        Self {
            cfg,
            orchestrator,
            state,
            registry,
            runtime,
            scripts,
            scaling: Mutex::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// The pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.cfg
    }

    /// Single-pass scale to the configured size
    ///
    /// Creates the full configured instance count and declares their nodes as
    /// deploying on supervised tasks, without waiting for registration.
    pub async fn acquire_node(&self) -> Result<()> {
        let params = NodeOverrides::default().resolve(&self.cfg);

        self.orchestrator.wait_until_ready().await?;
        self.orchestrator.create_infrastructure(&self.cfg).await?;

        for _ in 0..self.cfg.number_of_instances {
            let tag = self.mint_tag();
            let scripts = self.build_scripts(&tag);
            info!(tag = %tag, "deploying instance");
            self.orchestrator
                .create_instances(&self.cfg, &params, &tag, scripts)
                .await?;

            // Declare deploying nodes without blocking the caller; the task
            // is supervised so a failure surfaces in the logs.
            let registry = self.registry.clone();
            let count = self.cfg.nodes_per_instance;
            let delay = self.cfg.nodes_init_delay();
            let handle = tokio::spawn(async move {
                declare_deploying(registry.as_ref(), &tag, count, delay).await
            });
            tokio::spawn(async move {
                match handle.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(error = %e, "deploying-node declaration failed"),
                    Err(e) => error!(error = %e, "deploying-node declaration task aborted"),
                }
            });
        }
        Ok(())
    }

    /// Single-pass scale to the configured size
    pub async fn acquire_all_nodes(&self) -> Result<()> {
        self.acquire_node().await
    }

    /// Concurrency-guarded scale-out
    ///
    /// Tries the pool's exclusive scaling lock for at most `start_timeout`;
    /// failure to acquire it is not an error, the request is dropped and the
    /// caller's control loop is expected to re-issue it.
    pub async fn acquire_nodes(
        &self,
        requested: u32,
        start_timeout: Duration,
        overrides: &NodeOverrides,
    ) -> Result<AcquireOutcome> {
        let Ok(_guard) = tokio::time::timeout(start_timeout, self.scaling.lock()).await else {
            info!("scale-out skipped because the pool is busy");
            return Ok(AcquireOutcome::Busy);
        };
        self.scale_out(requested, overrides).await
        // _guard dropped here, on success and on error alike
    }

    async fn scale_out(
        &self,
        requested: u32,
        overrides: &NodeOverrides,
    ) -> Result<AcquireOutcome> {
        let (acquired, instance_count) = self
            .state
            .read(|s| (s.acquired_nodes, s.instance_count()))?;

        let to_deploy = instances_to_deploy(
            requested,
            acquired,
            instance_count,
            self.cfg.number_of_instances,
            self.cfg.nodes_per_instance,
        );
        if to_deploy == 0 {
            info!(
                requested,
                acquired, "pool already satisfies the request, nothing to deploy"
            );
            return Ok(AcquireOutcome::Satisfied);
        }

        self.ensure_initialized().await?;

        let params = overrides.resolve(&self.cfg);
        let mut deployed: Vec<(String, Vec<String>)> = Vec::new();
        let mut new_nodes = 0u32;

        for _ in 0..to_deploy {
            let tag = self.mint_tag();
            info!(
                tag = %tag,
                nodes = self.cfg.nodes_per_instance,
                "deploying instance"
            );

            let scripts = self.build_scripts(&tag);

            // Deploying nodes are registered before the creation call is
            // acknowledged: a crash mid-deploy leaves tracked, expirable
            // nodes rather than an untracked instance.
            let node_names = declare_deploying(
                self.registry.as_ref(),
                &tag,
                self.cfg.nodes_per_instance,
                self.cfg.nodes_init_delay(),
            )
            .await?;

            match self
                .orchestrator
                .create_instances(&self.cfg, &params, &tag, scripts)
                .await
            {
                Ok(_) => {
                    new_nodes += node_names.len() as u32;
                    deployed.push((tag, node_names));
                }
                Err(e) => {
                    for name in &node_names {
                        if let Err(unreg) = self.registry.unregister(name).await {
                            warn!(node = %name, error = %unreg, "could not drop deploying node");
                        }
                    }
                    return Err(e);
                }
            }
        }

        if self.wait_for_nodes(acquired + new_nodes as u64).await? {
            info!(instances = to_deploy, nodes = new_nodes, "scale-out complete");
            Ok(AcquireOutcome::Deployed {
                instances: to_deploy,
                nodes: new_nodes,
            })
        } else {
            info!("deployed instances and nodes will be removed");
            self.roll_back(&deployed).await;
            Ok(AcquireOutcome::RolledBack {
                instances: to_deploy,
            })
        }
    }

    /// Lazy one-time initialization of the pool's infrastructure
    async fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        // Persist the (possibly empty) variable set so a restart finds it
        self.state.run_exclusive(|_| ())?;

        self.orchestrator.wait_until_ready().await?;
        self.orchestrator.create_infrastructure(&self.cfg).await?;
        info!(infrastructure_id = %self.cfg.infrastructure_id, "infrastructure initialized");

        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Wait for the acquired-node count to reach `target`
    ///
    /// The wait runs on its own task and is cancelled when the registration
    /// deadline expires; returns whether the target was reached.
    async fn wait_for_nodes(&self, target: u64) -> Result<bool> {
        let state = self.state.clone();
        let poll = self.cfg.node_wait_poll();

        let mut waiter = tokio::spawn(async move {
            loop {
                match state.read(|s| s.acquired_nodes) {
                    Ok(acquired) if acquired >= target => return,
                    Ok(acquired) => {
                        debug!(missing = target - acquired, "waiting for nodes to report in")
                    }
                    Err(e) => warn!(error = %e, "state read failed while waiting for nodes"),
                }
                tokio::time::sleep(poll).await;
            }
        });

        match tokio::time::timeout(self.cfg.nodes_init_delay(), &mut waiter).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => {
                warn!(error = %e, "node wait task failed");
                Ok(self.state.read(|s| s.acquired_nodes)? >= target)
            }
            Err(_) => {
                waiter.abort();
                warn!(
                    target,
                    deadline_ms = self.cfg.nodes_init_delay_ms,
                    "nodes did not report in before the deadline"
                );
                Ok(false)
            }
        }
    }

    /// Remove everything a timed-out scale-out deployed
    ///
    /// Nodes that did register are removed like any normal node removal; the
    /// rest expire in the registry. The tagged instance delete is issued
    /// unconditionally per instance — double deletion is tolerated by the
    /// backend contract.
    async fn roll_back(&self, deployed: &[(String, Vec<String>)]) {
        let rollbacks = deployed.iter().map(|(tag, nodes)| async move {
            for name in nodes {
                if let Err(e) = self.registry.unregister(name).await {
                    warn!(node = %name, error = %e, "could not unregister node during rollback");
                }
                match self.state.run_exclusive(|s| s.remove_node(tag, name)) {
                    Ok(removal) if removal.removed => {
                        info!(node = %name, "removed node during rollback")
                    }
                    Ok(_) => debug!(node = %name, "node never registered, nothing to remove"),
                    Err(e) => warn!(node = %name, error = %e, "state update failed during rollback"),
                }
            }
            self.orchestrator
                .terminate_instance_by_tag(&self.cfg.infrastructure_id, tag)
                .await;
        });
        futures::future::join_all(rollbacks).await;
    }

    /// Callback: a deployed node finished registering with the host
    ///
    /// Idempotent; re-notification of an already-present node is a no-op.
    pub async fn notify_acquired_node(&self, node: &NodeHandle) -> Result<()> {
        let inserted = self
            .state
            .run_exclusive(|s| s.add_node(&node.instance_tag, &node.name))?;
        if !inserted {
            debug!(node = %node.name, "node already registered");
            return Ok(());
        }
        if let Err(e) = self.registry.confirm_acquired(&node.name).await {
            warn!(node = %node.name, error = %e, "could not confirm node in the registry");
        }
        info!(node = %node.name, instance_tag = %node.instance_tag, "node acquired");
        Ok(())
    }

    /// Callback: a node died or was shut down
    ///
    /// Best-effort kills the remote process, then unconditionally updates
    /// persisted state. An instance whose last node is removed is reclaimed
    /// when eager reclamation is enabled. An unknown instance tag means the
    /// node was never registered or was already reclaimed — logged, no-op.
    pub async fn remove_node(&self, node: &NodeHandle) -> Result<()> {
        if let Err(e) = self.runtime.kill_node(&node.name).await {
            warn!(node = %node.name, error = %e, "could not kill remote node process");
        }
        if let Err(e) = self.registry.unregister(&node.name).await {
            warn!(node = %node.name, error = %e, "could not unregister node");
        }

        let removal = self
            .state
            .run_exclusive(|s| s.remove_node(&node.instance_tag, &node.name))?;

        if !removal.removed {
            error!(
                node = %node.name,
                instance_tag = %node.instance_tag,
                "cannot remove node because its instance is not registered"
            );
            return Ok(());
        }
        info!(node = %node.name, "node removed");

        if removal.instance_empty {
            if self.cfg.eager_reclaim {
                self.orchestrator
                    .terminate_instance_by_tag(&self.cfg.infrastructure_id, &node.instance_tag)
                    .await;
                info!(instance_tag = %node.instance_tag, "instance terminated after last node removal");
            }
            info!(instance_tag = %node.instance_tag, "instance removed from the pool");
        }
        Ok(())
    }

    /// Tear down the whole infrastructure and all its instances
    ///
    /// Safe to call even when the pool was never initialized.
    pub async fn shut_down(&self) -> Result<()> {
        info!(
            infrastructure_id = %self.cfg.infrastructure_id,
            "deleting infrastructure and its underlying instances"
        );
        self.orchestrator
            .terminate_infrastructure(&self.cfg.infrastructure_id)
            .await
    }

    /// Mint a unique, stable instance tag
    fn mint_tag(&self) -> String {
        format!(
            "{}-{}",
            self.cfg.infrastructure_id,
            Uuid::new_v4().simple()
        )
    }

    /// Build the startup script, falling back to an empty list on key errors
    fn build_scripts(&self, tag: &str) -> Vec<String> {
        match self
            .scripts
            .build_startup_script(tag, tag, self.cfg.nodes_per_instance, &self.cfg)
        {
            Ok(scripts) => scripts,
            Err(e) => {
                error!(
                    error = %e,
                    "could not build the node startup script, proceeding with an empty script"
                );
                Vec::new()
            }
        }
    }
}

/// Register `count` deploying nodes for an instance tag
///
/// Node names follow the instance tag: the tag itself for a single node,
/// `{tag}_{index}` otherwise.
async fn declare_deploying(
    registry: &dyn NodeRegistry,
    tag: &str,
    count: u32,
    timeout: Duration,
) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(count as usize);
    for index in 0..count {
        let name = if count == 1 {
            tag.to_string()
        } else {
            format!("{tag}_{index}")
        };
        registry
            .register_deploying(&name, DEPLOYING_REASON, DEPLOYING_DESCRIPTION, timeout)
            .await?;
        debug!(node = %name, "deploying node declared");
        names.push(name);
    }
    Ok(names)
}

/// Number of whole instances needed to raise the node count to `requested`
///
/// Ceiling division of the deficit first, then the cap: a request that does
/// not divide evenly still gets its partial instance when headroom exists,
/// and the cap is enforced on whole instances.
fn instances_to_deploy(
    requested: u32,
    acquired: u64,
    current_instances: u32,
    max_instances: u32,
    nodes_per_instance: u32,
) -> u32 {
    let nodes_per_instance = u64::from(nodes_per_instance.max(1));
    let needed = u64::from(requested).saturating_sub(acquired);
    if needed == 0 {
        return 0;
    }
    let raw = needed.div_ceil(nodes_per_instance) as u32;
    raw.min(max_instances.saturating_sub(current_instances))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BackendClient;
    use crate::config::ProviderKind;
    use crate::error::OrchestratorError;
    use crate::host::{InMemoryRegistry, NodeStatus, TemplateScriptGenerator};
    use crate::provider;
    use crate::testkit::{BackendCall, MockTransport, RecordingRuntime};

    struct Harness {
        controller: Arc<NodePoolController>,
        transport: Arc<MockTransport>,
        registry: Arc<InMemoryRegistry>,
        runtime: Arc<RecordingRuntime>,
    }

    /// Pool of 3 instances × 2 nodes with test-sized timings
    fn harness(nodes_init_delay: Duration) -> Harness {
        harness_with_runtime(nodes_init_delay, RecordingRuntime::new())
    }

    fn harness_with_runtime(nodes_init_delay: Duration, runtime: RecordingRuntime) -> Harness {
        let transport = Arc::new(MockTransport::new());
        let client =
            BackendClient::new(transport.clone()).with_retry(2, Duration::from_millis(1));
        let orchestrator =
            InfrastructureOrchestrator::new(client, provider::for_kind(ProviderKind::Generic));
        let registry = Arc::new(InMemoryRegistry::new());
        let runtime = Arc::new(runtime);
        let cfg = PoolConfig::new("http://backend", "pool", "img")
            .with_pool_size(3, 2)
            .with_nodes_init_delay(nodes_init_delay)
            .with_node_wait_poll(Duration::from_millis(5));

        let controller = Arc::new(NodePoolController::new(
            cfg,
            orchestrator,
            Arc::new(StateStore::in_memory()),
            registry.clone(),
            runtime.clone(),
            Arc::new(TemplateScriptGenerator),
        ));
        Harness {
            controller,
            transport,
            registry,
            runtime,
        }
    }

    /// Wait until `instances` creations happened, then confirm the requested
    /// number of not-yet-confirmed nodes through the normal notify path.
    async fn confirm_nodes(harness: &Harness, instances: usize, nodes_to_confirm: usize) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let tags = harness.transport.created_tags();
            if tags.len() >= instances {
                let already = harness
                    .controller
                    .state
                    .read(|s| s.instance_nodes.clone())
                    .unwrap();
                let mut confirmed = 0;
                'outer: for tag in tags {
                    for index in 0..2 {
                        if confirmed == nodes_to_confirm {
                            break 'outer;
                        }
                        let name = format!("{tag}_{index}");
                        if already.get(&tag).is_some_and(|set| set.contains(&name)) {
                            continue;
                        }
                        let node = NodeHandle::new(name, tag.clone());
                        harness.controller.notify_acquired_node(&node).await.unwrap();
                        confirmed += 1;
                    }
                }
                return;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "instances were never created"
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    fn delete_by_tag_count(transport: &MockTransport, tag: &str) -> usize {
        transport.count(|c| {
            matches!(c, BackendCall::DeleteInstance { key, value, .. }
                if key == "instanceTag" && value == tag)
        })
    }

    #[test]
    fn test_sizing_rounds_up_then_caps() {
        // deficit 4 over 2-node instances
        assert_eq!(instances_to_deploy(4, 0, 0, 3, 2), 2);
        // uneven deficit rounds up
        assert_eq!(instances_to_deploy(3, 0, 0, 3, 2), 2);
        assert_eq!(instances_to_deploy(5, 2, 1, 3, 2), 2);
        // cap wins after rounding
        assert_eq!(instances_to_deploy(10, 0, 0, 3, 2), 3);
        assert_eq!(instances_to_deploy(10, 6, 3, 3, 2), 0);
        // already satisfied
        assert_eq!(instances_to_deploy(2, 4, 2, 3, 2), 0);
    }

    #[tokio::test]
    async fn test_acquire_nodes_full_success() {
        let h = harness(Duration::from_secs(2));

        let controller = h.controller.clone();
        let acquire =
            tokio::spawn(async move {
                controller
                    .acquire_nodes(4, Duration::from_millis(100), &NodeOverrides::default())
                    .await
            });

        confirm_nodes(&h, 2, 4).await;
        let outcome = acquire.await.unwrap().unwrap();

        assert_eq!(
            outcome,
            AcquireOutcome::Deployed {
                instances: 2,
                nodes: 4
            }
        );
        let (acquired, instances) = h
            .controller
            .state
            .read(|s| (s.acquired_nodes, s.instance_count()))
            .unwrap();
        assert_eq!(acquired, 4);
        assert_eq!(instances, 2);
        assert_eq!(
            h.transport
                .count(|c| matches!(c, BackendCall::CreateInstances { .. })),
            2
        );
        // every confirmed node shows as acquired in the registry
        for tag in h.transport.created_tags() {
            assert_eq!(h.registry.status(&format!("{tag}_0")), Some(NodeStatus::Acquired));
            assert_eq!(h.registry.status(&format!("{tag}_1")), Some(NodeStatus::Acquired));
        }
    }

    #[tokio::test]
    async fn test_rollback_when_no_node_confirms() {
        let h = harness(Duration::from_millis(60));

        let outcome = h
            .controller
            .acquire_nodes(4, Duration::from_millis(100), &NodeOverrides::default())
            .await
            .unwrap();

        assert_eq!(outcome, AcquireOutcome::RolledBack { instances: 2 });

        let tags = h.transport.created_tags();
        assert_eq!(tags.len(), 2);
        for tag in &tags {
            // zero confirmed nodes: only the unconditional per-instance delete
            assert_eq!(delete_by_tag_count(&h.transport, tag), 1);
        }
        let (acquired, instances) = h
            .controller
            .state
            .read(|s| (s.acquired_nodes, s.instance_count()))
            .unwrap();
        assert_eq!(acquired, 0);
        assert_eq!(instances, 0);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_with_partial_confirmation() {
        let h = harness(Duration::from_millis(250));

        let controller = h.controller.clone();
        let acquire =
            tokio::spawn(async move {
                controller
                    .acquire_nodes(4, Duration::from_millis(100), &NodeOverrides::default())
                    .await
            });

        // only 1 of the 4 expected nodes reports in
        confirm_nodes(&h, 2, 1).await;
        let outcome = acquire.await.unwrap().unwrap();

        assert_eq!(outcome, AcquireOutcome::RolledBack { instances: 2 });
        let (acquired, instances) = h
            .controller
            .state
            .read(|s| (s.acquired_nodes, s.instance_count()))
            .unwrap();
        assert_eq!(acquired, 0);
        assert_eq!(instances, 0);
        for tag in h.transport.created_tags() {
            assert!(delete_by_tag_count(&h.transport, &tag) >= 1);
        }
    }

    #[tokio::test]
    async fn test_concurrent_acquire_one_proceeds() {
        let h = harness(Duration::from_millis(80));

        let first = h.controller.clone();
        let second = h.controller.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move {
                first
                    .acquire_nodes(2, Duration::ZERO, &NodeOverrides::default())
                    .await
            }),
            tokio::spawn(async move {
                // let the first call take the lock
                tokio::time::sleep(Duration::from_millis(10)).await;
                second
                    .acquire_nodes(2, Duration::ZERO, &NodeOverrides::default())
                    .await
            }),
        );

        let outcomes = [a.unwrap().unwrap(), b.unwrap().unwrap()];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, AcquireOutcome::Busy))
                .count(),
            1
        );
        // only the winner touched the backend: one instance for a 2-node deficit
        assert_eq!(
            h.transport
                .count(|c| matches!(c, BackendCall::CreateInstances { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_acquire_noop_when_pool_at_cap() {
        let h = harness(Duration::from_millis(50));

        // fill the pool: 3 instances × 2 confirmed nodes
        for i in 0..3 {
            let tag = format!("pool-existing-{i}");
            for j in 0..2 {
                let node = NodeHandle::new(format!("{tag}_{j}"), tag.clone());
                h.controller.notify_acquired_node(&node).await.unwrap();
            }
        }

        let outcome = h
            .controller
            .acquire_nodes(10, Duration::from_millis(50), &NodeOverrides::default())
            .await
            .unwrap();

        assert_eq!(outcome, AcquireOutcome::Satisfied);
        assert_eq!(
            h.transport
                .count(|c| matches!(c, BackendCall::CreateInstances { .. })),
            0
        );
    }

    #[tokio::test]
    async fn test_create_failure_unregisters_deploying_nodes() {
        let h = harness(Duration::from_millis(50));
        h.transport.fail_creates(u32::MAX);

        let err = h
            .controller
            .acquire_nodes(2, Duration::from_millis(50), &NodeOverrides::default())
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::InstanceNotCreated { .. }));
        assert!(h.registry.is_empty());
        let acquired = h.controller.state.read(|s| s.acquired_nodes).unwrap();
        assert_eq!(acquired, 0);
    }

    #[tokio::test]
    async fn test_notify_is_idempotent() {
        let h = harness(Duration::from_millis(50));
        let node = NodeHandle::new("pool-x_0", "pool-x");

        h.controller.notify_acquired_node(&node).await.unwrap();
        h.controller.notify_acquired_node(&node).await.unwrap();

        let (acquired, nodes) = h
            .controller
            .state
            .read(|s| (s.acquired_nodes, s.total_nodes()))
            .unwrap();
        assert_eq!(acquired, 1);
        assert_eq!(nodes, 1);
    }

    #[tokio::test]
    async fn test_remove_last_node_reclaims_instance_once() {
        let h = harness(Duration::from_millis(50));
        let first = NodeHandle::new("pool-y_0", "pool-y");
        let second = NodeHandle::new("pool-y_1", "pool-y");
        h.controller.notify_acquired_node(&first).await.unwrap();
        h.controller.notify_acquired_node(&second).await.unwrap();

        h.controller.remove_node(&first).await.unwrap();
        assert_eq!(delete_by_tag_count(&h.transport, "pool-y"), 0);

        h.controller.remove_node(&second).await.unwrap();
        assert_eq!(delete_by_tag_count(&h.transport, "pool-y"), 1);

        let state = h
            .controller
            .state
            .read(|s| (s.acquired_nodes, s.instance_count()))
            .unwrap();
        assert_eq!(state, (0, 0));
        assert_eq!(h.runtime.kills.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_unknown_tag_is_logged_noop() {
        let h = harness(Duration::from_millis(50));
        let node = NodeHandle::new("ghost_0", "ghost");

        h.controller.remove_node(&node).await.unwrap();

        assert_eq!(
            h.transport
                .count(|c| matches!(c, BackendCall::DeleteInstance { .. })),
            0
        );
    }

    #[tokio::test]
    async fn test_remove_node_tolerates_kill_failure() {
        let h = harness_with_runtime(Duration::from_millis(50), RecordingRuntime::failing());
        let node = NodeHandle::new("pool-z", "pool-z");
        h.controller.notify_acquired_node(&node).await.unwrap();

        h.controller.remove_node(&node).await.unwrap();

        assert_eq!(h.runtime.kills.lock().unwrap().as_slice(), ["pool-z"]);
        assert_eq!(delete_by_tag_count(&h.transport, "pool-z"), 1);
    }

    #[tokio::test]
    async fn test_shut_down_without_initialization() {
        let h = harness(Duration::from_millis(50));
        h.controller.shut_down().await.unwrap();
        assert_eq!(
            h.transport
                .count(|c| matches!(c, BackendCall::DeleteInfrastructure(_))),
            1
        );
    }

    #[tokio::test]
    async fn test_initialization_happens_once() {
        let h = harness(Duration::from_secs(1));

        let controller = h.controller.clone();
        let first = tokio::spawn(async move {
            controller
                .acquire_nodes(2, Duration::from_millis(100), &NodeOverrides::default())
                .await
        });
        confirm_nodes(&h, 1, 2).await;
        first.await.unwrap().unwrap();

        let controller = h.controller.clone();
        let second = tokio::spawn(async move {
            controller
                .acquire_nodes(4, Duration::from_millis(100), &NodeOverrides::default())
                .await
        });
        confirm_nodes(&h, 2, 2).await;
        second.await.unwrap().unwrap();

        // delete-then-create ran exactly once despite two scale-outs
        assert_eq!(
            h.transport
                .count(|c| matches!(c, BackendCall::CreateInfrastructure(_))),
            1
        );
    }
}
