//! # Node-Pool Orchestrator
//!
//! Elastic provisioning of compute instances on an IaaS backend, binding each
//! instance to one or more logical worker nodes on behalf of a cluster
//! resource manager.
//!
//! ## Architecture
//!
//! ```text
//! Resource manager (host)        Provisioning backend (REST)
//! ├── acquire/remove/notify ──►  NodePoolController
//! │                                  │ scaling lock, persisted state,
//! │                                  │ deadline wait, rollback
//! │                                  ▼
//! │                              InfrastructureOrchestrator
//! │                                  │ intent → provider-shaped requests
//! │                                  ▼
//! └── node registry  ◄──────────  BackendClient ──► IaaS backend
//!                                     retry, idempotent create,
//!                                     dedup-by-tag
//! ```
//!
//! The controller owns the hard parts: deciding how many instances a
//! requested node count needs, driving creation and deploying-node
//! bookkeeping concurrently and safely, waiting — bounded by a deadline — for
//! nodes to report in, rolling back partially-deployed capacity on timeout,
//! and reclaiming instances when their last bound node disappears.
//!
//! The backend client is deliberately simple about failure: a fixed attempt
//! ceiling with a fixed delay, no jitter, every error retryable. Cheap to
//! reason about, costly in the worst case.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod orchestrator;
pub mod provider;
pub mod state;

#[cfg(test)]
pub(crate) mod testkit;

// ============================================================================
// Public exports - Core state machine
// ============================================================================

pub use controller::{AcquireOutcome, NodePoolController};

// Error handling
pub use error::{OrchestratorError, Result};

// ============================================================================
// Public exports - Provisioning
// ============================================================================

// Backend client
pub use client::{BackendClient, BackendTransport, InstanceSelector, RestBackend};

// Orchestration
pub use orchestrator::InfrastructureOrchestrator;

// Wire format
pub use api::{
    CredentialsSpec, InfrastructureSpec, InstanceDescriptor, InstanceSpec, ScriptCredentials,
    ScriptSpec,
};

// Provider capability interface
pub use provider::{AwsEc2Provider, GenericProvider, OpenstackProvider, Provider};

// ============================================================================
// Public exports - Configuration and collaborators
// ============================================================================

pub use config::{
    ConfigField, ConfigSchema, FieldKind, NodeOverrides, NodeParams, PoolConfig, ProviderKind,
};

pub use host::{
    InMemoryRegistry, LoggingRuntime, NodeHandle, NodeRegistry, NodeRuntime, NodeStatus,
    ScriptGenerator, TemplateScriptGenerator,
};

pub use state::{NodeRemoval, PoolState, StateStore};
