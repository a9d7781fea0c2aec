//! Error types for the orchestrator

use std::time::Duration;
use thiserror::Error;

/// Orchestrator result type
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur in the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend returned a non-success response
    #[error("backend returned {status}: {body}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Response body, truncated by the transport
        body: String,
    },

    /// The backend health check never succeeded
    #[error("provisioning backend unreachable after {attempts} attempts")]
    BackendUnavailable {
        /// Number of attempts made before giving up
        attempts: u32,
        /// The last error observed
        #[source]
        source: Box<OrchestratorError>,
    },

    /// Instance creation failed; nothing was registered for the tag
    #[error("instance with tag {tag} was not created")]
    InstanceNotCreated {
        /// Controller-chosen instance tag
        tag: String,
        /// Underlying failure
        #[source]
        source: Box<OrchestratorError>,
    },

    /// Remote script execution failed; the instance remains
    #[error("script execution failed on instance {instance_id}")]
    ScriptNotExecuted {
        /// Backend-assigned instance id
        instance_id: String,
        /// Underlying failure
        #[source]
        source: Box<OrchestratorError>,
    },

    /// Operation exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Key material for the node startup script could not be obtained
    #[error("key material error: {0}")]
    KeyMaterial(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// State store error
    #[error("state store error: {0}")]
    State(String),
}

impl OrchestratorError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a state store error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Wrap this error as an instance-creation failure for `tag`
    pub fn into_not_created(self, tag: impl Into<String>) -> Self {
        Self::InstanceNotCreated {
            tag: tag.into(),
            source: Box::new(self),
        }
    }

    /// Wrap this error as a script-execution failure on `instance_id`
    pub fn into_script_failed(self, instance_id: impl Into<String>) -> Self {
        Self::ScriptNotExecuted {
            instance_id: instance_id.into(),
            source: Box::new(self),
        }
    }

    /// Whether this is the backend's "not found" answer, which best-effort
    /// deletes treat as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Backend { status: 404, .. })
    }
}
