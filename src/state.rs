//! Persisted pool state
//!
//! The instance→nodes map and the acquired-node counter are the single source
//! of truth for reclamation and must survive process restarts. Both live in
//! one [`PoolState`] document, guarded by one lock: every read-modify-persist
//! runs as a single critical section through [`StateStore::run_exclusive`],
//! so concurrent node callbacks and an in-flight rollback can never interleave
//! into a torn map update.
//!
//! Persistence is a JSON file written atomically (temp file + rename). The
//! in-memory variant backs tests and ephemeral pools.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Outcome of removing a node from the map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRemoval {
    /// Whether the node was present and removed
    pub removed: bool,
    /// Whether this removal emptied the instance (its map entry was dropped)
    pub instance_empty: bool,
}

/// The persisted variables of one pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolState {
    /// Instance tag → names of the nodes confirmed on it
    ///
    /// Every key maps to a non-empty set; removing the last element removes
    /// the key.
    pub instance_nodes: HashMap<String, BTreeSet<String>>,

    /// Number of acquired nodes across all instances
    pub acquired_nodes: u64,
}

impl PoolState {
    /// Add a confirmed node under its instance tag
    ///
    /// Returns false when the node was already present (idempotent
    /// re-notification); the counter is bumped only on a fresh insert.
    pub fn add_node(&mut self, instance_tag: &str, node_name: &str) -> bool {
        let inserted = self
            .instance_nodes
            .entry(instance_tag.to_string())
            .or_default()
            .insert(node_name.to_string());
        if inserted {
            self.acquired_nodes += 1;
        }
        inserted
    }

    /// Remove a node from its instance tag
    ///
    /// Dropping the last node of an instance drops the map entry. Unknown
    /// tags and unknown nodes report `removed: false`.
    pub fn remove_node(&mut self, instance_tag: &str, node_name: &str) -> NodeRemoval {
        let Some(nodes) = self.instance_nodes.get_mut(instance_tag) else {
            return NodeRemoval {
                removed: false,
                instance_empty: false,
            };
        };
        if !nodes.remove(node_name) {
            return NodeRemoval {
                removed: false,
                instance_empty: false,
            };
        }
        if self.acquired_nodes == 0 {
            warn!(node = %node_name, "acquired-node counter would underflow, clamping");
        } else {
            self.acquired_nodes -= 1;
        }
        let instance_empty = nodes.is_empty();
        if instance_empty {
            self.instance_nodes.remove(instance_tag);
        }
        NodeRemoval {
            removed: true,
            instance_empty,
        }
    }

    /// Total nodes across all instances
    pub fn total_nodes(&self) -> u64 {
        self.instance_nodes.values().map(|s| s.len() as u64).sum()
    }

    /// Number of instances currently tracked
    pub fn instance_count(&self) -> u32 {
        self.instance_nodes.len() as u32
    }
}

struct Inner {
    state: PoolState,
    path: Option<PathBuf>,
}

/// Single-writer store for [`PoolState`]
///
/// All access goes through [`run_exclusive`](Self::run_exclusive); the
/// closure is synchronous, so nothing can await while holding the lock.
pub struct StateStore {
    inner: Mutex<Inner>,
}

impl StateStore {
    /// Open (or initialize) a store persisted at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)
                .map_err(|e| OrchestratorError::state(format!("corrupt state file: {e}")))?
        } else {
            PoolState::default()
        };
        debug!(path = %path.display(), nodes = state.total_nodes(), "state store opened");
        Ok(Self {
            inner: Mutex::new(Inner {
                state,
                path: Some(path),
            }),
        })
    }

    /// Create an ephemeral in-memory store
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: PoolState::default(),
                path: None,
            }),
        }
    }

    /// Run `f` against the state inside the critical section and persist
    ///
    /// The mutation and the write to disk happen under the same lock; the
    /// closure's return value is handed back to the caller.
    pub fn run_exclusive<T>(&self, f: impl FnOnce(&mut PoolState) -> T) -> Result<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| OrchestratorError::state("state lock poisoned"))?;
        let value = f(&mut inner.state);
        if let Some(path) = inner.path.clone() {
            persist(&path, &inner.state)?;
        }
        Ok(value)
    }

    /// Read a value from the state without mutating it
    pub fn read<T>(&self, f: impl FnOnce(&PoolState) -> T) -> Result<T> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| OrchestratorError::state("state lock poisoned"))?;
        Ok(f(&inner.state))
    }
}

/// Atomic write: temp file in the same directory, then rename over the target
fn persist(path: &Path, state: &PoolState) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_node_is_idempotent() {
        let mut state = PoolState::default();
        assert!(state.add_node("tag-1", "node-a"));
        assert!(!state.add_node("tag-1", "node-a"));
        assert_eq!(state.acquired_nodes, 1);
        assert_eq!(state.total_nodes(), 1);
    }

    #[test]
    fn test_counter_matches_map_sum() {
        let mut state = PoolState::default();
        state.add_node("tag-1", "a");
        state.add_node("tag-1", "b");
        state.add_node("tag-2", "c");
        assert_eq!(state.acquired_nodes, state.total_nodes());

        state.remove_node("tag-1", "a");
        state.remove_node("tag-2", "c");
        assert_eq!(state.acquired_nodes, state.total_nodes());
        assert_eq!(state.acquired_nodes, 1);
    }

    #[test]
    fn test_last_node_removal_drops_key() {
        let mut state = PoolState::default();
        state.add_node("tag-1", "a");
        state.add_node("tag-1", "b");

        let first = state.remove_node("tag-1", "a");
        assert!(first.removed);
        assert!(!first.instance_empty);

        let last = state.remove_node("tag-1", "b");
        assert!(last.removed);
        assert!(last.instance_empty);
        assert!(!state.instance_nodes.contains_key("tag-1"));
    }

    #[test]
    fn test_remove_unknown_tag_is_noop() {
        let mut state = PoolState::default();
        state.add_node("tag-1", "a");

        let removal = state.remove_node("tag-9", "a");
        assert!(!removal.removed);
        assert!(!removal.instance_empty);
        assert_eq!(state.acquired_nodes, 1);
    }

    #[test]
    fn test_no_empty_sets_reachable() {
        let mut state = PoolState::default();
        state.add_node("tag-1", "a");
        state.remove_node("tag-1", "a");
        assert!(state.instance_nodes.values().all(|s| !s.is_empty()));
        assert!(state.instance_nodes.is_empty());
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool-state.json");

        {
            let store = StateStore::open(&path).unwrap();
            store
                .run_exclusive(|s| {
                    s.add_node("tag-1", "node-a");
                    s.add_node("tag-1", "node-b");
                })
                .unwrap();
        }

        let reopened = StateStore::open(&path).unwrap();
        let (nodes, count) = reopened
            .read(|s| (s.total_nodes(), s.acquired_nodes))
            .unwrap();
        assert_eq!(nodes, 2);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_run_exclusive_returns_closure_value() {
        let store = StateStore::in_memory();
        let empty = store
            .run_exclusive(|s| {
                s.add_node("t", "n");
                s.remove_node("t", "n")
            })
            .unwrap();
        assert!(empty.instance_empty);
    }
}
