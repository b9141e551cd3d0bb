// Call-graph store with lazily resolved edges.
//
// Callers reference callees by name at parse time. Edges land in a pending
// table keyed by the unresolved callee name and are bound to identifiers in
// a second pass, after all definitions of a run are committed, so results
// never depend on file-processing order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::errors::StoreError;
use crate::model::RecordKind;
use crate::registry::atomic_write_bytes;

/// Definition node in the call graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub name: String,
    pub path: String,
    pub kind: RecordKind,
}

/// Directed call graph over record identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStore {
    nodes: BTreeMap<String, GraphNode>,
    /// Resolved edges: caller id -> callee ids.
    edges: BTreeMap<String, BTreeSet<String>>,
    /// Unresolved edges: callee name -> caller ids.
    pending: BTreeMap<String, BTreeSet<String>>,
    /// Derived: name -> node ids. Rebuilt on load, never persisted.
    #[serde(skip)]
    name_index: HashMap<String, BTreeSet<String>>,
}

impl GraphStore {
    /// Load from disk; missing or unparsable files yield an empty graph.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        let mut store: GraphStore = match serde_json::from_str(&content) {
            Ok(store) => store,
            Err(e) => {
                warn!("Failed to parse graph store {}: {}, starting fresh", path.display(), e);
                return Self::default();
            }
        };
        store.rebuild_name_index();
        info!(
            "Graph store loaded: {} nodes, {} pending names",
            store.nodes.len(),
            store.pending.len()
        );
        store
    }

    /// Persist atomically.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string(self)?;
        atomic_write_bytes(path, content.as_bytes())
    }

    /// Add or replace a definition node.
    pub fn add_node(&mut self, id: &str, node: GraphNode) {
        self.name_index
            .entry(node.name.clone())
            .or_default()
            .insert(id.to_string());
        self.nodes.insert(id.to_string(), node);
    }

    /// Record a call reference. The edge stays pending until
    /// [`GraphStore::resolve_pending`] binds it to matching definitions.
    pub fn add_call(&mut self, caller_id: &str, callee_name: &str) {
        self.pending
            .entry(callee_name.to_string())
            .or_default()
            .insert(caller_id.to_string());
    }

    /// Bind pending edges whose callee name now has at least one matching
    /// definition. Names with no definition stay pending for later runs.
    /// Returns the number of names resolved.
    pub fn resolve_pending(&mut self) -> usize {
        let mut resolved_names = Vec::new();

        for (name, callers) in &self.pending {
            let Some(targets) = self.name_index.get(name) else {
                continue;
            };
            for caller in callers {
                for target in targets {
                    if target != caller {
                        self.edges
                            .entry(caller.clone())
                            .or_default()
                            .insert(target.clone());
                    }
                }
            }
            resolved_names.push(name.clone());
        }

        for name in &resolved_names {
            self.pending.remove(name);
        }
        if !resolved_names.is_empty() {
            debug!("Resolved {} pending callee names", resolved_names.len());
        }
        resolved_names.len()
    }

    /// Remove definitions by id. Inbound edges are demoted back to pending
    /// entries keyed by the removed node's name, so a re-indexed definition
    /// with the same name reconnects on the next resolve pass.
    pub fn remove(&mut self, ids: &[String]) {
        for id in ids {
            let Some(node) = self.nodes.remove(id) else {
                continue;
            };
            if let Some(named) = self.name_index.get_mut(&node.name) {
                named.remove(id);
                if named.is_empty() {
                    self.name_index.remove(&node.name);
                }
            }

            self.edges.remove(id);
            for callers in self.pending.values_mut() {
                callers.remove(id);
            }

            // Demote inbound edges to unresolved-by-name.
            let mut orphaned_callers = BTreeSet::new();
            for (caller, targets) in &mut self.edges {
                if targets.remove(id) {
                    orphaned_callers.insert(caller.clone());
                }
            }
            if !orphaned_callers.is_empty() {
                self.pending
                    .entry(node.name.clone())
                    .or_default()
                    .extend(orphaned_callers);
            }
        }

        self.edges.retain(|_, targets| !targets.is_empty());
        self.pending.retain(|_, callers| !callers.is_empty());
    }

    /// Identifiers of definitions that call `name` (one hop), including
    /// callers still pending on the name.
    pub fn callers(&self, name: &str) -> Vec<String> {
        let mut result = BTreeSet::new();

        if let Some(targets) = self.name_index.get(name) {
            for (caller, callees) in &self.edges {
                if targets.iter().any(|t| callees.contains(t)) {
                    result.insert(caller.clone());
                }
            }
        }
        if let Some(pending) = self.pending.get(name) {
            result.extend(pending.iter().cloned());
        }

        result.into_iter().collect()
    }

    /// Names called by any definition named `name` (one hop), resolved or
    /// not.
    pub fn callees(&self, name: &str) -> Vec<String> {
        let Some(ids) = self.name_index.get(name) else {
            return Vec::new();
        };

        let mut result = BTreeSet::new();
        for id in ids {
            if let Some(targets) = self.edges.get(id) {
                for target in targets {
                    if let Some(node) = self.nodes.get(target) {
                        result.insert(node.name.clone());
                    }
                }
            }
        }
        for (callee_name, callers) in &self.pending {
            if callers.iter().any(|c| ids.contains(c)) {
                result.insert(callee_name.clone());
            }
        }

        result.into_iter().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|t| t.len()).sum()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(|c| c.len()).sum()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    fn rebuild_name_index(&mut self) {
        self.name_index.clear();
        for (id, node) in &self.nodes {
            self.name_index
                .entry(node.name.clone())
                .or_default()
                .insert(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn node(name: &str, path: &str) -> GraphNode {
        GraphNode {
            name: name.to_string(),
            path: path.to_string(),
            kind: RecordKind::Function,
        }
    }

    #[test]
    fn test_two_phase_resolution() {
        let mut store = GraphStore::default();
        // Caller indexed before the callee definition exists.
        store.add_node("a.py:function:main:0:aaaa", node("main", "a.py"));
        store.add_call("a.py:function:main:0:aaaa", "helper");
        assert_eq!(store.resolve_pending(), 0);
        assert_eq!(store.pending_count(), 1);

        // Callee arrives in a later run.
        store.add_node("b.py:function:helper:0:bbbb", node("helper", "b.py"));
        assert_eq!(store.resolve_pending(), 1);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.callers("helper"), vec!["a.py:function:main:0:aaaa".to_string()]);
        assert_eq!(store.callees("main"), vec!["helper".to_string()]);
    }

    #[test]
    fn test_unresolved_callee_visible_in_callees() {
        let mut store = GraphStore::default();
        store.add_node("a.py:function:main:0:aaaa", node("main", "a.py"));
        store.add_call("a.py:function:main:0:aaaa", "missing_fn");

        assert_eq!(store.callees("main"), vec!["missing_fn".to_string()]);
        assert_eq!(store.callers("missing_fn"), vec!["a.py:function:main:0:aaaa".to_string()]);
    }

    #[test]
    fn test_self_calls_skipped() {
        let mut store = GraphStore::default();
        store.add_node("a.py:function:rec:0:aaaa", node("rec", "a.py"));
        store.add_call("a.py:function:rec:0:aaaa", "rec");
        store.resolve_pending();
        assert_eq!(store.edge_count(), 0);
    }

    #[test]
    fn test_remove_demotes_inbound_edges() {
        let mut store = GraphStore::default();
        store.add_node("a.py:function:main:0:aaaa", node("main", "a.py"));
        store.add_node("b.py:function:helper:0:bbbb", node("helper", "b.py"));
        store.add_call("a.py:function:main:0:aaaa", "helper");
        store.resolve_pending();
        assert_eq!(store.edge_count(), 1);

        // Callee re-indexed under a new identifier.
        store.remove(&["b.py:function:helper:0:bbbb".to_string()]);
        assert_eq!(store.edge_count(), 0);
        assert_eq!(store.pending_count(), 1);

        store.add_node("b.py:function:helper:0:cccc", node("helper", "b.py"));
        store.resolve_pending();
        assert_eq!(store.callers("helper"), vec!["a.py:function:main:0:aaaa".to_string()]);
    }

    #[test]
    fn test_remove_caller_drops_pending() {
        let mut store = GraphStore::default();
        store.add_node("a.py:function:main:0:aaaa", node("main", "a.py"));
        store.add_call("a.py:function:main:0:aaaa", "missing_fn");

        store.remove(&["a.py:function:main:0:aaaa".to_string()]);
        assert_eq!(store.pending_count(), 0);
        assert!(store.callers("missing_fn").is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.json");

        let mut store = GraphStore::default();
        store.add_node("a.py:function:main:0:aaaa", node("main", "a.py"));
        store.add_node("b.py:function:helper:0:bbbb", node("helper", "b.py"));
        store.add_call("a.py:function:main:0:aaaa", "helper");
        store.resolve_pending();
        store.save(&path).unwrap();

        let loaded = GraphStore::load(&path);
        assert_eq!(loaded.node_count(), 2);
        assert_eq!(loaded.callers("helper"), vec!["a.py:function:main:0:aaaa".to_string()]);
        // Derived name index must survive the roundtrip.
        assert_eq!(loaded.callees("main"), vec!["helper".to_string()]);
    }
}
