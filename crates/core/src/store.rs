//! Per-project generation node store.
//!
//! The store is append-only apart from status transitions. Nodes enter it
//! either from a project snapshot or by optimistic insertion at submission
//! time, and are afterwards mutated only through [`NodeStore::reconcile`],
//! which enforces both the lifecycle rules of [`Node::apply`] and sequence
//! ordering of poll results.

use std::collections::{HashMap, HashSet};

use crate::node::{Node, Transition, TransitionError};
use crate::project::Project;
use crate::types::{NodeId, ProjectId};

/// Monotonic stamp attached to each poll request of a stream.
pub type Sequence = u64;

/// Result of [`NodeStore::insert_optimistic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A node with this id is already tracked; the existing copy is kept.
    AlreadyPresent,
}

/// Result of applying one authoritative observation to a local node.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Applied(Transition),
    /// The observation was older than one already applied.
    Stale { sequence: Sequence, latest: Sequence },
    /// The local node is terminal; the observation was discarded.
    Terminal,
    /// The observation violated the lifecycle and was discarded.
    Rejected(TransitionError),
    /// No local node with this id.
    UnknownNode,
    /// The snapshot does not (yet) contain the node.
    MissingFromSnapshot,
}

impl ReconcileOutcome {
    /// Whether the local node changed.
    pub fn is_change(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied(t) if t.is_change())
    }
}

/// Nodes of one project plus reconciliation bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    project_id: ProjectId,
    nodes: HashMap<NodeId, Node>,
    /// Highest sequence applied per node.
    applied: HashMap<NodeId, Sequence>,
}

impl NodeStore {
    pub fn new(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    /// Build a store from a project snapshot.
    pub fn from_project(mut project: Project) -> Self {
        project.normalize();
        Self {
            project_id: project.id,
            nodes: project.nodes,
            applied: HashMap::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Ids of nodes that have not reached a terminal state.
    pub fn pending_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| !n.is_terminal())
            .map(|n| n.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Insert a node returned by the backend at submission time.
    ///
    /// Inserting an id that is already tracked keeps the existing node.
    pub fn insert_optimistic(&mut self, mut node: Node) -> InsertOutcome {
        if self.nodes.contains_key(&node.id) {
            tracing::debug!(node_id = %node.id, "Node already tracked, keeping local copy");
            return InsertOutcome::AlreadyPresent;
        }
        node.normalize();
        self.nodes.insert(node.id.clone(), node);
        InsertOutcome::Inserted
    }

    /// Apply the state of `remote` (from a snapshot fetched with `sequence`)
    /// to the local node with the same id.
    pub fn reconcile(&mut self, sequence: Sequence, remote: &Node) -> ReconcileOutcome {
        let Some(local) = self.nodes.get_mut(&remote.id) else {
            return ReconcileOutcome::UnknownNode;
        };

        let latest = self.applied.get(&remote.id).copied();
        if let Some(latest) = latest {
            if sequence <= latest {
                return ReconcileOutcome::Stale { sequence, latest };
            }
        }
        self.applied.insert(remote.id.clone(), sequence);

        if local.is_terminal() {
            return ReconcileOutcome::Terminal;
        }

        match local.apply(remote.observation()) {
            Ok(transition) => ReconcileOutcome::Applied(transition),
            Err(e) => {
                tracing::warn!(node_id = %remote.id, error = %e, "Discarding invalid node update");
                ReconcileOutcome::Rejected(e)
            }
        }
    }

    /// Reconcile one tracked node against a full project snapshot.
    pub fn reconcile_snapshot(
        &mut self,
        sequence: Sequence,
        snapshot: &Project,
        node_id: &str,
    ) -> ReconcileOutcome {
        match snapshot.nodes.get(node_id) {
            Some(remote) => self.reconcile(sequence, remote),
            None => ReconcileOutcome::MissingFromSnapshot,
        }
    }

    /// Add nodes from a snapshot that are not tracked locally yet.
    ///
    /// Existing nodes are left to [`reconcile`](Self::reconcile). Returns
    /// the number of nodes added.
    pub fn absorb_new_nodes(&mut self, snapshot: &Project) -> usize {
        let mut added = 0;
        for (id, node) in &snapshot.nodes {
            if !self.nodes.contains_key(id) {
                let mut node = node.clone();
                node.normalize();
                self.nodes.insert(id.clone(), node);
                added += 1;
            }
        }
        added
    }

    /// Nodes whose `parent_id` does not resolve within this project, as
    /// `(node_id, parent_id)` pairs.
    pub fn dangling_parents(&self) -> Vec<(NodeId, NodeId)> {
        let mut dangling: Vec<(NodeId, NodeId)> = self
            .nodes
            .values()
            .filter_map(|n| {
                let parent = n.parent_id.as_ref()?;
                (!self.nodes.contains_key(parent)).then(|| (n.id.clone(), parent.clone()))
            })
            .collect();
        dangling.sort();
        dangling
    }

    /// Ancestors of `id`, nearest first.
    ///
    /// Stops at a root, at a dangling reference, or when a cycle is
    /// detected.
    pub fn lineage(&self, id: &str) -> Vec<&Node> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id.to_string());

        let mut current = self.nodes.get(id).and_then(|n| n.parent_id.as_deref());
        while let Some(parent_id) = current {
            if !seen.insert(parent_id.to_string()) {
                tracing::warn!(node_id = %id, parent_id, "Cycle in node lineage");
                break;
            }
            let Some(parent) = self.nodes.get(parent_id) else {
                break;
            };
            chain.push(parent);
            current = parent.parent_id.as_deref();
        }
        chain
    }
}
