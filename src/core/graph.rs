//! Per-version step forest.
//!
//! `StepGraph` stores every step of one version as a node in a petgraph
//! `DiGraph`, with an id index for lookups, so parent/child wiring is by
//! arena index rather than by pointer. Child order comes from each step's
//! `next_ids` (insertion order) and root order from creation time, which
//! keeps merges deterministic across reloads.

use crate::core::recording::RecordingId;
use crate::core::step::{Step, StepId};
use crate::error::{Error, Result};
use crate::{flog_trace, flog_warn};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// Separator between step names in a rendered path.
pub const PATH_SEPARATOR: &str = "->";

#[derive(Clone)]
pub struct StepGraph {
    project_id: String,
    version_id: String,
    /// Edges point from parent to child.
    graph: DiGraph<Step, ()>,
    index: HashMap<StepId, NodeIndex>,
    /// Root steps in creation order.
    roots: Vec<StepId>,
}

impl StepGraph {
    /// Create an empty forest for one version.
    pub fn new(project_id: &str, version_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            version_id: version_id.to_string(),
            graph: DiGraph::new(),
            index: HashMap::new(),
            roots: Vec::new(),
        }
    }

    /// Rebuild a forest from flat, persisted steps.
    ///
    /// Pass one inserts every step; pass two wires parent -> child edges
    /// from each step's `previous_id`. The parent's `next_ids` are
    /// reconciled against those edges: a child missing from its parent's
    /// list is appended, and listed ids that are unknown or belong to a
    /// different parent are dropped. That covers a crash between writing a
    /// parent and its new child.
    ///
    /// # Errors
    /// Returns a validation error for duplicate ids, a `previous_id` naming
    /// an unknown step, or links that form a cycle.
    pub fn from_steps(project_id: &str, version_id: &str, mut steps: Vec<Step>) -> Result<Self> {
        steps.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut forest = Self::new(project_id, version_id);
        for step in steps {
            let id = step.id;
            if forest.index.contains_key(&id) {
                return Err(Error::Validation(format!("duplicate step id {}", id)));
            }
            if step.is_root() {
                forest.roots.push(id);
            }
            let node = forest.graph.add_node(step);
            forest.index.insert(id, node);
        }

        let links: Vec<(StepId, StepId)> = forest
            .graph
            .node_weights()
            .filter_map(|s| s.previous_id.map(|parent| (parent, s.id)))
            .collect();

        for (parent, child) in &links {
            let parent_node = *forest.index.get(parent).ok_or_else(|| {
                Error::Validation(format!(
                    "step {} references unknown previous step {}",
                    child, parent
                ))
            })?;
            let child_node = forest.index[child];
            forest.graph.add_edge(parent_node, child_node, ());
        }

        if is_cyclic_directed(&forest.graph) {
            return Err(Error::Validation(format!(
                "steps of {}/{} form a cycle",
                project_id, version_id
            )));
        }

        forest.reconcile_children(&links);
        Ok(forest)
    }

    fn reconcile_children(&mut self, links: &[(StepId, StepId)]) {
        let mut owner: HashMap<StepId, StepId> = HashMap::new();
        for (parent, child) in links {
            owner.insert(*child, *parent);
        }

        let ids: Vec<StepId> = self.index.keys().copied().collect();
        for id in ids {
            let node = self.index[&id];
            let step = &mut self.graph[node];
            let before = step.next_ids.len();
            step.next_ids.retain(|child| owner.get(child) == Some(&id));
            if step.next_ids.len() != before {
                flog_warn!(
                    "StepGraph: dropped {} dangling child link(s) from step {}",
                    before - step.next_ids.len(),
                    id
                );
            }
        }

        for (parent, child) in links {
            let node = self.index[parent];
            let step = &mut self.graph[node];
            if !step.next_ids.contains(child) {
                flog_warn!("StepGraph: re-linking child {} under {}", child, parent);
                step.next_ids.push(*child);
            }
        }
    }

    /// Merge one recording's ordered step names into the forest.
    ///
    /// Walks from the roots, reusing the first sibling whose name matches
    /// and creating a new child (or root) where none does. The recording id
    /// is recorded on every traversed step; the final step's success count
    /// is bumped when `successful`. A step that already holds this
    /// recording id is left untouched, so re-running the same recording does
    /// not double count.
    ///
    /// Returns the traversed steps, root first.
    pub fn merge(
        &mut self,
        names: &[String],
        recording_id: RecordingId,
        successful: bool,
    ) -> Result<Vec<Step>> {
        if names.is_empty() {
            return Err(Error::Validation(
                "step sequence must contain at least one name".to_string(),
            ));
        }
        if let Some(blank) = names.iter().position(|n| n.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "step name at position {} is blank",
                blank
            )));
        }

        let mut candidates: Vec<StepId> = self.roots.clone();
        let mut previous: Option<StepId> = None;
        let mut path = Vec::with_capacity(names.len());

        for (position, name) in names.iter().enumerate() {
            let found = candidates
                .iter()
                .copied()
                .find(|id| self.get(id).is_some_and(|s| s.name == *name));

            let id = match found {
                Some(id) => {
                    flog_trace!("StepGraph::merge reuse '{}' ({})", name, id.short());
                    id
                }
                None => {
                    let id = self.insert(name, previous);
                    flog_trace!("StepGraph::merge create '{}' ({})", name, id.short());
                    id
                }
            };

            let is_last = position + 1 == names.len();
            let node = self.index[&id];
            let step = &mut self.graph[node];
            if !step.has_recording(&recording_id) {
                step.recording_ids.push(recording_id);
                if is_last && successful {
                    step.success_count += 1;
                }
            }

            candidates = step.next_ids.clone();
            previous = Some(id);
            path.push(id);
        }

        Ok(path
            .iter()
            .filter_map(|id| self.get(id).cloned())
            .collect())
    }

    fn insert(&mut self, name: &str, parent: Option<StepId>) -> StepId {
        let step = Step::new(name, &self.project_id, &self.version_id, parent);
        let id = step.id;
        let node = self.graph.add_node(step);
        self.index.insert(id, node);

        match parent.and_then(|p| self.index.get(&p).copied()) {
            Some(parent_node) => {
                self.graph[parent_node].next_ids.push(id);
                self.graph.add_edge(parent_node, node, ());
            }
            None => self.roots.push(id),
        }
        id
    }

    /// Every root-to-leaf path, names joined by [`PATH_SEPARATOR`].
    ///
    /// Depth-first with an explicit stack, so long step sequences do not
    /// grow the call stack.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut trail: Vec<&str> = Vec::new();
        // (step, depth of its parent in `trail`)
        let mut stack: Vec<(StepId, usize)> =
            self.roots.iter().rev().map(|id| (*id, 0)).collect();

        while let Some((id, depth)) = stack.pop() {
            let Some(step) = self.get(&id) else {
                continue;
            };
            trail.truncate(depth);
            trail.push(&step.name);
            if step.is_leaf() {
                out.push(trail.join(PATH_SEPARATOR));
            } else {
                stack.extend(step.next_ids.iter().rev().map(|child| (*child, depth + 1)));
            }
        }
        out
    }

    /// True when links are acyclic and no step has more than one parent.
    pub fn is_forest(&self) -> bool {
        if is_cyclic_directed(&self.graph) {
            return false;
        }
        self.graph.node_indices().all(|node| {
            let parents: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .collect();
            match (parents.as_slice(), self.graph[node].previous_id) {
                ([], None) => true,
                ([parent], Some(previous)) => self.graph[*parent].id == previous,
                _ => false,
            }
        })
    }

    pub fn get(&self, id: &StepId) -> Option<&Step> {
        self.index.get(id).and_then(|&node| self.graph.node_weight(node))
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.index.contains_key(id)
    }

    pub fn roots(&self) -> Vec<&Step> {
        self.roots.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn children(&self, id: &StepId) -> Vec<&Step> {
        self.get(id)
            .map(|step| step.next_ids.iter().filter_map(|c| self.get(c)).collect())
            .unwrap_or_default()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.graph.node_weights()
    }

    /// Distinct step names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.steps()
            .map(|s| s.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl std::fmt::Debug for StepGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepGraph")
            .field("project", &self.project_id)
            .field("version", &self.version_id)
            .field("steps", &self.len())
            .field("roots", &self.roots.len())
            .finish()
    }
}
