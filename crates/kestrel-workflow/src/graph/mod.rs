//! Workflow graph: named [`Node`]s connected by guarded [`Transition`]s.
//!
//! A graph is a plain description. It is built once, validated when a run
//! starts, and can be executed any number of times. Transitions out of a node
//! are evaluated in registration order and the first whose condition holds is
//! taken; a node with no matching transition ends its walk. Loops are ordinary
//! transitions back to the same or an earlier node.

pub mod node;
pub mod transition;

use std::collections::{HashMap, HashSet};

use kestrel_core::error::{KestrelError, Result};

pub use node::{ActionFn, Node};
pub use transition::{Condition, Transition};

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashMap<String, Node>,
    /// Node names in insertion order.
    order: Vec<String>,
    /// Outgoing transitions per node, in registration order.
    transitions: HashMap<String, Vec<Transition>>,
    start: Option<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Fails on an empty or duplicate name.
    ///
    /// Parallel branch and join names are checked by [`Graph::validate`], so
    /// a fan-out node may be added before its branches.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        let name = node.name();
        if name.trim().is_empty() {
            return Err(KestrelError::Validation(
                "node name must not be empty".to_string(),
            ));
        }
        if self.nodes.contains_key(name) {
            return Err(KestrelError::DuplicateNode(name.to_string()));
        }
        let name = name.to_string();
        self.order.push(name.clone());
        self.nodes.insert(name, node);
        Ok(())
    }

    /// Add a transition. `from` must already exist; `to` is checked at run start.
    pub fn add_transition(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: Condition,
    ) -> Result<()> {
        let from = from.into();
        let to = to.into();
        if !self.nodes.contains_key(&from) {
            return Err(KestrelError::UnknownNode(from));
        }
        if to.trim().is_empty() {
            return Err(KestrelError::Validation(format!(
                "transition from '{}' has an empty target",
                from
            )));
        }
        self.transitions
            .entry(from.clone())
            .or_default()
            .push(Transition::new(from, to, condition));
        Ok(())
    }

    /// Use `name` as the entry node instead of the first node added.
    pub fn set_start(&mut self, name: impl Into<String>) {
        self.start = Some(name.into());
    }

    /// The entry node name: the explicit start, else the first node added.
    pub fn start(&self) -> Option<&str> {
        self.start
            .as_deref()
            .or_else(|| self.order.first().map(String::as_str))
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    pub fn transitions_from(&self, name: &str) -> &[Transition] {
        self.transitions.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check every name reference in the graph.
    ///
    /// The executor calls this before the first step of every run, so a
    /// dangling reference fails the run before any node executes.
    pub fn validate(&self) -> Result<()> {
        let start = self
            .start()
            .ok_or_else(|| KestrelError::InvalidGraph("graph has no nodes".to_string()))?;
        if !self.nodes.contains_key(start) {
            return Err(KestrelError::UnknownNode(start.to_string()));
        }

        for transition in self.transitions.values().flatten() {
            if !self.nodes.contains_key(&transition.to) {
                return Err(KestrelError::UnknownNode(transition.to.clone()));
            }
        }

        for node in self.nodes() {
            if let Node::Parallel {
                name,
                branches,
                join,
            } = node
            {
                if branches.is_empty() {
                    return Err(KestrelError::InvalidGraph(format!(
                        "parallel node '{}' has no branches",
                        name
                    )));
                }
                let mut seen = HashSet::new();
                for branch in branches {
                    if branch == name {
                        return Err(KestrelError::InvalidGraph(format!(
                            "parallel node '{}' lists itself as a branch",
                            name
                        )));
                    }
                    if !seen.insert(branch.as_str()) {
                        return Err(KestrelError::InvalidGraph(format!(
                            "parallel node '{}' lists branch '{}' twice",
                            name, branch
                        )));
                    }
                    if !self.nodes.contains_key(branch) {
                        return Err(KestrelError::UnknownNode(branch.clone()));
                    }
                }
                if let Some(join) = join {
                    if !self.nodes.contains_key(join) {
                        return Err(KestrelError::UnknownNode(join.clone()));
                    }
                    if join == name || seen.contains(join.as_str()) {
                        return Err(KestrelError::InvalidGraph(format!(
                            "parallel node '{}' cannot join on '{}'",
                            name, join
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
