//! Computation graph handle, as produced by the host's forward pass.
//!
//! The graph is only used for visualization: variables (data and
//! parameters) and functions are nodes, data flow is a directed edge.
//!
//! ```rust
//! use trueno_monitor::graph::ComputationGraph;
//!
//! # fn main() -> trueno_monitor::Result<()> {
//! let mut graph = ComputationGraph::new("mlp");
//! graph
//!     .add_variable("x", "x (32, 784)")
//!     .add_function("linear", "Linear")
//!     .connect("x", "linear");
//!
//! let dot = graph.to_dot()?;
//! let parsed = ComputationGraph::from_dot(&dot)?;
//! assert_eq!(parsed.node_count(), 2);
//! assert_eq!(parsed.edge_count(), 1);
//! # Ok(())
//! # }
//! ```

mod dot;

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// What a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Intermediate or input data.
    Variable,
    /// Trainable parameter.
    Parameter,
    /// Operation applied to its inputs.
    Function,
}

impl NodeKind {
    /// Name written to the `kind` DOT attribute.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Variable => "variable",
            Self::Parameter => "parameter",
            Self::Function => "function",
        }
    }

    /// Parse a `kind` attribute value.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "variable" => Some(Self::Variable),
            "parameter" => Some(Self::Parameter),
            "function" => Some(Self::Function),
            _ => None,
        }
    }
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    id: String,
    label: String,
    kind: NodeKind,
}

impl Node {
    /// Create a node.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
        }
    }

    /// Unique node id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Node kind.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }
}

/// Nodes and edges of one forward computation.
///
/// Node ids are unique; edges are added between known ids. Mistakes made
/// while building (a repeated id, an edge to an unknown node) are kept and
/// reported by [`validate`](Self::validate), so the builder methods chain.
#[derive(Debug, Clone, Default)]
pub struct ComputationGraph {
    name: String,
    graph: DiGraph<Node, ()>,
    index: FxHashMap<String, NodeIndex>,
    problems: Vec<String>,
}

impl ComputationGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Graph name (the DOT graph id).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a node.
    pub fn add_node(&mut self, node: Node) -> &mut Self {
        if node.id.is_empty() {
            self.problems.push("node with empty id".to_string());
        } else if self.index.contains_key(&node.id) {
            self.problems.push(format!("duplicate node id '{}'", node.id));
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.entry(id).or_insert(idx);
        self
    }

    /// Add a data node.
    pub fn add_variable(&mut self, id: impl Into<String>, label: impl Into<String>) -> &mut Self {
        self.add_node(Node::new(id, label, NodeKind::Variable))
    }

    /// Add a parameter node.
    pub fn add_parameter(&mut self, id: impl Into<String>, label: impl Into<String>) -> &mut Self {
        self.add_node(Node::new(id, label, NodeKind::Parameter))
    }

    /// Add a function node.
    pub fn add_function(&mut self, id: impl Into<String>, label: impl Into<String>) -> &mut Self {
        self.add_node(Node::new(id, label, NodeKind::Function))
    }

    /// Add an edge `from -> to` between nodes added earlier.
    pub fn connect(&mut self, from: impl AsRef<str>, to: impl AsRef<str>) -> &mut Self {
        let (from, to) = (from.as_ref(), to.as_ref());
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => {
                self.graph.add_edge(a, b, ());
            }
            (a, _) => {
                let missing = if a.is_none() { from } else { to };
                self.problems.push(format!(
                    "edge {from} -> {to} references unknown node '{missing}'"
                ));
            }
        }
        self
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.graph.node_weights()
    }

    /// Edges as `(source id, target id)`, in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.graph.raw_edges().iter().map(|e| {
            (
                self.graph[e.source()].id.as_str(),
                self.graph[e.target()].id.as_str(),
            )
        })
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    /// Check that the graph can be serialized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the graph has no nodes, repeats a
    /// node id, or has an edge to or from an unknown node.
    pub fn validate(&self) -> Result<()> {
        if self.graph.node_count() == 0 {
            return Err(Error::Serialization(format!(
                "graph '{}' has no nodes",
                self.name
            )));
        }
        match self.problems.first() {
            Some(problem) => Err(Error::Serialization(problem.clone())),
            None => Ok(()),
        }
    }

    /// Serialize to DOT.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if [`validate`](Self::validate) fails.
    pub fn to_dot(&self) -> Result<String> {
        self.validate()?;
        Ok(dot::write(self))
    }

    /// Parse a DOT document, such as one written by [`to_dot`](Self::to_dot).
    ///
    /// Node ids come from the `id` attribute when present, otherwise from
    /// the DOT node name. Nodes only mentioned in edges are added as
    /// variables labelled with their id. Attribute statements are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] on malformed input or subgraphs.
    pub fn from_dot(text: &str) -> Result<Self> {
        dot::parse(text)
    }
}

impl PartialEq for ComputationGraph {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.problems == other.problems
            && self.nodes().eq(other.nodes())
            && self.edges().eq(other.edges())
    }
}
