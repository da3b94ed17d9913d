//! DOT writer and reader.
//!
//! Writing goes through `petgraph`'s DOT formatter with per-node attribute
//! getters; reading goes through the `graphviz-rust` parser, so anything it
//! accepts (`strict`, `graph`/`digraph`, attribute defaults, edge chains,
//! comments) can be loaded. Subgraphs are rejected.

use graphviz_rust::dot_structures::{
    Attribute, Edge as DotEdge, EdgeTy, Graph, Id, Node as DotNode, NodeId, Stmt, Vertex,
};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, EdgeReference, NodeIndex};
use rustc_hash::FxHashMap;

use super::{ComputationGraph, Node, NodeKind};
use crate::{Error, Result};

const DOT_CONFIG: &[Config] = &[Config::NodeNoLabel, Config::EdgeNoLabel, Config::GraphContentOnly];

pub(super) fn write(graph: &ComputationGraph) -> String {
    let body = Dot::with_attr_getters(&graph.graph, DOT_CONFIG, &edge_attributes, &node_attributes);

    let mut out = format!("digraph {} {{\n", quote(&graph.name));
    out.push_str("    graph [rankdir=TB];\n");
    out.push_str(&format!("{body:?}"));
    out.push_str("}\n");
    out
}

fn node_attributes(_: &DiGraph<Node, ()>, (_, node): (NodeIndex, &Node)) -> String {
    let style = match node.kind {
        NodeKind::Variable => "shape=oval",
        NodeKind::Parameter => "shape=oval, style=filled, fillcolor=\"#E0E0E0\"",
        NodeKind::Function => "shape=box, style=filled, fillcolor=\"#6495ED\"",
    };
    format!(
        "label={}, {style}, kind={}, id={} ",
        quote(&node.label),
        node.kind.name(),
        quote(&node.id)
    )
}

fn edge_attributes(_: &DiGraph<Node, ()>, _: EdgeReference<'_, ()>) -> String {
    String::new()
}

fn quote(s: &str) -> String {
    let mut q = String::with_capacity(s.len() + 2);
    q.push('"');
    for c in s.chars() {
        match c {
            '"' => q.push_str("\\\""),
            '\\' => q.push_str("\\\\"),
            '\n' => q.push_str("\\n"),
            c => q.push(c),
        }
    }
    q.push('"');
    q
}

/// Text of a DOT id, with quotes removed and escapes resolved.
fn id_text(id: &Id) -> String {
    match id {
        Id::Escaped(s) => {
            let inner = s
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(s);
            unescape(inner)
        }
        Id::Html(s) | Id::Plain(s) => s.clone(),
        Id::Anonymous(_) => String::new(),
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(c @ ('"' | '\\')) => out.push(c),
            // graphviz escapes such as \l stay as written
            Some(c) => {
                out.push('\\');
                out.push(c);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn unsupported() -> Error {
    Error::Serialization("subgraphs are not supported".to_string())
}

/// Nodes in order of first mention, keyed by DOT node name.
#[derive(Default)]
struct Reader {
    nodes: Vec<Node>,
    index: FxHashMap<String, usize>,
    edges: Vec<(usize, usize)>,
}

impl Reader {
    fn statement(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Node(node) => self.node(node),
            Stmt::Edge(edge) => self.edge(edge),
            Stmt::Subgraph(_) => Err(unsupported()),
            _ => Ok(()),
        }
    }

    fn node(&mut self, node: &DotNode) -> Result<()> {
        let idx = self.position(&node.id.0);
        let mut explicit = None;
        let mut boxed = false;
        for Attribute(key, value) in &node.attributes {
            let value = id_text(value);
            match id_text(key).as_str() {
                "label" => self.nodes[idx].label = value,
                "id" => self.nodes[idx].id = value,
                "kind" => {
                    explicit = Some(NodeKind::from_name(&value).ok_or_else(|| {
                        Error::Serialization(format!("unknown node kind '{value}'"))
                    })?);
                }
                "shape" => {
                    boxed = matches!(value.as_str(), "box" | "rect" | "rectangle" | "record");
                }
                _ => {}
            }
        }
        if let Some(kind) = explicit {
            self.nodes[idx].kind = kind;
        } else if boxed {
            self.nodes[idx].kind = NodeKind::Function;
        }
        Ok(())
    }

    fn edge(&mut self, edge: &DotEdge) -> Result<()> {
        let vertices: Vec<&Vertex> = match &edge.ty {
            EdgeTy::Pair(a, b) => vec![a, b],
            EdgeTy::Chain(chain) => chain.iter().collect(),
        };
        let mut chain = Vec::with_capacity(vertices.len());
        for vertex in vertices {
            match vertex {
                Vertex::N(NodeId(id, _)) => chain.push(self.position(id)),
                Vertex::S(_) => return Err(unsupported()),
            }
        }
        self.edges.extend(chain.windows(2).map(|pair| (pair[0], pair[1])));
        Ok(())
    }

    fn position(&mut self, id: &Id) -> usize {
        let name = id_text(id);
        if let Some(&idx) = self.index.get(&name) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node::new(name.clone(), name.clone(), NodeKind::Variable));
        self.index.insert(name, idx);
        idx
    }

    fn finish(self, name: String) -> ComputationGraph {
        let ids: Vec<String> = self.nodes.iter().map(|n| n.id.clone()).collect();
        let mut graph = ComputationGraph::new(name);
        for node in self.nodes {
            graph.add_node(node);
        }
        for (a, b) in self.edges {
            graph.connect(&ids[a], &ids[b]);
        }
        graph
    }
}

pub(super) fn parse(text: &str) -> Result<ComputationGraph> {
    let parsed = graphviz_rust::parse(text)
        .map_err(|e| Error::Serialization(format!("invalid DOT: {e}")))?;
    let (id, stmts) = match parsed {
        Graph::Graph { id, stmts, .. } | Graph::DiGraph { id, stmts, .. } => (id, stmts),
    };

    let mut reader = Reader::default();
    for stmt in &stmts {
        reader.statement(stmt)?;
    }
    Ok(reader.finish(id_text(&id)))
}
