//! Project graph parsing and validation
//!
//! A project's `content` is a line-oriented edge list: `INPUT.x ->
//! RULESET.y`. Blank lines and `#` comments are skipped. INPUT nodes may only
//! feed edges, OUTPUT nodes may only terminate them, and the graph must be
//! acyclic; every rejection names the offending edge.

use std::collections::HashMap;
use std::fmt;

use crate::{HubError, Result};

/// Component kind of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Event source
    Input,
    /// Rule evaluation stage
    Ruleset,
    /// Event sink
    Output,
}

impl NodeKind {
    /// Parse a kind token, case-insensitively
    pub fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("INPUT") {
            Some(NodeKind::Input)
        } else if token.eq_ignore_ascii_case("RULESET") {
            Some(NodeKind::Ruleset)
        } else if token.eq_ignore_ascii_case("OUTPUT") {
            Some(NodeKind::Output)
        } else {
            None
        }
    }

    /// Canonical uppercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Input => "INPUT",
            NodeKind::Ruleset => "RULESET",
            NodeKind::Output => "OUTPUT",
        }
    }
}

/// A node reference, `KIND.name`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    /// Component kind
    pub kind: NodeKind,
    /// Component name
    pub name: String,
}

impl NodeId {
    /// Parse a `KIND.name` token
    pub fn parse(token: &str) -> Result<Self> {
        let Some((kind_text, name)) = token.split_once('.') else {
            return Err(HubError::Project(format!("MALFORMED NODE, {token}")));
        };
        let kind = NodeKind::parse(kind_text)
            .ok_or_else(|| HubError::Project(format!("UNKNOWN NODE TYPE, {kind_text}")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(HubError::Project(format!("MALFORMED NODE, {token}")));
        }
        Ok(Self {
            kind,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.as_str(), self.name)
    }
}

/// One directed edge of the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Producing node
    pub from: NodeId,
    /// Consuming node
    pub to: NodeId,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// A validated project graph
#[derive(Debug, Clone, Default)]
pub struct ProjectGraph {
    /// Every node appearing in any edge, in first-seen order
    pub nodes: Vec<NodeId>,
    /// Edges in declaration order
    pub edges: Vec<Edge>,
}

impl ProjectGraph {
    /// Parse and validate an edge-list document
    pub fn parse(content: &str) -> Result<Self> {
        let mut graph = ProjectGraph::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((lhs, rhs)) = line.split_once("->") else {
                return Err(HubError::Project(format!("MALFORMED EDGE, {line}")));
            };
            let from = NodeId::parse(lhs.trim())?;
            let to = NodeId::parse(rhs.trim())?;
            let edge = Edge { from, to };

            if edge.to.kind == NodeKind::Input {
                return Err(HubError::Project(format!(
                    "INPUT CANNOT BE AN EDGE TARGET, {edge}"
                )));
            }
            if edge.from.kind == NodeKind::Output {
                return Err(HubError::Project(format!(
                    "OUTPUT CANNOT BE AN EDGE SOURCE, {edge}"
                )));
            }
            if graph.edges.contains(&edge) {
                continue;
            }
            graph.add_node(edge.from.clone());
            graph.add_node(edge.to.clone());
            graph.edges.push(edge);
        }
        if graph.edges.is_empty() {
            return Err(HubError::Project("PROJECT CONTENT HAS NO EDGES".to_string()));
        }
        graph.reject_cycles()?;
        Ok(graph)
    }

    fn add_node(&mut self, node: NodeId) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }

    /// Outgoing adjacency keyed by the node's display string
    pub fn adjacency(&self) -> HashMap<String, Vec<&Edge>> {
        let mut adjacency: HashMap<String, Vec<&Edge>> = HashMap::new();
        for edge in &self.edges {
            adjacency
                .entry(edge.from.to_string())
                .or_default()
                .push(edge);
        }
        adjacency
    }

    /// Depth-first cycle detection with an explicit stack
    fn reject_cycles(&self) -> Result<()> {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let adjacency = self.adjacency();
        let mut colors: HashMap<String, u8> =
            self.nodes.iter().map(|n| (n.to_string(), WHITE)).collect();

        for root in &self.nodes {
            let root_key = root.to_string();
            if colors[&root_key] != WHITE {
                continue;
            }
            // (node key, next child index) frames instead of recursion
            let mut stack: Vec<(String, usize)> = vec![(root_key, 0)];
            while let Some((key, child)) = stack.last().cloned() {
                if child == 0 {
                    colors.insert(key.clone(), GRAY);
                }
                let out = adjacency.get(&key).map(Vec::as_slice).unwrap_or(&[]);
                if child < out.len() {
                    stack.last_mut().expect("non-empty stack").1 += 1;
                    let edge = out[child];
                    let next = edge.to.to_string();
                    match colors.get(&next).copied().unwrap_or(WHITE) {
                        GRAY => {
                            return Err(HubError::Project(format!("CYCLE DETECTED, {edge}")));
                        }
                        WHITE => stack.push((next, 0)),
                        _ => {}
                    }
                } else {
                    colors.insert(key, BLACK);
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}
