//! Projects: graph materialisation and lifecycle
//!
//! A project document is YAML carrying `id`, `name`, and the edge-list
//! `content`. Building a project parses and validates the graph, creates one
//! node per unique id through the injected factory, and allocates one bounded
//! queue per edge. `start` and `stop` are once-only on a given instance;
//! restarting means building a new instance.

/// Graph parsing and validation
pub mod graph;
/// Node contract and built-in runtime nodes
pub mod node;

#[cfg(feature = "kafka")]
/// Kafka consumer input node
pub mod kafka;

pub use graph::{Edge, NodeId, NodeKind, ProjectGraph};
pub use node::{
    FileInput, FileOutput, HubNodeFactory, MemoryInput, MemoryOutput, NodeFactory, ProjectNode,
    RulesetNode, StdoutOutput, TaskGroup, DEFAULT_EDGE_CAPACITY, DEFAULT_STOP_TIMEOUT_SECS,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::event::Event;
use crate::{HubError, Result};

/// Parsed project document
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Project id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Edge-list text, one `A -> B` per line
    pub content: String,
}

impl ProjectConfig {
    /// Parse a YAML project document, rejecting empty fields
    pub fn from_yaml(source: &str) -> Result<Self> {
        let config: ProjectConfig = serde_yaml::from_str(source)?;
        if config.id.trim().is_empty() {
            return Err(HubError::Project("PROJECT ID CANNOT BE EMPTY".to_string()));
        }
        if config.name.trim().is_empty() {
            return Err(HubError::Project("PROJECT NAME CANNOT BE EMPTY".to_string()));
        }
        if config.content.trim().is_empty() {
            return Err(HubError::Project(
                "PROJECT CONTENT CANNOT BE EMPTY".to_string(),
            ));
        }
        Ok(config)
    }
}

/// Lifecycle state of a project instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProjectState {
    /// Built but not started, or stopped cleanly
    Stopped = 0,
    /// Running
    Running = 1,
    /// A node failed during start or stop
    Error = 2,
}

/// A materialised project instance
///
/// Transitions `Stopped -> Running -> (Stopped | Error)` exactly once;
/// callers build a new instance to restart.
pub struct Project {
    /// Project id
    pub id: String,
    /// Project name
    pub name: String,
    graph: ProjectGraph,
    nodes: Vec<(NodeId, Box<dyn ProjectNode>)>,
    state: AtomicU8,
    started: std::sync::atomic::AtomicBool,
    stopped: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state.load(std::sync::atomic::Ordering::Relaxed))
            .finish()
    }
}

impl Project {
    /// Build a project from its config and a node factory
    ///
    /// Each unique node id is created once even when it appears on several
    /// edges; queue attachments accumulate per edge.
    pub fn build(config: &ProjectConfig, factory: &dyn NodeFactory) -> Result<Self> {
        let graph = ProjectGraph::parse(&config.content)?;

        let mut nodes: Vec<(NodeId, Box<dyn ProjectNode>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for node_id in &graph.nodes {
            let node = factory.create(node_id)?;
            index.insert(node_id.to_string(), nodes.len());
            nodes.push((node_id.clone(), node));
        }

        for edge in &graph.edges {
            let (tx, rx) = mpsc::channel::<Event>(DEFAULT_EDGE_CAPACITY);
            let from = index[&edge.from.to_string()];
            nodes[from].1.attach_output(tx);
            let to = index[&edge.to.to_string()];
            nodes[to].1.attach_input(rx);
        }

        Ok(Self {
            id: config.id.clone(),
            name: config.name.clone(),
            graph,
            nodes,
            state: AtomicU8::new(ProjectState::Stopped as u8),
            started: std::sync::atomic::AtomicBool::new(false),
            stopped: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// The validated graph backing this instance
    pub fn graph(&self) -> &ProjectGraph {
        &self.graph
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProjectState {
        match self.state.load(Ordering::Acquire) {
            1 => ProjectState::Running,
            2 => ProjectState::Error,
            _ => ProjectState::Stopped,
        }
    }

    fn set_state(&self, state: ProjectState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Start every node; runs at most once per instance
    ///
    /// Sinks start before sources so consumers are ready when events flow.
    /// The first node error aborts the start and surfaces.
    pub async fn start(&mut self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(HubError::Project(format!(
                "PROJECT ALREADY STARTED, {}",
                self.id
            )));
        }

        for kind in [NodeKind::Output, NodeKind::Ruleset, NodeKind::Input] {
            for (node_id, node) in self.nodes.iter_mut().filter(|(id, _)| id.kind == kind) {
                if let Err(err) = node.start().await {
                    error!(project = %self.id, node = %node_id, error = %err, "node failed to start");
                    self.set_state(ProjectState::Error);
                    return Err(err);
                }
            }
        }
        self.set_state(ProjectState::Running);
        info!(project = %self.id, nodes = self.nodes.len(), "project started");
        Ok(())
    }

    /// Stop every node; runs at most once, later calls are no-ops
    ///
    /// Sources stop before sinks so in-flight events can drain downstream.
    /// Node errors are collected and the last one surfaces.
    pub async fn stop(&mut self) -> Result<()> {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let mut last_error = None;
        for kind in [NodeKind::Input, NodeKind::Ruleset, NodeKind::Output] {
            for (node_id, node) in self.nodes.iter_mut().filter(|(id, _)| id.kind == kind) {
                if let Err(err) = node.stop().await {
                    error!(project = %self.id, node = %node_id, error = %err, "node failed to stop");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => {
                self.set_state(ProjectState::Error);
                Err(err)
            }
            None => {
                self.set_state(ProjectState::Stopped);
                info!(project = %self.id, "project stopped");
                Ok(())
            }
        }
    }
}
