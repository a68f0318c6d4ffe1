//! Project node contract and built-in runtime nodes
//!
//! A node factory returns, per unique node id, an object that may accept
//! outbound queues (edge senders) and inbound queues (edge receivers).
//! Attachments accumulate before start; each node runs its own tasks and
//! must settle within the shutdown window when stopped.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, warn};

use super::graph::{NodeId, NodeKind};
use crate::engine::RuleEvaluator;
use crate::event::Event;
use crate::{HubError, Result};

/// Bound of every edge queue
pub const DEFAULT_EDGE_CAPACITY: usize = 1024;

/// How long a stopping node may take to settle
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;

/// A runnable node wired into a project graph
#[async_trait]
pub trait ProjectNode: Send {
    /// Accept a queue feeding a downstream edge
    fn attach_output(&mut self, _tx: mpsc::Sender<Event>) {}

    /// Accept a queue fed by an upstream edge
    fn attach_input(&mut self, _rx: mpsc::Receiver<Event>) {}

    /// Start the node's tasks
    async fn start(&mut self) -> Result<()>;

    /// Stop the node, draining in-flight work within the shutdown window
    async fn stop(&mut self) -> Result<()>;
}

/// Creates node instances for a project build
pub trait NodeFactory: Send + Sync {
    /// Create the node for a unique graph id; called once per id
    fn create(&self, id: &NodeId) -> Result<Box<dyn ProjectNode>>;
}

/// Spawned-task bookkeeping shared by the built-in nodes
///
/// Tasks subscribe to a shutdown signal; `shutdown` flips it and then waits
/// for every task under one deadline, aborting stragglers.
pub struct TaskGroup {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    /// Create an empty group
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Subscribe to the group's shutdown signal
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a task owned by the group
    pub fn spawn(&mut self, future: impl Future<Output = ()> + Send + 'static) {
        self.handles.push(tokio::spawn(future));
    }

    /// Signal shutdown and wait for every task within `timeout`
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut timed_out = false;
        for mut handle in self.handles.drain(..) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    handle.abort();
                    timed_out = true;
                }
            }
        }
        if timed_out {
            return Err(HubError::Runtime(
                "node tasks did not settle within the shutdown window".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Fan one event out to every attached edge
async fn fan_out(outputs: &[mpsc::Sender<Event>], event: &Event) {
    for tx in outputs {
        if tx.send(event.clone()).await.is_err() {
            debug!("downstream edge closed, dropping event");
        }
    }
}

/// Runtime node evaluating a compiled ruleset over its inbound edges
pub struct RulesetNode {
    evaluator: Arc<RuleEvaluator>,
    inputs: Vec<mpsc::Receiver<Event>>,
    outputs: Vec<mpsc::Sender<Event>>,
    tasks: TaskGroup,
}

impl RulesetNode {
    /// Create a node around a shared evaluator
    pub fn new(evaluator: Arc<RuleEvaluator>) -> Self {
        Self {
            evaluator,
            inputs: Vec::new(),
            outputs: Vec::new(),
            tasks: TaskGroup::new(),
        }
    }
}

#[async_trait]
impl ProjectNode for RulesetNode {
    fn attach_output(&mut self, tx: mpsc::Sender<Event>) {
        self.outputs.push(tx);
    }

    fn attach_input(&mut self, rx: mpsc::Receiver<Event>) {
        self.inputs.push(rx);
    }

    async fn start(&mut self) -> Result<()> {
        // Senders move into the tasks so channel closure propagates once
        // every upstream edge drains.
        let outputs = std::mem::take(&mut self.outputs);
        for mut rx in self.inputs.drain(..) {
            let outputs = outputs.clone();
            let evaluator = self.evaluator.clone();
            let mut shutdown = self.tasks.subscribe();
            self.tasks.spawn(async move {
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        received = rx.recv() => {
                            let Some(event) = received else { break };
                            for emitted in evaluator.evaluate(&event).await {
                                fan_out(&outputs, &emitted).await;
                            }
                        }
                    }
                }
            });
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.tasks
            .shutdown(Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS))
            .await
    }
}

/// Input node replaying a fixed batch of events, then closing its edges
pub struct MemoryInput {
    events: Vec<Event>,
    outputs: Vec<mpsc::Sender<Event>>,
    tasks: TaskGroup,
}

impl MemoryInput {
    /// Create an input that will replay `events` once started
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            outputs: Vec::new(),
            tasks: TaskGroup::new(),
        }
    }
}

#[async_trait]
impl ProjectNode for MemoryInput {
    fn attach_output(&mut self, tx: mpsc::Sender<Event>) {
        self.outputs.push(tx);
    }

    async fn start(&mut self) -> Result<()> {
        let events = std::mem::take(&mut self.events);
        let outputs = std::mem::take(&mut self.outputs);
        let mut shutdown = self.tasks.subscribe();
        self.tasks.spawn(async move {
            for event in events {
                if *shutdown.borrow_and_update() {
                    break;
                }
                fan_out(&outputs, &event).await;
            }
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.tasks
            .shutdown(Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS))
            .await
    }
}

/// Output node collecting events into shared memory, for tests and dry runs
pub struct MemoryOutput {
    inputs: Vec<mpsc::Receiver<Event>>,
    collected: Arc<parking_lot::Mutex<Vec<Event>>>,
    tasks: TaskGroup,
}

impl MemoryOutput {
    /// Create an output draining into the given buffer
    pub fn new(collected: Arc<parking_lot::Mutex<Vec<Event>>>) -> Self {
        Self {
            inputs: Vec::new(),
            collected,
            tasks: TaskGroup::new(),
        }
    }
}

#[async_trait]
impl ProjectNode for MemoryOutput {
    fn attach_input(&mut self, rx: mpsc::Receiver<Event>) {
        self.inputs.push(rx);
    }

    async fn start(&mut self) -> Result<()> {
        for mut rx in self.inputs.drain(..) {
            let collected = self.collected.clone();
            let mut shutdown = self.tasks.subscribe();
            self.tasks.spawn(async move {
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        received = rx.recv() => {
                            let Some(event) = received else { break };
                            collected.lock().push(event);
                        }
                    }
                }
            });
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.tasks
            .shutdown(Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS))
            .await
    }
}

/// Input node reading JSON-lines events from a file
pub struct FileInput {
    path: PathBuf,
    outputs: Vec<mpsc::Sender<Event>>,
    tasks: TaskGroup,
}

impl FileInput {
    /// Create an input over a JSON-lines file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            outputs: Vec::new(),
            tasks: TaskGroup::new(),
        }
    }
}

#[async_trait]
impl ProjectNode for FileInput {
    fn attach_output(&mut self, tx: mpsc::Sender<Event>) {
        self.outputs.push(tx);
    }

    async fn start(&mut self) -> Result<()> {
        let file = tokio::fs::File::open(&self.path).await?;
        let path = self.path.clone();
        let outputs = std::mem::take(&mut self.outputs);
        let mut shutdown = self.tasks.subscribe();
        self.tasks.spawn(async move {
            let mut lines = BufReader::new(file).lines();
            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match Event::from_slice(line.as_bytes()) {
                            Ok(event) => fan_out(&outputs, &event).await,
                            Err(err) => {
                                warn!(path = %path.display(), error = %err, "skipping malformed event line");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "event file read failed");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.tasks
            .shutdown(Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS))
            .await
    }
}

/// Output node appending events as JSON lines to a file
pub struct FileOutput {
    path: PathBuf,
    inputs: Vec<mpsc::Receiver<Event>>,
    tasks: TaskGroup,
}

impl FileOutput {
    /// Create an output appending to the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inputs: Vec::new(),
            tasks: TaskGroup::new(),
        }
    }
}

#[async_trait]
impl ProjectNode for FileOutput {
    fn attach_input(&mut self, rx: mpsc::Receiver<Event>) {
        self.inputs.push(rx);
    }

    async fn start(&mut self) -> Result<()> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let writer = Arc::new(tokio::sync::Mutex::new(file));
        for mut rx in self.inputs.drain(..) {
            let writer = writer.clone();
            let mut shutdown = self.tasks.subscribe();
            self.tasks.spawn(async move {
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        received = rx.recv() => {
                            let Some(event) = received else { break };
                            let line = format!("{}\n", event.to_json());
                            let mut file = writer.lock().await;
                            if let Err(err) = file.write_all(line.as_bytes()).await {
                                warn!(error = %err, "event sink write failed");
                            }
                        }
                    }
                }
                let mut file = writer.lock().await;
                let _ = file.flush().await;
            });
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.tasks
            .shutdown(Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS))
            .await
    }
}

/// Output node writing events as JSON lines to stdout
pub struct StdoutOutput {
    inputs: Vec<mpsc::Receiver<Event>>,
    tasks: TaskGroup,
}

impl StdoutOutput {
    /// Create a stdout sink
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            tasks: TaskGroup::new(),
        }
    }
}

impl Default for StdoutOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectNode for StdoutOutput {
    fn attach_input(&mut self, rx: mpsc::Receiver<Event>) {
        self.inputs.push(rx);
    }

    async fn start(&mut self) -> Result<()> {
        for mut rx in self.inputs.drain(..) {
            let mut shutdown = self.tasks.subscribe();
            self.tasks.spawn(async move {
                let mut stdout = tokio::io::stdout();
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        received = rx.recv() => {
                            let Some(event) = received else { break };
                            let line = format!("{}\n", event.to_json());
                            if stdout.write_all(line.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = stdout.flush().await;
            });
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.tasks
            .shutdown(Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS))
            .await
    }
}

type NodeBuilder = Box<dyn Fn() -> Box<dyn ProjectNode> + Send + Sync>;

/// Factory mapping graph ids to registered component builders
#[derive(Default)]
pub struct HubNodeFactory {
    builders: HashMap<String, NodeBuilder>,
}

impl HubNodeFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an input component under `INPUT.<name>`
    pub fn register_input<F>(&mut self, name: &str, builder: F)
    where
        F: Fn() -> Box<dyn ProjectNode> + Send + Sync + 'static,
    {
        self.builders
            .insert(format!("{}.{name}", NodeKind::Input.as_str()), Box::new(builder));
    }

    /// Register a compiled ruleset under `RULESET.<name>`
    pub fn register_ruleset(&mut self, name: &str, evaluator: Arc<RuleEvaluator>) {
        self.builders.insert(
            format!("{}.{name}", NodeKind::Ruleset.as_str()),
            Box::new(move || Box::new(RulesetNode::new(evaluator.clone()))),
        );
    }

    /// Register an output component under `OUTPUT.<name>`
    pub fn register_output<F>(&mut self, name: &str, builder: F)
    where
        F: Fn() -> Box<dyn ProjectNode> + Send + Sync + 'static,
    {
        self.builders
            .insert(format!("{}.{name}", NodeKind::Output.as_str()), Box::new(builder));
    }
}

impl NodeFactory for HubNodeFactory {
    fn create(&self, id: &NodeId) -> Result<Box<dyn ProjectNode>> {
        let key = id.to_string();
        match self.builders.get(&key) {
            Some(builder) => Ok(builder()),
            None => Err(HubError::Project(format!("UNKNOWN COMPONENT, {key}"))),
        }
    }
}
