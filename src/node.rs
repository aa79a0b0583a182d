//! Node identity, lifecycle and task supervision.
//!
//! Every node in a workflow owns a [`BaseNode`]: its immutable identity,
//! its lifecycle state machine, its cancellation context and its pause
//! gate. Concrete nodes (demuxer, muxer, forwarder) embed one and run
//! their long-lived body as a supervised task on the workflow's
//! [`TaskSet`].
//!
//! # Lifecycle
//!
//! `Created → Running` on start, `Running ↔ Paused` on pause/resume, any
//! state `→ Stopped` on stop or context cancellation. `Stopped` is
//! terminal: a stopped node is never restarted; construct a fresh
//! instance instead.

use crate::event::EventBus;
use crate::stats::{StatMetadata, StatSnapshot, StatValue};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Constructed, never started.
    Created,
    /// Body task running.
    Running,
    /// Pause gate closed; the body blocks at its next pause point.
    Paused,
    /// Terminal: the body returned or the node was stopped before start.
    Stopped,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::Created => "created",
            NodeState::Running => "running",
            NodeState::Paused => "paused",
            NodeState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Immutable node identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeMeta {
    /// Stable name, unique within a workflow.
    pub name: String,
    /// Human-readable label.
    pub label: String,
    /// Free-text description.
    pub description: String,
}

impl NodeMeta {
    /// Create metadata from its three parts.
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            description: description.into(),
        }
    }

    /// Fill any empty field with the given defaults.
    ///
    /// Node constructors generate per-kind defaults (`demuxer_3`,
    /// `Demuxer #3`, ...) and extend caller-provided metadata with them,
    /// so anonymous instances stay distinguishable.
    pub fn extend(mut self, name: &str, label: &str, description: &str) -> Self {
        if self.name.is_empty() {
            self.name = name.to_string();
        }
        if self.label.is_empty() {
            self.label = label.to_string();
        }
        if self.description.is_empty() {
            self.description = description.to_string();
        }
        self
    }
}

/// A node that can run inside a workflow.
pub trait Node: Send + Sync {
    /// The node's base: identity, state, context.
    fn base(&self) -> &BaseNode;

    /// Start the node's body as a supervised task.
    ///
    /// Idempotent: starting a running or stopped node is a no-op.
    fn start(self: Arc<Self>, parent: &CancellationToken, tasks: &TaskSet);
}

/// Record both directions of an edge between two nodes.
///
/// Idempotent on duplicate connects.
pub fn connect_nodes(parent: &BaseNode, child: &BaseNode) {
    parent.add_child(child.name());
    child.add_parent(parent.name());
}

/// Remove both directions of an edge between two nodes.
pub fn disconnect_nodes(parent: &BaseNode, child: &BaseNode) {
    parent.del_child(child.name());
    child.del_parent(parent.name());
}

/// Shared state and behavior of every node.
pub struct BaseNode {
    meta: NodeMeta,
    events: EventBus,
    state: Mutex<NodeState>,
    token: CancellationToken,
    pause: watch::Sender<bool>,
    children: Mutex<BTreeSet<String>>,
    parents: Mutex<BTreeSet<String>>,
    stats: Mutex<Vec<(StatMetadata, Arc<dyn StatValue>)>>,
}

impl BaseNode {
    /// Create a base node.
    ///
    /// The cancellation context exists from construction so queues and
    /// handlers can bind to it before the node starts; it is linked to
    /// the parent context at start time.
    pub fn new(meta: NodeMeta, events: EventBus) -> Arc<Self> {
        let (pause, _) = watch::channel(false);
        Arc::new(Self {
            meta,
            events,
            state: Mutex::new(NodeState::Created),
            token: CancellationToken::new(),
            pause,
            children: Mutex::new(BTreeSet::new()),
            parents: Mutex::new(BTreeSet::new()),
            stats: Mutex::new(Vec::new()),
        })
    }

    /// The node's identity.
    pub fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    /// The node's unique name.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// The node's human-readable label.
    pub fn label(&self) -> &str {
        &self.meta.label
    }

    /// The event bus the node emits on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        *self.state.lock().unwrap()
    }

    /// The node's cancellation context; cancelled when the node stops.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolve once the node's context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Start the body as a supervised task.
    ///
    /// Transitions `Created → Running` and emits the state change; any
    /// other current state makes this a no-op and the body is dropped
    /// unrun. Returns whether the node actually started.
    pub fn start(
        self: &Arc<Self>,
        parent: &CancellationToken,
        tasks: &TaskSet,
        body: impl Future<Output = ()> + Send + 'static,
    ) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if *state != NodeState::Created {
                return false;
            }
            *state = NodeState::Running;
        }
        self.events
            .send_state_changed(self.name(), NodeState::Created, NodeState::Running);
        tracing::debug!(node = self.name(), "node started");

        // Propagate parent cancellation into the node context.
        let parent = parent.clone();
        let token = self.token.clone();
        tasks.spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => token.cancel(),
                _ = token.cancelled() => {}
            }
        });

        let this = Arc::clone(self);
        tasks.spawn(async move {
            body.await;
            this.finish();
        });
        true
    }

    /// Cancel the node's context.
    ///
    /// A running body observes the cancellation and returns, after which
    /// the state becomes `Stopped`. A node that never started transitions
    /// to `Stopped` directly. Stopping a stopped node is a no-op.
    pub fn stop(&self) {
        let never_started = {
            let mut state = self.state.lock().unwrap();
            match *state {
                NodeState::Stopped => return,
                NodeState::Created => {
                    *state = NodeState::Stopped;
                    true
                }
                _ => false,
            }
        };
        if never_started {
            self.events
                .send_state_changed(self.name(), NodeState::Created, NodeState::Stopped);
        }
        self.token.cancel();
    }

    /// Mark the node stopped after its body returned.
    fn finish(&self) {
        let from = {
            let mut state = self.state.lock().unwrap();
            if *state == NodeState::Stopped {
                return;
            }
            let from = *state;
            *state = NodeState::Stopped;
            from
        };
        self.events
            .send_state_changed(self.name(), from, NodeState::Stopped);
        tracing::debug!(node = self.name(), "node stopped");
        self.token.cancel();
    }

    /// Close the pause gate.
    ///
    /// The body blocks at its next [`handle_pause`](BaseNode::handle_pause)
    /// call. No-op unless the node is running.
    pub fn pause(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != NodeState::Running {
                return;
            }
            *state = NodeState::Paused;
        }
        self.events
            .send_state_changed(self.name(), NodeState::Running, NodeState::Paused);
        self.pause.send_replace(true);
    }

    /// Reopen the pause gate. No-op unless the node is paused.
    pub fn resume(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != NodeState::Paused {
                return;
            }
            *state = NodeState::Running;
        }
        self.events
            .send_state_changed(self.name(), NodeState::Paused, NodeState::Running);
        self.pause.send_replace(false);
    }

    /// Block while the pause gate is closed.
    ///
    /// Returns when the node is resumed or its context is cancelled.
    /// Bodies call this once per work item.
    pub async fn handle_pause(&self) {
        let mut rx = self.pause.subscribe();
        while *rx.borrow_and_update() {
            tokio::select! {
                _ = self.token.cancelled() => return,
                res = rx.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Register a stat handle for periodic snapshots.
    pub fn add_stat(&self, metadata: StatMetadata, value: Arc<dyn StatValue>) {
        self.stats.lock().unwrap().push((metadata, value));
    }

    /// Sample every registered stat.
    pub fn stat_snapshots(&self) -> Vec<StatSnapshot> {
        self.stats
            .lock()
            .unwrap()
            .iter()
            .map(|(metadata, value)| StatSnapshot {
                metadata: *metadata,
                value: value.value(),
            })
            .collect()
    }

    /// Names of downstream nodes this node feeds.
    pub fn children(&self) -> Vec<String> {
        self.children.lock().unwrap().iter().cloned().collect()
    }

    /// Names of upstream nodes feeding this node.
    pub fn parents(&self) -> Vec<String> {
        self.parents.lock().unwrap().iter().cloned().collect()
    }

    fn add_child(&self, name: &str) {
        self.children.lock().unwrap().insert(name.to_string());
    }

    fn del_child(&self, name: &str) {
        self.children.lock().unwrap().remove(name);
    }

    fn add_parent(&self, name: &str) {
        self.parents.lock().unwrap().insert(name.to_string());
    }

    fn del_parent(&self, name: &str) {
        self.parents.lock().unwrap().remove(name);
    }
}

impl std::fmt::Debug for BaseNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseNode")
            .field("name", &self.meta.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Supervised set of spawned tasks.
///
/// Everything a workflow spawns lands here so shutdown can join it all.
#[derive(Default)]
pub struct TaskSet {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskSet {
    /// Create an empty task set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a future on the tokio runtime and track its handle.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.handles.lock().unwrap().push(tokio::spawn(fut));
    }

    /// Number of tasks spawned and not yet reaped by [`wait`](TaskSet::wait).
    pub fn len(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Check whether no tasks are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join every tracked task, including tasks spawned while waiting.
    pub async fn wait(&self) {
        loop {
            let handle = self.handles.lock().unwrap().pop();
            match handle {
                Some(handle) => {
                    let _ = handle.await;
                }
                None => break,
            }
        }
    }
}
