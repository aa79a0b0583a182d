//! Workflows: named node graphs with a shared root context.
//!
//! A workflow owns the lifecycle of its nodes: starting starts every
//! node on the workflow's task set, stopping cancels the root context,
//! and waiting joins every task and then runs the scoped close
//! callbacks in reverse registration order.

use crate::closer::Closer;
use crate::error::{Error, Result};
use crate::event::{Event, EventBus, EventReceiver};
use crate::node::{Node, TaskSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STATS_PERIOD: Duration = Duration::from_secs(1);

/// A named set of nodes sharing a root context and lifecycle.
pub struct Workflow {
    name: String,
    token: CancellationToken,
    closer: Arc<Closer>,
    events: EventBus,
    tasks: TaskSet,
    nodes: Mutex<HashMap<String, Arc<dyn Node>>>,
    started: AtomicBool,
}

impl Workflow {
    /// Create an empty workflow.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_parent(name, &CancellationToken::new())
    }

    /// Create an empty workflow whose root context derives from `parent`.
    pub fn with_parent(name: impl Into<String>, parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            token: parent.child_token(),
            closer: Arc::new(Closer::new()),
            events: EventBus::default(),
            tasks: TaskSet::new(),
            nodes: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        })
    }

    /// The workflow's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The event bus nodes of this workflow emit on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to the workflow's events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The scoped resource collector for this workflow's allocations.
    pub fn closer(&self) -> &Arc<Closer> {
        &self.closer
    }

    /// The workflow's root cancellation context.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Add a node. Nodes are added before start.
    pub fn add_node(&self, node: Arc<dyn Node>) {
        let name = node.base().name().to_string();
        self.nodes.lock().unwrap().insert(name, node);
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Result<Arc<dyn Node>> {
        self.nodes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("node {name}")))
    }

    /// Snapshot of the workflow's nodes, in unspecified order.
    pub fn nodes(&self) -> Vec<Arc<dyn Node>> {
        self.nodes.lock().unwrap().values().cloned().collect()
    }

    /// Start every node. Idempotent: a second start is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.events.send(Event::WorkflowStarted {
            workflow: self.name.clone(),
        });
        tracing::debug!(workflow = %self.name, "workflow started");

        let nodes = self.nodes();
        for node in &nodes {
            node.clone().start(&self.token, &self.tasks);
        }

        // Periodic stats snapshots for every node, until shutdown.
        let token = self.token.clone();
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let mut interval = tokio::time::interval(STATS_PERIOD);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        for node in &nodes {
                            let stats = node.base().stat_snapshots();
                            if !stats.is_empty() {
                                events.send_node_stats(node.base().name(), stats);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Cancel the root context; every node winds down.
    pub fn stop(&self) {
        self.token.cancel();
        self.events.send(Event::WorkflowStopped {
            workflow: self.name.clone(),
        });
        tracing::debug!(workflow = %self.name, "workflow stopped");
    }

    /// Join every task, then run the close callbacks.
    ///
    /// Teardown errors from close callbacks are reported on the event
    /// bus, never propagated as panics.
    pub async fn wait(&self) {
        self.tasks.wait().await;
        for err in self.closer.close() {
            self.events.send_node_error(self.name.clone(), &err);
        }
    }

    /// Stop the workflow and wait for it to wind down.
    pub async fn stop_and_wait(&self) {
        self.stop();
        self.wait().await;
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("nodes", &self.nodes.lock().unwrap().len())
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}
