//! Workflow event system for async event handling.
//!
//! Events are emitted by nodes and workflows during execution and can be
//! received asynchronously by any number of subscribers. Delivery is
//! best-effort: a subscriber that falls behind skips ahead to the oldest
//! retained event.

use crate::error::Error;
use crate::node::NodeState;
use crate::stats::StatSnapshot;
use std::fmt;
use tokio::sync::broadcast;

/// Events emitted during workflow execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A node's lifecycle state has changed.
    NodeStateChanged {
        /// The node whose state changed.
        node: String,
        /// Previous state.
        from: NodeState,
        /// New state.
        to: NodeState,
    },

    /// A node encountered an error.
    NodeError {
        /// The node that emitted the error.
        node: String,
        /// The error message.
        message: String,
    },

    /// A periodic snapshot of a node's registered stats.
    NodeStats {
        /// The node the stats belong to.
        node: String,
        /// The sampled values.
        stats: Vec<StatSnapshot>,
    },

    /// A workflow started.
    WorkflowStarted {
        /// The workflow name.
        workflow: String,
    },

    /// A workflow stopped.
    WorkflowStopped {
        /// The workflow name.
        workflow: String,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::NodeStateChanged { node, from, to } => {
                write!(f, "{}: {:?} -> {:?}", node, from, to)
            }
            Event::NodeError { node, message } => write!(f, "error in {}: {}", node, message),
            Event::NodeStats { node, stats } => {
                write!(f, "{}: {} stats", node, stats.len())
            }
            Event::WorkflowStarted { workflow } => write!(f, "workflow {} started", workflow),
            Event::WorkflowStopped { workflow } => write!(f, "workflow {} stopped", workflow),
        }
    }
}

/// Sender side of the event bus.
///
/// Cloned into every node; used to emit events. Subscribers receive
/// events in emission order per sender.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus retaining up to `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event.
    ///
    /// Returns the number of receivers that got the event; zero when
    /// nobody is subscribed, which is fine.
    pub fn send(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Send a node state transition.
    pub fn send_state_changed(&self, node: impl Into<String>, from: NodeState, to: NodeState) {
        self.send(Event::NodeStateChanged {
            node: node.into(),
            from,
            to,
        });
    }

    /// Send a node error.
    ///
    /// Cancellation is graceful termination, not an error; it is never
    /// forwarded to subscribers.
    pub fn send_node_error(&self, node: impl Into<String>, err: &Error) {
        if err.is_cancelled() {
            return;
        }
        self.send(Event::NodeError {
            node: node.into(),
            message: err.to_string(),
        });
    }

    /// Send a node stats snapshot.
    pub fn send_node_stats(&self, node: impl Into<String>, stats: Vec<StatSnapshot>) {
        self.send(Event::NodeStats {
            node: node.into(),
            stats,
        });
    }

    /// Create a receiver for events.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Create a stream of events.
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiver for workflow events.
///
/// Multiple receivers can be created from a single bus.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Event>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the bus has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // We missed some events, continue to get the next one
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    ///
    /// Returns `None` if no event is available or the bus has been dropped.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Wait until the named workflow reports stopped.
    ///
    /// Returns `Err` with the message of the first `NodeError` observed
    /// before the stop, if any.
    pub async fn wait_stopped(&mut self, workflow: &str) -> Result<(), String> {
        let mut first_error = None;
        while let Some(event) = self.recv().await {
            match event {
                Event::WorkflowStopped { workflow: w } if w == workflow => {
                    return match first_error {
                        Some(msg) => Err(msg),
                        None => Ok(()),
                    };
                }
                Event::NodeError { node, message } => {
                    if first_error.is_none() {
                        first_error = Some(format!("error in {}: {}", node, message));
                    }
                }
                _ => continue,
            }
        }
        Err("event bus closed unexpectedly".to_string())
    }
}

/// A stream adapter for receiving events.
///
/// Implements `Stream` for use with async iteration.
pub struct EventStream {
    receiver: EventReceiver,
}

impl EventStream {
    /// Create a new event stream from a receiver.
    pub fn new(receiver: EventReceiver) -> Self {
        Self { receiver }
    }
}

impl futures::Stream for EventStream {
    type Item = Event;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::future::Future;

        let fut = self.receiver.recv();
        tokio::pin!(fut);
        fut.poll(cx)
    }
}
