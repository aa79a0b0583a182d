//! Bounded, cancellation-aware ingress queues.
//!
//! Every consuming node accepts work through one of these: a bounded
//! multi-producer, single-consumer queue tied to the node's cancellation
//! context. Producers block when the queue is full (backpressure) and
//! unblock with [`Error::Cancelled`] once the context is cancelled; the
//! consumer then drains everything already queued before shutting down,
//! so no accepted item is dropped.

use crate::error::{Error, Result};
use crate::stats::{CounterRateStat, StatValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct QueueCounters {
    processed: AtomicU64,
    rate: CounterRateStat,
}

/// Producer handle of an ingress queue.
///
/// Cloneable; every producer shares the same bounded channel.
pub struct IngressQueue<T> {
    tx: mpsc::Sender<T>,
    token: CancellationToken,
    counters: Arc<QueueCounters>,
}

impl<T: Send> IngressQueue<T> {
    /// Create a queue bound to a parent cancellation context.
    ///
    /// Returns the producer handle and the single consumer half.
    pub fn new(capacity: usize, parent: &CancellationToken) -> (Self, IngressConsumer<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        let token = parent.child_token();
        let counters = Arc::new(QueueCounters::default());
        let queue = Self {
            tx,
            token: token.clone(),
            counters: counters.clone(),
        };
        let consumer = IngressConsumer {
            rx,
            token,
            counters,
            draining: false,
        };
        (queue, consumer)
    }

    /// Enqueue an item, blocking while the queue is full.
    ///
    /// Returns [`Error::Cancelled`] once the queue is stopped or its
    /// context cancelled.
    pub async fn send(&self, item: T) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            _ = self.token.cancelled() => Err(Error::Cancelled),
            res = self.tx.send(item) => res.map_err(|_| Error::Cancelled),
        }
    }

    /// Stop the queue: producers unblock, the consumer drains what is
    /// already queued and then exits.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Number of items currently queued.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Total items the consumer has dequeued.
    pub fn processed(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    /// The processed-rate stat, for registration with a node.
    pub(crate) fn rate_stat(&self) -> Arc<QueueRate> {
        Arc::new(QueueRate {
            counters: self.counters.clone(),
        })
    }
}

impl<T> Clone for IngressQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            token: self.token.clone(),
            counters: self.counters.clone(),
        }
    }
}

/// Stat adapter exposing a queue's processed rate.
pub(crate) struct QueueRate {
    counters: Arc<QueueCounters>,
}

impl StatValue for QueueRate {
    fn value(&self) -> f64 {
        self.counters.rate.value()
    }
}

/// Consumer half of an ingress queue.
///
/// There is exactly one consumer per queue; its owning node drives it
/// from the node's task.
pub struct IngressConsumer<T> {
    rx: mpsc::Receiver<T>,
    token: CancellationToken,
    counters: Arc<QueueCounters>,
    draining: bool,
}

impl<T: Send> IngressConsumer<T> {
    /// Dequeue the next item.
    ///
    /// Awaits new items until the queue is stopped or cancelled, then
    /// switches to draining already-queued items. Returns `None` once
    /// the queue is stopped and empty.
    pub async fn recv(&mut self) -> Option<T> {
        if self.draining {
            return self.drain_next();
        }
        let item = tokio::select! {
            item = self.rx.recv() => item,
            _ = self.token.cancelled() => {
                self.draining = true;
                self.rx.close();
                return self.drain_next();
            }
        };
        if item.is_some() {
            self.record();
        }
        item
    }

    fn drain_next(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => {
                self.record();
                Some(item)
            }
            Err(_) => None,
        }
    }

    fn record(&self) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        self.counters.rate.add(1);
    }
}
