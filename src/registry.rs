//! Process-wide registry of named workflows.

use crate::error::{Error, Result};
use crate::workflow::Workflow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A name-keyed registry of workflows.
///
/// The pool never starts or stops workflows; it only stores and serves
/// them. All operations are safe under concurrent callers.
#[derive(Default)]
pub struct WorkflowPool {
    workflows: Mutex<HashMap<String, Arc<Workflow>>>,
}

impl WorkflowPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow under its name. Last write wins.
    pub fn add(&self, workflow: Arc<Workflow>) {
        self.workflows
            .lock()
            .unwrap()
            .insert(workflow.name().to_string(), workflow);
    }

    /// Look up a workflow by name.
    pub fn get(&self, name: &str) -> Result<Arc<Workflow>> {
        self.workflows
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("workflow {name}")))
    }

    /// Snapshot of the registered workflows, in unspecified order.
    pub fn list(&self) -> Vec<Arc<Workflow>> {
        self.workflows.lock().unwrap().values().cloned().collect()
    }

    /// Number of registered workflows.
    pub fn len(&self) -> usize {
        self.workflows.lock().unwrap().len()
    }

    /// Check whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for WorkflowPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowPool")
            .field("workflows", &self.len())
            .finish()
    }
}
