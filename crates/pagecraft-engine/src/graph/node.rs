use std::fmt;
use std::sync::Arc;

use pagecraft_core::traits::{QualityGate, Step};

use crate::barrier::Branch;
use crate::gate::GateAdapter;
use crate::retry::RetryPolicy;

/// What a node dispatches to.
#[derive(Clone)]
pub enum NodeKind {
    /// A single step wrapped by its retry policy.
    Step(Arc<dyn Step>),
    /// A quality gate. `Reject` takes the bounded back-edge to `retry_entry`.
    Gate {
        step: Arc<dyn Step>,
        retry_entry: String,
    },
    /// A fan-out over independent member nodes, joined before routing.
    Parallel { members: Vec<String> },
}

/// A node in the pipeline graph.
///
/// Reads and writes are declared up front: the engine hides undeclared keys
/// from the step's view and refuses deltas that touch undeclared keys.
#[derive(Clone)]
pub struct Node {
    name: String,
    kind: NodeKind,
    reads: Arc<[String]>,
    writes: Vec<String>,
    retry: RetryPolicy,
}

impl Node {
    fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            reads: Arc::from(Vec::new()),
            writes: Vec::new(),
            retry: RetryPolicy::new(1),
        }
    }

    /// A plain step node with a single attempt until [`Node::with_retry`].
    pub fn step(name: impl Into<String>, step: impl Step) -> Self {
        Self::new(name, NodeKind::Step(Arc::new(step)))
    }

    /// Same as [`Node::step`] for an already shared step.
    pub fn shared(name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        Self::new(name, NodeKind::Step(step))
    }

    pub fn gate(
        name: impl Into<String>,
        gate: impl QualityGate,
        retry_entry: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            NodeKind::Gate {
                step: Arc::new(GateAdapter::new(Arc::new(gate))),
                retry_entry: retry_entry.into(),
            },
        )
    }

    /// A parallel group. Its reads and writes are those of its members.
    pub fn parallel<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            NodeKind::Parallel {
                members: members.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn with_reads<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads = keys.into_iter().map(Into::into).collect::<Vec<_>>().into();
        self
    }

    pub fn with_writes<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes = keys.into_iter().map(Into::into).collect();
        self.writes.sort();
        self.writes.dedup();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn reads(&self) -> &[String] {
        &self.reads
    }

    pub(crate) fn reads_shared(&self) -> Arc<[String]> {
        self.reads.clone()
    }

    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    pub fn declares_write(&self, key: &str) -> bool {
        self.writes.iter().any(|w| w == key)
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn is_gate(&self) -> bool {
        matches!(self.kind, NodeKind::Gate { .. })
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.kind, NodeKind::Parallel { .. })
    }

    /// The back-edge target, for gates.
    pub fn retry_entry(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Gate { retry_entry, .. } => Some(retry_entry),
            _ => None,
        }
    }

    pub fn members(&self) -> &[String] {
        match &self.kind {
            NodeKind::Parallel { members } => members,
            _ => &[],
        }
    }

    /// Short label for listings.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            NodeKind::Step(_) => "step",
            NodeKind::Gate { .. } => "gate",
            NodeKind::Parallel { .. } => "parallel",
        }
    }

    /// This node as a barrier branch; `None` for groups.
    pub(crate) fn branch(&self) -> Option<Branch> {
        let step = match &self.kind {
            NodeKind::Step(step) | NodeKind::Gate { step, .. } => step.clone(),
            NodeKind::Parallel { .. } => return None,
        };
        Some(Branch {
            name: self.name.clone(),
            step,
            reads: self.reads.clone(),
            retry: self.retry.clone(),
        })
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Node");
        s.field("name", &self.name).field("kind", &self.kind_label());
        if let Some(entry) = self.retry_entry() {
            s.field("retry_entry", &entry);
        }
        if self.is_parallel() {
            s.field("members", &self.members());
        }
        s.field("reads", &self.reads)
            .field("writes", &self.writes)
            .field("max_attempts", &self.retry.max_attempts())
            .finish()
    }
}
