use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one pipeline run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome tag of a step, gate or barrier invocation.
///
/// Only the retry policy and the router look at signals; steps never see
/// each other's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Success,
    /// Transient failure, eligible for retry.
    RecoverableFailure,
    /// Non-retriable failure.
    FatalFailure,
    /// Quality-gate verdict that triggers the back-edge.
    Reject,
}

impl Signal {
    fn severity(self) -> u8 {
        match self {
            Signal::Success => 0,
            Signal::RecoverableFailure => 1,
            Signal::Reject => 2,
            Signal::FatalFailure => 3,
        }
    }

    /// The more severe of two signals (`FatalFailure` dominates
    /// `RecoverableFailure` dominates `Success`).
    pub fn worst(self, other: Signal) -> Signal {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Aggregate a set of branch signals. An empty set is a `Success`.
    pub fn aggregate(signals: impl IntoIterator<Item = Signal>) -> Signal {
        signals.into_iter().fold(Signal::Success, Signal::worst)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Signal::RecoverableFailure | Signal::FatalFailure)
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Success => write!(f, "success"),
            Signal::RecoverableFailure => write!(f, "recoverable_failure"),
            Signal::FatalFailure => write!(f, "fatal_failure"),
            Signal::Reject => write!(f, "reject"),
        }
    }
}

/// Classification of an entry in the run's error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Recoverable,
    Fatal,
    Reject,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Recoverable => write!(f, "recoverable"),
            ErrorKind::Fatal => write!(f, "fatal"),
            ErrorKind::Reject => write!(f, "reject"),
        }
    }
}

/// One failed attempt (or gate rejection), as recorded in `State::errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub step: String,
    /// 1-based attempt number within the retry policy invocation.
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        step: impl Into<String>,
        attempt: u32,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            step: step.into(),
            attempt,
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// A single critique produced by a quality gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    /// Artifact key the critique is about.
    pub artifact: String,
    pub message: String,
}

/// Structured critique set handed back to the steps a rejection is routed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub critiques: Vec<Critique>,
}

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style critique.
    pub fn with(mut self, artifact: impl Into<String>, message: impl Into<String>) -> Self {
        self.add(artifact, message);
        self
    }

    pub fn add(&mut self, artifact: impl Into<String>, message: impl Into<String>) {
        self.critiques.push(Critique {
            artifact: artifact.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.critiques.is_empty()
    }

    /// Whether any critique concerns `artifact`.
    pub fn targets(&self, artifact: &str) -> bool {
        self.critiques.iter().any(|c| c.artifact == artifact)
    }

    /// Messages for a single artifact, in the order the gate produced them.
    pub fn for_artifact<'a>(&'a self, artifact: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.critiques
            .iter()
            .filter(move |c| c.artifact == artifact)
            .map(|c| c.message.as_str())
    }

    /// One-line rendering used for error records and logs.
    pub fn summary(&self) -> String {
        self.critiques
            .iter()
            .map(|c| format!("{}: {}", c.artifact, c.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Proposed state update returned by a step. The engine applies it; a step
/// never mutates state itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    writes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    clear_feedback: bool,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style write.
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.writes.insert(key.into(), value);
    }

    /// Mark the current feedback as consumed.
    pub fn clear_feedback(mut self) -> Self {
        self.clear_feedback = true;
        self
    }

    pub fn clears_feedback(&self) -> bool {
        self.clear_feedback
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.writes.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.writes.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && !self.clear_feedback
    }

    pub fn into_writes(self) -> BTreeMap<String, serde_json::Value> {
        self.writes
    }
}

/// What a step hands back to the engine: a delta plus the signal.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub delta: Delta,
    pub signal: Signal,
    /// Human-readable failure detail, recorded in `State::errors`.
    pub detail: Option<String>,
    /// Only honored for quality-gate nodes.
    pub feedback: Option<Feedback>,
}

impl StepOutput {
    pub fn success(delta: Delta) -> Self {
        Self {
            delta,
            signal: Signal::Success,
            detail: None,
            feedback: None,
        }
    }

    pub fn recoverable(detail: impl Into<String>) -> Self {
        Self {
            delta: Delta::new(),
            signal: Signal::RecoverableFailure,
            detail: Some(detail.into()),
            feedback: None,
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self {
            delta: Delta::new(),
            signal: Signal::FatalFailure,
            detail: Some(detail.into()),
            feedback: None,
        }
    }

    /// A fatal failure that still carries degraded output.
    pub fn degraded(delta: Delta, detail: impl Into<String>) -> Self {
        Self {
            delta,
            signal: Signal::FatalFailure,
            detail: Some(detail.into()),
            feedback: None,
        }
    }

    pub fn reject(feedback: Feedback) -> Self {
        Self {
            delta: Delta::new(),
            signal: Signal::Reject,
            detail: Some(feedback.summary()),
            feedback: Some(feedback),
        }
    }
}

/// Verdict of a quality gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Accept,
    Reject(Feedback),
}

/// Events emitted while a pipeline runs.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Run started at the entry node.
    RunStarted { run_id: RunId, entry: String },
    /// A node (step, gate or parallel group) was dispatched.
    NodeStarted { run_id: RunId, node: String, loop_count: u32 },
    /// A single attempt failed inside a retry policy.
    AttemptFailed {
        run_id: RunId,
        node: String,
        attempt: u32,
        kind: ErrorKind,
        message: String,
    },
    /// A node returned and its delta was applied.
    NodeFinished {
        run_id: RunId,
        node: String,
        signal: Signal,
        elapsed_ms: u64,
    },
    /// The router took a gate back-edge.
    BackEdge {
        run_id: RunId,
        from: String,
        to: String,
        loop_count: u32,
    },
    /// The run reached a terminal marker.
    RunFinished {
        run_id: RunId,
        outcome: String,
        loop_count: u32,
        error_count: usize,
    },
}
