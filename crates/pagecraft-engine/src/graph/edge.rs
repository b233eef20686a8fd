use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use pagecraft_core::types::Signal;

/// Where an edge leads: another node or a terminal marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Node(String),
    /// End the run as `Completed`.
    Complete,
    /// End the run as `Aborted`.
    Abort,
}

impl Target {
    pub fn node(&self) -> Option<&str> {
        match self {
            Target::Node(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Node(name) => write!(f, "{}", name),
            Target::Complete => write!(f, "<completed>"),
            Target::Abort => write!(f, "<aborted>"),
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Node(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Node(name)
    }
}

/// An edge connecting a node to its successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node name.
    pub from: String,
    pub to: Target,
    /// Condition that must be true to traverse this edge.
    #[serde(default)]
    pub condition: EdgeCondition,
    /// Evaluation order among edges sharing a source; lower first.
    #[serde(default)]
    pub priority: i32,
}

/// Condition for traversing an edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Traverse whatever the signal.
    #[default]
    Always,
    /// Traverse only if the source node succeeded.
    OnSuccess,
    /// Traverse only if the source node failed fatally.
    OnFailure,
    /// Traverse on success if a simple expression over the artifacts holds.
    /// Supported: `key == "value"`, `key != "value"`, `key contains "substr"`,
    /// `key exists`. `key` may be a dotted path into an artifact.
    Conditional { expr: String },
}

impl EdgeCondition {
    /// Whether this condition accepts `signal` given the current artifacts.
    pub fn matches(&self, signal: Signal, artifacts: &BTreeMap<String, serde_json::Value>) -> bool {
        match self {
            EdgeCondition::Always => true,
            EdgeCondition::OnSuccess => signal == Signal::Success,
            EdgeCondition::OnFailure => signal == Signal::FatalFailure,
            EdgeCondition::Conditional { expr } => {
                signal == Signal::Success && evaluate_condition(expr, artifacts)
            }
        }
    }

    /// Whether this condition matches every `Success` regardless of state.
    pub fn covers_success(&self) -> bool {
        matches!(self, EdgeCondition::Always | EdgeCondition::OnSuccess)
    }
}

impl fmt::Display for EdgeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeCondition::Always => write!(f, "always"),
            EdgeCondition::OnSuccess => write!(f, "on_success"),
            EdgeCondition::OnFailure => write!(f, "on_failure"),
            EdgeCondition::Conditional { expr } => write!(f, "if {}", expr),
        }
    }
}

impl Edge {
    fn new(from: impl Into<String>, to: impl Into<Target>, condition: EdgeCondition) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition,
            priority: 0,
        }
    }

    /// Create an unconditional edge.
    pub fn always(from: impl Into<String>, to: impl Into<Target>) -> Self {
        Self::new(from, to, EdgeCondition::Always)
    }

    /// Create an edge that fires on success.
    pub fn on_success(from: impl Into<String>, to: impl Into<Target>) -> Self {
        Self::new(from, to, EdgeCondition::OnSuccess)
    }

    /// Create an edge that fires on fatal failure.
    pub fn on_failure(from: impl Into<String>, to: impl Into<Target>) -> Self {
        Self::new(from, to, EdgeCondition::OnFailure)
    }

    /// Create a conditional edge.
    pub fn conditional(
        from: impl Into<String>,
        to: impl Into<Target>,
        expr: impl Into<String>,
    ) -> Self {
        Self::new(from, to, EdgeCondition::Conditional { expr: expr.into() })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Evaluate a simple conditional expression against the artifacts.
///
/// Supported expressions:
/// - `key == "value"`: exact match
/// - `key != "value"`: not equal (an absent key counts as not equal)
/// - `key contains "substr"`: substring match, or membership for arrays
/// - `key exists`: the key is present and not null
///
/// Non-string values compare by their JSON rendering, so `count == "3"`
/// matches the number 3. Returns `false` for unparseable expressions.
pub fn evaluate_condition(expr: &str, artifacts: &BTreeMap<String, serde_json::Value>) -> bool {
    let expr = expr.trim();

    // key exists
    if let Some(key) = expr.strip_suffix(" exists") {
        return lookup(artifacts, key.trim()).is_some_and(|v| !v.is_null());
    }

    // key contains "value"
    if let Some((key, substr)) = parse_operator(expr, " contains ") {
        return match lookup(artifacts, key) {
            Some(serde_json::Value::String(s)) => s.contains(substr),
            Some(serde_json::Value::Array(items)) => {
                items.iter().any(|item| render(item) == substr)
            }
            _ => false,
        };
    }

    // key != "value"
    if let Some((key, value)) = parse_operator(expr, "!=") {
        return !lookup(artifacts, key).is_some_and(|v| render(v) == value);
    }

    // key == "value"
    if let Some((key, value)) = parse_operator(expr, "==") {
        return lookup(artifacts, key).is_some_and(|v| render(v) == value);
    }

    false
}

/// Resolve `key` or `key.field.sub` against the artifacts.
fn lookup<'a>(
    artifacts: &'a BTreeMap<String, serde_json::Value>,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut segments = path.split('.');
    let root = artifacts.get(segments.next()?)?;
    segments.try_fold(root, |value, segment| match value {
        serde_json::Value::Object(map) => map.get(segment),
        serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse `key OP "value"` expressions, returning (key, value).
fn parse_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let (key, val) = expr.split_once(op)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, val.trim().trim_matches('"')))
}
