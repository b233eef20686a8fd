use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PagecraftError, Result};
use crate::types::{Delta, ErrorRecord, Feedback, Signal};

/// One applied node result, in the order the engine applied them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub node: String,
    pub signal: Signal,
    /// Artifact keys written by this node result.
    pub written: Vec<String>,
    pub loop_count: u32,
}

/// The single record threaded through a pipeline run.
///
/// Owned exclusively by the engine. Steps only ever see a [`StateView`]
/// snapshot and propose changes through a [`Delta`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    input: serde_json::Value,
    #[serde(default)]
    artifacts: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    errors: Vec<ErrorRecord>,
    #[serde(default)]
    loop_count: u32,
    max_loops: u32,
    #[serde(default)]
    feedback: Option<Feedback>,
    #[serde(default)]
    transitions: Vec<Transition>,
}

impl State {
    pub fn new(input: serde_json::Value, max_loops: u32) -> Self {
        Self {
            input,
            artifacts: BTreeMap::new(),
            errors: Vec::new(),
            loop_count: 0,
            max_loops,
            feedback: None,
            transitions: Vec::new(),
        }
    }

    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    pub fn artifacts(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.artifacts
    }

    pub fn artifact(&self, key: &str) -> Option<&serde_json::Value> {
        self.artifacts.get(key)
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn max_loops(&self) -> u32 {
        self.max_loops
    }

    pub fn feedback(&self) -> Option<&Feedback> {
        self.feedback.as_ref()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Apply a node's delta. Entries are inserted or overwritten, never
    /// removed. Returns the keys written, in key order.
    pub fn apply(&mut self, delta: Delta) -> Vec<String> {
        if delta.clears_feedback() {
            self.feedback = None;
        }
        let mut written = Vec::new();
        for (key, value) in delta.into_writes() {
            written.push(key.clone());
            self.artifacts.insert(key, value);
        }
        written
    }

    pub fn record_error(&mut self, record: ErrorRecord) {
        self.errors.push(record);
    }

    pub fn record_transition(&mut self, node: impl Into<String>, signal: Signal, written: Vec<String>) {
        self.transitions.push(Transition {
            node: node.into(),
            signal,
            written,
            loop_count: self.loop_count,
        });
    }

    /// Take one back-edge. Returns `false` (and leaves the counter alone)
    /// once the loop budget is spent, so `loop_count <= max_loops` always holds.
    pub fn enter_loop(&mut self) -> bool {
        if self.loop_count < self.max_loops {
            self.loop_count += 1;
            true
        } else {
            false
        }
    }

    pub fn set_feedback(&mut self, feedback: Feedback) {
        self.feedback = Some(feedback);
    }

    pub fn clear_feedback(&mut self) {
        self.feedback = None;
    }

    /// Freeze a copy of the current state for concurrent readers.
    pub fn snapshot(&self) -> Arc<State> {
        Arc::new(self.clone())
    }
}

/// Read-only view of a state snapshot, scoped to the keys a step declared
/// it reads.
#[derive(Debug, Clone)]
pub struct StateView {
    state: Arc<State>,
    reads: Arc<[String]>,
}

impl StateView {
    pub fn new(state: Arc<State>, reads: Arc<[String]>) -> Self {
        Self { state, reads }
    }

    /// The immutable input payload.
    pub fn input(&self) -> &serde_json::Value {
        &self.state.input
    }

    /// Artifact by key. Keys outside the declared read set are invisible.
    pub fn artifact(&self, key: &str) -> Option<&serde_json::Value> {
        if self.reads.iter().any(|k| k == key) {
            self.state.artifacts.get(key)
        } else {
            tracing::debug!(key, "Read of undeclared key ignored");
            None
        }
    }

    /// Deserialize a required artifact.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .artifact(key)
            .ok_or_else(|| PagecraftError::InvalidInput(format!("missing artifact '{}'", key)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| PagecraftError::InvalidInput(format!("artifact '{}': {}", key, e)))
    }

    pub fn feedback(&self) -> Option<&Feedback> {
        self.state.feedback.as_ref()
    }

    pub fn loop_count(&self) -> u32 {
        self.state.loop_count
    }

    pub fn reads(&self) -> &[String] {
        &self.reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;
    use serde_json::json;

    fn view(state: &State, reads: &[&str]) -> StateView {
        let reads: Vec<String> = reads.iter().map(|s| s.to_string()).collect();
        StateView::new(state.snapshot(), reads.into())
    }

    #[test]
    fn apply_inserts_and_overwrites() {
        let mut state = State::new(json!({"name": "Glow"}), 3);
        let written = state.apply(Delta::new().with("b", json!(1)).with("a", json!(2)));
        assert_eq!(written, vec!["a", "b"]);

        state.apply(Delta::new().with("a", json!(3)));
        assert_eq!(state.artifact("a"), Some(&json!(3)));
        assert_eq!(state.artifact("b"), Some(&json!(1)));
        assert_eq!(state.input(), &json!({"name": "Glow"}));
    }

    #[test]
    fn loop_counter_is_bounded() {
        let mut state = State::new(json!(null), 2);
        assert!(state.enter_loop());
        assert!(state.enter_loop());
        assert!(!state.enter_loop());
        assert_eq!(state.loop_count(), 2);
    }

    #[test]
    fn zero_loop_budget_never_loops() {
        let mut state = State::new(json!(null), 0);
        assert!(!state.enter_loop());
        assert_eq!(state.loop_count(), 0);
    }

    #[test]
    fn clear_feedback_through_delta() {
        let mut state = State::new(json!(null), 1);
        state.set_feedback(Feedback::new().with("faq_page", "short"));
        state.apply(Delta::new().clear_feedback());
        assert!(state.feedback().is_none());
    }

    #[test]
    fn view_hides_undeclared_keys() {
        let mut state = State::new(json!({}), 1);
        state.apply(Delta::new().with("product", json!({"name": "x"})).with("secret", json!(1)));

        let v = view(&state, &["product"]);
        assert!(v.artifact("product").is_some());
        assert!(v.artifact("secret").is_none());
    }

    #[test]
    fn view_is_a_snapshot() {
        let mut state = State::new(json!({}), 1);
        let v = view(&state, &["k"]);
        state.apply(Delta::new().with("k", json!(1)));
        assert!(v.artifact("k").is_none());
    }

    #[test]
    fn require_reports_missing_and_malformed() {
        let mut state = State::new(json!({}), 1);
        state.apply(Delta::new().with("count", json!("not a number")));
        let v = view(&state, &["count", "missing"]);

        assert!(matches!(
            v.require::<u32>("missing"),
            Err(PagecraftError::InvalidInput(_))
        ));
        assert!(matches!(
            v.require::<u32>("count"),
            Err(PagecraftError::InvalidInput(_))
        ));
    }

    #[test]
    fn serde_roundtrip_preserves_audit_trail() {
        let mut state = State::new(json!({"productName": "Glow"}), 3);
        state.apply(Delta::new().with("questions", json!([{"q": "?"}])));
        state.record_error(ErrorRecord::new("qgen", 1, ErrorKind::Recoverable, "503"));
        state.enter_loop();
        state.record_transition("qgen", Signal::Success, vec!["questions".into()]);
        state.set_feedback(Feedback::new().with("faq_page", "short"));

        let json = serde_json::to_string(&state).unwrap();
        let back: State = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.loop_count(), 1);
        assert_eq!(back.errors().len(), 1);
    }
}
