use std::collections::HashMap;

use tracing::debug;

use pagecraft_core::state::State;
use pagecraft_core::types::Signal;

use crate::graph::{Edge, Node, Target};

/// Terminal markers the router can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Completed,
    /// The gate rejected with no loop budget left.
    LoopBudgetExhausted,
    Aborted,
}

/// The router's choice after a node completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Next(String),
    /// Take a gate back-edge. The engine increments `loop_count` and stores
    /// the gate's feedback when committing it.
    BackEdge { to: String },
    Terminal(Terminal),
}

/// Evaluates outgoing edges in priority order and takes the first match.
///
/// Edges sharing a source are sorted by `priority`; equal priorities keep
/// their declaration order. Node registration order plays no part.
#[derive(Debug, Clone, Default)]
pub struct Router {
    outgoing: HashMap<String, Vec<Edge>>,
}

impl Router {
    pub fn new(edges: impl IntoIterator<Item = Edge>) -> Self {
        let mut outgoing: HashMap<String, Vec<Edge>> = HashMap::new();
        for edge in edges {
            outgoing.entry(edge.from.clone()).or_default().push(edge);
        }
        for list in outgoing.values_mut() {
            list.sort_by_key(|e| e.priority);
        }
        Self { outgoing }
    }

    /// Outgoing edges of `node`, in evaluation order.
    pub fn outgoing(&self, node: &str) -> &[Edge] {
        self.outgoing.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pick the next hop for `node`, which just finished with `signal`.
    ///
    /// Does not mutate state; the engine commits the decision.
    pub fn route(&self, node: &Node, signal: Signal, state: &State) -> Decision {
        if let Some(retry_entry) = node.retry_entry() {
            match signal {
                Signal::Success => {
                    debug!(node = %node.name(), "Gate accepted");
                    return Decision::Terminal(Terminal::Completed);
                }
                Signal::Reject if state.loop_count() < state.max_loops() => {
                    debug!(
                        node = %node.name(),
                        to = retry_entry,
                        loop_count = state.loop_count(),
                        "Gate rejected, taking back-edge"
                    );
                    return Decision::BackEdge {
                        to: retry_entry.to_string(),
                    };
                }
                Signal::Reject => {
                    debug!(
                        node = %node.name(),
                        loop_count = state.loop_count(),
                        "Gate rejected with no loop budget left"
                    );
                    return Decision::Terminal(Terminal::LoopBudgetExhausted);
                }
                _ => {}
            }
        }

        // Recoverable never leaves a retry policy; treat it as fatal if it does.
        let signal = match signal {
            Signal::RecoverableFailure | Signal::Reject => Signal::FatalFailure,
            other => other,
        };

        let matched = self
            .outgoing(node.name())
            .iter()
            .find(|edge| edge.condition.matches(signal, state.artifacts()));

        let decision = match matched {
            Some(edge) => match &edge.to {
                Target::Node(next) => Decision::Next(next.clone()),
                Target::Complete => Decision::Terminal(Terminal::Completed),
                Target::Abort => Decision::Terminal(Terminal::Aborted),
            },
            // Only fatal failures get here in a validated graph.
            None => Decision::Terminal(Terminal::Aborted),
        };
        debug!(node = %node.name(), %signal, ?decision, "Routed");
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagecraft_core::types::Delta;
    use pagecraft_test_utils::{ScriptedGate, ScriptedStep};
    use serde_json::json;

    fn step(name: &str) -> Node {
        Node::step(name, ScriptedStep::succeed(Delta::new()))
    }

    #[test]
    fn first_match_by_priority_then_declaration() {
        let router = Router::new(vec![
            Edge::on_success("a", "late").with_priority(5),
            Edge::on_success("a", "first_declared"),
            Edge::always("a", "second_declared"),
        ]);
        let state = State::new(json!({}), 3);
        assert_eq!(
            router.route(&step("a"), Signal::Success, &state),
            Decision::Next("first_declared".into())
        );
        // OnSuccess does not match a failure; Always does.
        assert_eq!(
            router.route(&step("a"), Signal::FatalFailure, &state),
            Decision::Next("second_declared".into())
        );
    }

    #[test]
    fn priority_wins_over_declaration_order() {
        let router = Router::new(vec![
            Edge::on_success("a", "b"),
            Edge::conditional("a", "c", "flag exists").with_priority(-1),
        ]);
        let mut state = State::new(json!({}), 3);
        assert_eq!(
            router.route(&step("a"), Signal::Success, &state),
            Decision::Next("b".into())
        );
        state.apply(Delta::new().with("flag", json!(true)));
        assert_eq!(
            router.route(&step("a"), Signal::Success, &state),
            Decision::Next("c".into())
        );
    }

    #[test]
    fn unmatched_failure_aborts() {
        let router = Router::new(vec![Edge::on_success("a", "b")]);
        let state = State::new(json!({}), 3);
        assert_eq!(
            router.route(&step("a"), Signal::FatalFailure, &state),
            Decision::Terminal(Terminal::Aborted)
        );
    }

    #[test]
    fn failure_edge_to_terminal_marker() {
        let router = Router::new(vec![
            Edge::on_success("a", "b"),
            Edge::on_failure("a", Target::Complete),
        ]);
        let state = State::new(json!({}), 3);
        assert_eq!(
            router.route(&step("a"), Signal::FatalFailure, &state),
            Decision::Terminal(Terminal::Completed)
        );
    }

    #[test]
    fn gate_reject_respects_loop_budget() {
        let router = Router::default();
        let gate = Node::gate("reviewer", ScriptedGate::accept(), "qgen");

        let mut state = State::new(json!({}), 1);
        assert_eq!(
            router.route(&gate, Signal::Reject, &state),
            Decision::BackEdge { to: "qgen".into() }
        );
        assert!(state.enter_loop());
        assert_eq!(
            router.route(&gate, Signal::Reject, &state),
            Decision::Terminal(Terminal::LoopBudgetExhausted)
        );
        assert_eq!(
            router.route(&gate, Signal::Success, &state),
            Decision::Terminal(Terminal::Completed)
        );
    }

    #[test]
    fn gate_failure_uses_declared_edges() {
        let router = Router::new(vec![Edge::on_failure("reviewer", Target::Complete)]);
        let gate = Node::gate("reviewer", ScriptedGate::accept(), "qgen");
        let state = State::new(json!({}), 3);
        assert_eq!(
            router.route(&gate, Signal::FatalFailure, &state),
            Decision::Terminal(Terminal::Completed)
        );
        let bare = Router::default();
        assert_eq!(
            bare.route(&gate, Signal::FatalFailure, &state),
            Decision::Terminal(Terminal::Aborted)
        );
    }
}
