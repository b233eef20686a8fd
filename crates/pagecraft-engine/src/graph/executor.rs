use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use pagecraft_core::event::EventBus;
use pagecraft_core::state::{State, StateView};
use pagecraft_core::types::{
    Delta, ErrorKind, ErrorRecord, Feedback, PipelineEvent, RunId, Signal,
};

use super::builder::Graph;
use super::node::{Node, NodeKind};
use crate::barrier::run_barrier;
use crate::retry::Attempted;
use crate::router::{Decision, Terminal};

/// Per-run overrides of the graph defaults.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_loops: Option<u32>,
    /// Best-effort deadline, checked before each dispatch.
    pub timeout: Option<Duration>,
    /// Caller-chosen id, so subscribers can filter events before the run starts.
    pub run_id: Option<RunId>,
}

/// Why a run ended without completing or aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialReason {
    /// The gate kept rejecting after `max_loops` back-edges.
    LoopBudgetExhausted,
    /// The global deadline passed between two dispatches.
    TimedOut,
    /// More than `max_transitions` nodes were dispatched.
    IterationBudgetExhausted,
}

/// How a run ended, with the final state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminalResult {
    Completed {
        state: State,
    },
    PartiallyFailed {
        state: State,
        reason: PartialReason,
    },
    /// A fatal failure with no non-terminal route. `step` names the node
    /// (or group member) that failed.
    Aborted {
        state: State,
        step: String,
    },
}

impl TerminalResult {
    pub fn state(&self) -> &State {
        match self {
            TerminalResult::Completed { state }
            | TerminalResult::PartiallyFailed { state, .. }
            | TerminalResult::Aborted { state, .. } => state,
        }
    }

    pub fn into_state(self) -> State {
        match self {
            TerminalResult::Completed { state }
            | TerminalResult::PartiallyFailed { state, .. }
            | TerminalResult::Aborted { state, .. } => state,
        }
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        self.state().errors()
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TerminalResult::Completed { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TerminalResult::Aborted { .. })
    }

    pub fn outcome_name(&self) -> &'static str {
        match self {
            TerminalResult::Completed { .. } => "completed",
            TerminalResult::PartiallyFailed { .. } => "partially_failed",
            TerminalResult::Aborted { .. } => "aborted",
        }
    }
}

/// A node result after the engine's contract checks, ready to apply.
struct Settled {
    signal: Signal,
    delta: Option<Delta>,
    errors: Vec<ErrorRecord>,
    feedback: Option<Feedback>,
}

/// What one dispatch produced, as seen by the router.
struct Dispatched {
    signal: Signal,
    feedback: Option<Feedback>,
    /// Node to blame if the run aborts here.
    failed: String,
}

/// Drives a validated [`Graph`] from its entry node to a terminal marker.
///
/// The engine is the only code that mutates [`State`]. One node (or one
/// parallel group) is in flight at a time; parallelism only happens inside
/// the barrier.
pub struct GraphEngine {
    graph: Arc<Graph>,
    events: Option<Arc<EventBus>>,
}

impl GraphEngine {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph: Arc::new(graph),
            events: None,
        }
    }

    /// Publish [`PipelineEvent`]s on `bus` while running.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    fn publish(&self, event: PipelineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Run the graph over `input` until it reaches a terminal marker.
    pub async fn run(&self, input: serde_json::Value, options: RunOptions) -> TerminalResult {
        let run_id = options.run_id.unwrap_or_default();
        let max_loops = options.max_loops.unwrap_or(self.graph.max_loops());
        let timeout = options.timeout.or(self.graph.timeout());
        let deadline = timeout.map(|t| Instant::now() + t);
        let max_transitions = self.graph.max_transitions();

        let mut state = State::new(input, max_loops);
        let mut current = self.graph.entry().to_string();
        let mut dispatched = 0u32;

        info!(run_id = %run_id, entry = %current, max_loops, "Pipeline run started");
        self.publish(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            entry: current.clone(),
        });

        let result = loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(run_id = %run_id, next = %current, "Global timeout reached before dispatch");
                break TerminalResult::PartiallyFailed {
                    state,
                    reason: PartialReason::TimedOut,
                };
            }
            if dispatched >= max_transitions {
                warn!(run_id = %run_id, max_transitions, "Iteration budget exhausted");
                break TerminalResult::PartiallyFailed {
                    state,
                    reason: PartialReason::IterationBudgetExhausted,
                };
            }
            dispatched += 1;

            let Some(node) = self.graph.node(&current) else {
                error!(run_id = %run_id, node = %current, "Node not found in graph");
                break TerminalResult::Aborted {
                    state,
                    step: current,
                };
            };

            let outcome = self.dispatch(&run_id, node, &mut state).await;

            match self.graph.router().route(node, outcome.signal, &state) {
                Decision::Next(next) => current = next,
                Decision::BackEdge { to } => {
                    if !state.enter_loop() {
                        break TerminalResult::PartiallyFailed {
                            state,
                            reason: PartialReason::LoopBudgetExhausted,
                        };
                    }
                    if let Some(feedback) = outcome.feedback {
                        state.set_feedback(feedback);
                    }
                    info!(
                        run_id = %run_id,
                        from = %node.name(),
                        to = %to,
                        loop_count = state.loop_count(),
                        "Back-edge taken"
                    );
                    self.publish(PipelineEvent::BackEdge {
                        run_id: run_id.clone(),
                        from: node.name().to_string(),
                        to: to.clone(),
                        loop_count: state.loop_count(),
                    });
                    current = to;
                }
                Decision::Terminal(Terminal::Completed) => {
                    break TerminalResult::Completed { state };
                }
                Decision::Terminal(Terminal::LoopBudgetExhausted) => {
                    if let Some(feedback) = outcome.feedback {
                        state.set_feedback(feedback);
                    }
                    break TerminalResult::PartiallyFailed {
                        state,
                        reason: PartialReason::LoopBudgetExhausted,
                    };
                }
                Decision::Terminal(Terminal::Aborted) => {
                    break TerminalResult::Aborted {
                        state,
                        step: outcome.failed,
                    };
                }
            }
        };

        let final_state = result.state();
        match &result {
            TerminalResult::Completed { .. } => info!(
                run_id = %run_id,
                loop_count = final_state.loop_count(),
                errors = final_state.errors().len(),
                "Pipeline completed"
            ),
            TerminalResult::PartiallyFailed { reason, .. } => warn!(
                run_id = %run_id,
                ?reason,
                loop_count = final_state.loop_count(),
                errors = final_state.errors().len(),
                "Pipeline partially failed"
            ),
            TerminalResult::Aborted { step, .. } => error!(
                run_id = %run_id,
                step = %step,
                errors = final_state.errors().len(),
                "Pipeline aborted"
            ),
        }
        self.publish(PipelineEvent::RunFinished {
            run_id,
            outcome: result.outcome_name().to_string(),
            loop_count: final_state.loop_count(),
            error_count: final_state.errors().len(),
        });

        result
    }

    async fn dispatch(&self, run_id: &RunId, node: &Node, state: &mut State) -> Dispatched {
        info!(
            run_id = %run_id,
            node = %node.name(),
            kind = node.kind_label(),
            loop_count = state.loop_count(),
            "Dispatching node"
        );
        self.publish(PipelineEvent::NodeStarted {
            run_id: run_id.clone(),
            node: node.name().to_string(),
            loop_count: state.loop_count(),
        });
        let started = Instant::now();

        let dispatched = match node.kind() {
            NodeKind::Step(step) | NodeKind::Gate { step, .. } => {
                let view = StateView::new(state.snapshot(), node.reads_shared());
                let attempted = node.retry().run(node.name(), step.as_ref(), view).await;
                let settled = settle(node, attempted);
                let signal = settled.signal;
                let feedback = settled.feedback.clone();
                let written = self.commit(run_id, node.name(), settled, state);
                state.record_transition(node.name(), signal, written);
                if node.is_gate() && signal == Signal::Success {
                    state.clear_feedback();
                }
                Dispatched {
                    signal,
                    feedback,
                    failed: node.name().to_string(),
                }
            }
            NodeKind::Parallel { members } => {
                let members: Vec<&Node> =
                    members.iter().filter_map(|m| self.graph.node(m)).collect();
                let branches: Vec<_> = members.iter().filter_map(|m| m.branch()).collect();
                let outcomes = run_barrier(&branches, state.snapshot()).await;

                // Join: apply in declaration order.
                let mut signals = Vec::with_capacity(outcomes.len());
                let mut group_written = Vec::new();
                let mut failed = None;
                for (member, outcome) in members.iter().zip(outcomes) {
                    let settled = settle(member, outcome.attempted);
                    let signal = settled.signal;
                    if signal.is_failure() && failed.is_none() {
                        failed = Some(member.name().to_string());
                    }
                    let written = self.commit(run_id, member.name(), settled, state);
                    state.record_transition(member.name(), signal, written.clone());
                    group_written.extend(written);
                    signals.push(signal);
                }
                group_written.sort();

                let signal = Signal::aggregate(signals);
                state.record_transition(node.name(), signal, group_written);
                Dispatched {
                    signal,
                    feedback: None,
                    failed: failed.unwrap_or_else(|| node.name().to_string()),
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            run_id = %run_id,
            node = %node.name(),
            signal = %dispatched.signal,
            elapsed_ms,
            "Node finished"
        );
        self.publish(PipelineEvent::NodeFinished {
            run_id: run_id.clone(),
            node: node.name().to_string(),
            signal: dispatched.signal,
            elapsed_ms,
        });
        dispatched
    }

    /// Record a settled node's errors and apply its delta. Returns the keys
    /// written.
    fn commit(&self, run_id: &RunId, node: &str, settled: Settled, state: &mut State) -> Vec<String> {
        for record in settled.errors {
            self.publish(PipelineEvent::AttemptFailed {
                run_id: run_id.clone(),
                node: node.to_string(),
                attempt: record.attempt,
                kind: record.kind,
                message: record.message.clone(),
            });
            state.record_error(record);
        }
        match settled.delta {
            Some(delta) => state.apply(delta),
            None => Vec::new(),
        }
    }
}

/// Enforce the node contract on a retry-policy result.
///
/// A delta touching undeclared keys, or a `Reject` from anything but a
/// gate, turns the result into a fatal failure and discards the delta.
fn settle(node: &Node, attempted: Attempted) -> Settled {
    let Attempted {
        output,
        attempts,
        mut errors,
        ..
    } = attempted;
    let name = node.name();

    if output.signal == Signal::Reject && !node.is_gate() {
        let message = "returned Reject but is not a quality gate".to_string();
        warn!(node = %name, "{}", message);
        errors.push(ErrorRecord::new(name, attempts, ErrorKind::Fatal, message));
        return Settled {
            signal: Signal::FatalFailure,
            delta: None,
            errors,
            feedback: None,
        };
    }

    let undeclared: Vec<&str> = output
        .delta
        .keys()
        .filter(|key| !node.declares_write(key))
        .collect();
    if !undeclared.is_empty() {
        let message = format!("wrote undeclared keys: {}", undeclared.join(", "));
        error!(node = %name, error = %message, "Contract violation");
        errors.push(ErrorRecord::new(name, attempts, ErrorKind::Fatal, message));
        return Settled {
            signal: Signal::FatalFailure,
            delta: None,
            errors,
            feedback: None,
        };
    }

    let feedback = if output.signal == Signal::Reject {
        let feedback = output.feedback.unwrap_or_default();
        let message = match output.detail {
            Some(detail) if !detail.is_empty() => detail,
            _ => "rejected by quality gate".to_string(),
        };
        errors.push(ErrorRecord::new(name, attempts, ErrorKind::Reject, message));
        Some(feedback)
    } else {
        None
    };

    Settled {
        signal: output.signal,
        delta: Some(output.delta),
        errors,
        feedback,
    }
}
