//! Graph Execution Engine: cyclic pipeline orchestration with bounded loops.
//!
//! A pipeline is a graph of `Node`s connected by `Edge`s. A node is a step,
//! a quality gate, or a parallel group of steps. Edges carry a condition
//! (Always, OnSuccess, OnFailure, Conditional expression) and a priority.
//!
//! `GraphBuilder` validates the whole graph up front. `GraphEngine` then walks
//! it from the entry node, dispatching each node through its retry policy
//! (or the fan-out barrier for groups), applying the returned deltas to the
//! run's `State`, and following the router's decision. The only cycles are
//! gate back-edges, bounded by `max_loops`.

pub mod builder;
pub mod edge;
pub mod executor;
pub mod node;

pub use builder::{Graph, GraphBuilder};
pub use edge::{evaluate_condition, Edge, EdgeCondition, Target};
pub use executor::{GraphEngine, PartialReason, RunOptions, TerminalResult};
pub use node::{Node, NodeKind};
