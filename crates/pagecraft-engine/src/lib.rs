pub mod barrier;
pub mod gate;
pub mod graph;
pub mod retry;
pub mod router;
pub mod run_log;

pub use barrier::{run_barrier, Branch};
pub use gate::GateAdapter;
pub use graph::{
    Edge, EdgeCondition, Graph, GraphBuilder, GraphEngine, Node, NodeKind, PartialReason,
    RunOptions, Target, TerminalResult,
};
pub use retry::{Attempted, RetryPolicy};
pub use router::{Decision, Router, Terminal};
pub use run_log::RunLogger;
