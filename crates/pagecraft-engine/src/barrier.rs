use std::sync::Arc;

use tracing::{debug, error};

use pagecraft_core::state::{State, StateView};
use pagecraft_core::traits::Step;
use pagecraft_core::types::{ErrorKind, ErrorRecord, StepOutput};

use crate::retry::{Attempted, RetryPolicy};

/// One member of a fan-out.
#[derive(Clone)]
pub struct Branch {
    pub name: String,
    pub step: Arc<dyn Step>,
    pub reads: Arc<[String]>,
    pub retry: RetryPolicy,
}

/// Result of one member, tagged with its name.
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub name: String,
    pub attempted: Attempted,
}

/// Run every branch concurrently against the same snapshot and wait for all
/// of them.
///
/// Each branch gets its own task and its own retry policy. A failing or
/// panicking branch never cancels its siblings. Outcomes come back in branch
/// order, not completion order.
pub async fn run_barrier(branches: &[Branch], snapshot: Arc<State>) -> Vec<BranchOutcome> {
    debug!(members = branches.len(), "Fanning out");

    let handles: Vec<_> = branches
        .iter()
        .map(|branch| {
            let Branch {
                name,
                step,
                reads,
                retry,
            } = branch.clone();
            let view = StateView::new(snapshot.clone(), reads);
            tokio::spawn(async move { retry.run(&name, step.as_ref(), view).await })
        })
        .collect();

    let joined = futures::future::join_all(handles).await;

    branches
        .iter()
        .zip(joined)
        .map(|(branch, result)| {
            let attempted = match result {
                Ok(attempted) => attempted,
                Err(e) => {
                    error!(node = %branch.name, error = %e, "Branch task failed");
                    let message = format!("branch task failed: {}", e);
                    Attempted {
                        output: StepOutput::fatal(message.clone()),
                        attempts: 1,
                        errors: vec![ErrorRecord::new(&branch.name, 1, ErrorKind::Fatal, message)],
                        exhausted: false,
                    }
                }
            };
            BranchOutcome {
                name: branch.name.clone(),
                attempted,
            }
        })
        .collect()
}
