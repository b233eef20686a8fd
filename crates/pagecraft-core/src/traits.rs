use futures::future::BoxFuture;

use crate::error::Result;
use crate::state::StateView;
use crate::types::{GateVerdict, StepOutput};

/// One named unit of work in the pipeline graph.
///
/// A step reads from the view it is given and returns a proposed delta plus
/// a signal. It may be invoked several times with the same view by the retry
/// policy, so it must be safe to re-run. An `Err` is classified with
/// [`crate::PagecraftError::is_retryable`].
pub trait Step: Send + Sync + 'static {
    /// Execute against a read-only snapshot.
    fn execute(&self, view: StateView) -> BoxFuture<'_, Result<StepOutput>>;
}

/// Decides whether the generated artifacts are good enough.
pub trait QualityGate: Send + Sync + 'static {
    /// Review the artifacts visible through `view`.
    fn review(&self, view: StateView) -> BoxFuture<'_, Result<GateVerdict>>;
}
