use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use pagecraft_core::error::Result;
use pagecraft_core::state::StateView;
use pagecraft_core::traits::{QualityGate, Step};
use pagecraft_core::types::{Delta, GateVerdict, StepOutput};

/// Runs a [`QualityGate`] through the ordinary step machinery.
///
/// `Accept` becomes `Success` with an empty delta, `Reject` becomes the
/// `Reject` signal with the critique attached as feedback. Errors from the
/// gate body pass through unchanged so the retry policy can classify them.
pub struct GateAdapter {
    gate: Arc<dyn QualityGate>,
}

impl GateAdapter {
    pub fn new(gate: Arc<dyn QualityGate>) -> Self {
        Self { gate }
    }
}

impl Step for GateAdapter {
    fn execute(&self, view: StateView) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            match self.gate.review(view).await? {
                GateVerdict::Accept => Ok(StepOutput::success(Delta::new())),
                GateVerdict::Reject(feedback) => {
                    debug!(critiques = feedback.critiques.len(), "Gate rejected artifacts");
                    Ok(StepOutput::reject(feedback))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagecraft_core::state::State;
    use pagecraft_core::types::Signal;
    use pagecraft_test_utils::ScriptedGate;
    use serde_json::json;

    fn view() -> StateView {
        StateView::new(Arc::new(State::new(json!({}), 3)), Arc::from(Vec::<String>::new()))
    }

    #[tokio::test]
    async fn accept_maps_to_success() {
        let adapter = GateAdapter::new(Arc::new(ScriptedGate::accept()));
        let output = adapter.execute(view()).await.unwrap();
        assert_eq!(output.signal, Signal::Success);
        assert!(output.delta.is_empty());
        assert!(output.feedback.is_none());
    }

    #[tokio::test]
    async fn reject_carries_feedback() {
        let adapter = GateAdapter::new(Arc::new(ScriptedGate::always_reject("faq_page")));
        let output = adapter.execute(view()).await.unwrap();
        assert_eq!(output.signal, Signal::Reject);
        let feedback = output.feedback.unwrap();
        assert!(feedback.targets("faq_page"));
        assert_eq!(output.detail.as_deref(), Some("faq_page: never good enough"));
    }
}
