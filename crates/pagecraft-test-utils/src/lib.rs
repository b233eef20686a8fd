//! Scripted steps and gates for exercising the engine without real content
//! generation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use pagecraft_core::error::{PagecraftError, Result};
use pagecraft_core::state::StateView;
use pagecraft_core::traits::{QualityGate, Step};
use pagecraft_core::types::{Delta, Feedback, GateVerdict, StepOutput};

/// Shared invocation counter; clone it before the step is moved into a graph.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Increment and return the 1-based call number.
    fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

type ScriptFn = dyn Fn(&StateView, u32) -> Result<StepOutput> + Send + Sync;

/// A step whose output is computed from the view and the 1-based call number.
pub struct ScriptedStep {
    script: Box<ScriptFn>,
    calls: CallCounter,
}

impl ScriptedStep {
    pub fn from_fn(
        f: impl Fn(&StateView, u32) -> Result<StepOutput> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(f),
            calls: CallCounter::default(),
        }
    }

    /// Always succeed with the same delta.
    pub fn succeed(delta: Delta) -> Self {
        Self::from_fn(move |_, _| Ok(StepOutput::success(delta.clone())))
    }

    /// Write `key = value` on every call.
    pub fn writing(key: &str, value: serde_json::Value) -> Self {
        Self::succeed(Delta::new().with(key, value))
    }

    /// Fail recoverably for the first `failures` calls, then succeed.
    pub fn fail_then_succeed(failures: u32, delta: Delta) -> Self {
        Self::from_fn(move |_, call| {
            if call <= failures {
                Err(PagecraftError::Collaborator(format!("unavailable (call {})", call)))
            } else {
                Ok(StepOutput::success(delta.clone()))
            }
        })
    }

    pub fn always_recoverable(detail: &str) -> Self {
        let detail = detail.to_string();
        Self::from_fn(move |_, _| Ok(StepOutput::recoverable(detail.clone())))
    }

    pub fn fatal(detail: &str) -> Self {
        let detail = detail.to_string();
        Self::from_fn(move |_, _| Ok(StepOutput::fatal(detail.clone())))
    }

    pub fn counter(&self) -> CallCounter {
        self.calls.clone()
    }
}

impl Step for ScriptedStep {
    fn execute(&self, view: StateView) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            let call = self.calls.bump();
            (self.script)(&view, call)
        })
    }
}

/// A gate that plays back a fixed list of verdicts; the last one repeats.
pub struct ScriptedGate {
    verdicts: Vec<GateVerdict>,
    calls: CallCounter,
}

impl ScriptedGate {
    pub fn new(verdicts: Vec<GateVerdict>) -> Self {
        Self {
            verdicts,
            calls: CallCounter::default(),
        }
    }

    pub fn accept() -> Self {
        Self::new(vec![GateVerdict::Accept])
    }

    /// Reject `times` times with feedback on `artifact`, then accept.
    pub fn reject_times(times: usize, artifact: &str) -> Self {
        let mut verdicts: Vec<GateVerdict> = (1..=times)
            .map(|n| GateVerdict::Reject(Feedback::new().with(artifact, format!("rejection {}", n))))
            .collect();
        verdicts.push(GateVerdict::Accept);
        Self::new(verdicts)
    }

    pub fn always_reject(artifact: &str) -> Self {
        Self::new(vec![GateVerdict::Reject(
            Feedback::new().with(artifact, "never good enough"),
        )])
    }

    pub fn counter(&self) -> CallCounter {
        self.calls.clone()
    }
}

impl QualityGate for ScriptedGate {
    fn review(&self, _view: StateView) -> BoxFuture<'_, Result<GateVerdict>> {
        Box::pin(async move {
            let call = self.calls.bump() as usize;
            let idx = (call - 1).min(self.verdicts.len().saturating_sub(1));
            Ok(self
                .verdicts
                .get(idx)
                .cloned()
                .unwrap_or(GateVerdict::Accept))
        })
    }
}

/// A step whose body panics.
pub struct PanickingStep;

impl Step for PanickingStep {
    fn execute(&self, view: StateView) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            if view.loop_count() < u32::MAX {
                panic!("step body exploded");
            }
            Ok(StepOutput::success(Delta::new()))
        })
    }
}

/// A step that sleeps before succeeding with its delta.
pub struct SlowStep {
    delay: Duration,
    delta: Delta,
}

impl SlowStep {
    pub fn new(delay: Duration, delta: Delta) -> Self {
        Self { delay, delta }
    }
}

impl Step for SlowStep {
    fn execute(&self, _view: StateView) -> BoxFuture<'_, Result<StepOutput>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(StepOutput::success(self.delta.clone()))
        })
    }
}
