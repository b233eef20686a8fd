use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, warn};

use pagecraft_core::config::RetryConfig;
use pagecraft_core::state::StateView;
use pagecraft_core::traits::Step;
use pagecraft_core::types::{ErrorKind, ErrorRecord, Signal, StepOutput};

/// Bounded-attempt wrapper around one step invocation.
///
/// Recoverable failures are retried with capped exponential backoff. Once
/// `max_attempts` recoverable failures have been seen the result is
/// converted to `FatalFailure`. Fatal failures, body errors that are not
/// retryable, and panics are never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: bool,
}

/// Everything one retry-policy invocation produced.
#[derive(Debug, Clone)]
pub struct Attempted {
    /// Output of the final attempt (after any escalation).
    pub output: StepOutput,
    /// Number of times the step body was invoked.
    pub attempts: u32,
    /// One record per failed attempt, in attempt order.
    pub errors: Vec<ErrorRecord>,
    /// Whether the attempt budget ran out.
    pub exhausted: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// A policy with `max_attempts` and no delay between attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_backoff_ms),
            jitter: config.jitter,
        }
    }

    pub fn with_backoff(mut self, base: Duration, multiplier: f64, max: Duration) -> Self {
        self.base_delay = base;
        self.multiplier = multiplier;
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Reject parameter sets that cannot make progress.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if self.max_delay < self.base_delay {
            return Err("max backoff is smaller than the initial backoff".into());
        }
        Ok(())
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.base_delay.as_millis() as f64 * exp).min(self.max_delay.as_millis() as f64);
        let ms = if self.jitter {
            // Add jitter: 0.8x to 1.2x
            let jitter = 0.8 + rand::random::<f64>() * 0.4;
            (ms * jitter).min(self.max_delay.as_millis() as f64)
        } else {
            ms
        };
        Duration::from_millis(ms as u64)
    }

    /// Invoke `step` until it stops failing recoverably or the budget runs out.
    ///
    /// The backoff is an async sleep, so other tasks on the runtime keep
    /// making progress while a step waits.
    pub async fn run(&self, node: &str, step: &dyn Step, view: StateView) -> Attempted {
        let mut errors = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            // `execute` itself runs inside the guard so a panic while the
            // future is being built is contained too.
            let output = match AssertUnwindSafe(async { step.execute(view.clone()).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(output)) => output,
                Ok(Err(e)) if e.is_retryable() => StepOutput::recoverable(e.to_string()),
                Ok(Err(e)) => StepOutput::fatal(e.to_string()),
                Err(panic) => {
                    StepOutput::fatal(format!("step panicked: {}", panic_message(panic.as_ref())))
                }
            };

            match output.signal {
                Signal::Success | Signal::Reject => {
                    return Attempted {
                        output,
                        attempts: attempt,
                        errors,
                        exhausted: false,
                    };
                }
                Signal::FatalFailure => {
                    let detail = output.detail.clone().unwrap_or_else(|| "fatal failure".into());
                    error!(node, attempt, error = %detail, "Step failed fatally");
                    errors.push(ErrorRecord::new(node, attempt, ErrorKind::Fatal, detail));
                    return Attempted {
                        output,
                        attempts: attempt,
                        errors,
                        exhausted: false,
                    };
                }
                Signal::RecoverableFailure => {
                    let detail = output
                        .detail
                        .clone()
                        .unwrap_or_else(|| "recoverable failure".into());
                    errors.push(ErrorRecord::new(
                        node,
                        attempt,
                        ErrorKind::Recoverable,
                        detail.clone(),
                    ));

                    if attempt >= self.max_attempts {
                        error!(
                            node,
                            attempts = attempt,
                            error = %detail,
                            "Retries exhausted, escalating to fatal"
                        );
                        return Attempted {
                            output: StepOutput::degraded(
                                output.delta,
                                format!("retries exhausted after {} attempts: {}", attempt, detail),
                            ),
                            attempts: attempt,
                            errors,
                            exhausted: true,
                        };
                    }

                    let backoff = self.backoff(attempt);
                    warn!(
                        node,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %detail,
                        "Retrying step"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use pagecraft_core::state::State;
    use pagecraft_core::types::Delta;
    use pagecraft_test_utils::{PanickingStep, ScriptedStep};
    use serde_json::json;

    fn view() -> StateView {
        StateView::new(Arc::new(State::new(json!({}), 0)), Arc::from(Vec::<String>::new()))
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_backoff(
            Duration::from_millis(1),
            2.0,
            Duration::from_millis(4),
        )
    }

    #[tokio::test]
    async fn succeeds_after_two_recoverable_failures() {
        let step = ScriptedStep::fail_then_succeed(2, Delta::new().with("k", json!(1)));
        let calls = step.counter();
        let result = fast(3).run("flaky", &step, view()).await;

        assert_eq!(result.output.signal, Signal::Success);
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.get(), 3);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| e.kind == ErrorKind::Recoverable));
        assert_eq!(result.errors[0].attempt, 1);
        assert_eq!(result.errors[1].attempt, 2);
        assert!(!result.exhausted);
    }

    #[tokio::test]
    async fn exhaustion_escalates_to_fatal() {
        let step = ScriptedStep::always_recoverable("still busy");
        let calls = step.counter();
        let result = fast(4).run("busy", &step, view()).await;

        assert_eq!(result.output.signal, Signal::FatalFailure);
        assert!(result.exhausted);
        assert_eq!(result.attempts, 4);
        assert_eq!(calls.get(), 4);
        assert_eq!(result.errors.len(), 4);
    }

    #[tokio::test]
    async fn deterministic_step_yields_same_delta_each_attempt() {
        let step = ScriptedStep::from_fn(|_, call| {
            if call < 3 {
                Ok(StepOutput {
                    delta: Delta::new().with("k", json!("same")),
                    ..StepOutput::recoverable("validation failed")
                })
            } else {
                Ok(StepOutput::success(Delta::new().with("k", json!("same"))))
            }
        });
        let result = fast(3).run("det", &step, view()).await;
        assert_eq!(result.output.delta, Delta::new().with("k", json!("same")));
    }

    #[tokio::test]
    async fn fatal_is_not_retried() {
        let step = ScriptedStep::fatal("bad input");
        let calls = step.counter();
        let result = fast(5).run("parser", &step, view()).await;

        assert_eq!(result.output.signal, Signal::FatalFailure);
        assert_eq!(calls.get(), 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn non_retryable_error_is_fatal_immediately() {
        let step = ScriptedStep::from_fn(|_, _| {
            Err(pagecraft_core::PagecraftError::InvalidInput("no name".into()))
        });
        let calls = step.counter();
        let result = fast(3).run("parser", &step, view()).await;
        assert_eq!(result.output.signal, Signal::FatalFailure);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn panic_is_contained_as_fatal() {
        let result = fast(3).run("boom", &PanickingStep, view()).await;
        assert_eq!(result.output.signal, Signal::FatalFailure);
        assert_eq!(result.attempts, 1);
        assert!(result.errors[0].message.contains("step body exploded"));
    }

    struct EagerPanicStep;

    impl Step for EagerPanicStep {
        fn execute(&self, view: StateView) -> BoxFuture<'_, pagecraft_core::Result<StepOutput>> {
            let name = view.input()["name"].as_str().expect("name present").to_string();
            Box::pin(async move { Ok(StepOutput::success(Delta::new().with("name", json!(name)))) })
        }
    }

    #[tokio::test]
    async fn panic_before_future_is_built_is_contained() {
        let result = fast(3).run("eager", &EagerPanicStep, view()).await;
        assert_eq!(result.output.signal, Signal::FatalFailure);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, ErrorKind::Fatal);
        assert!(result.errors[0].message.contains("name present"));
    }

    #[tokio::test]
    async fn exhaustion_keeps_the_last_attempt_delta() {
        let step = ScriptedStep::from_fn(|_, call| {
            Ok(StepOutput {
                delta: Delta::new().with("draft", json!(call)),
                ..StepOutput::recoverable("validation failed")
            })
        });
        let result = fast(2).run("drafts", &step, view()).await;
        assert_eq!(result.output.signal, Signal::FatalFailure);
        assert!(result.exhausted);
        assert_eq!(result.output.delta, Delta::new().with("draft", json!(2)));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(5).with_backoff(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(350),
        );
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(10), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_cap() {
        let policy = RetryPolicy::new(3)
            .with_backoff(Duration::from_millis(100), 2.0, Duration::from_millis(150))
            .with_jitter(true);
        for attempt in 1..=5 {
            let d = policy.backoff(attempt);
            assert!(d <= Duration::from_millis(150));
            assert!(d >= Duration::from_millis(79));
        }
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        assert!(RetryPolicy::new(0).validate().is_err());
        assert!(RetryPolicy::new(1).validate().is_ok());
        let bad = RetryPolicy::new(2).with_backoff(
            Duration::from_millis(1),
            0.5,
            Duration::from_millis(2),
        );
        assert!(bad.validate().is_err());
    }
}
