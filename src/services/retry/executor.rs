//! Retry executor
//!
//! Runs one external operation with a per-attempt deadline, retrying only
//! failures the classifier marks as rate limits or capacity problems.

use super::classifier::{FailureClassifier, TextClassifier};
use super::outcome::{FatalCause, InvokeOutcome, RetryAttempt, RetryState};
use super::policy::RetryPolicy;
use crate::services::operation::ExternalOperation;
use crate::utils::timeout::{with_timeout, TimeoutError};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::Instrument;
use uuid::Uuid;

/// Executes operations under a `RetryPolicy`
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    classifier: Arc<dyn FailureClassifier>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryExecutor {
    /// Executor using the default text classifier
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: Arc::new(TextClassifier::default()),
        }
    }

    /// Replace the failure classifier
    pub fn with_classifier(mut self, classifier: impl FailureClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails fatally, or the attempt
    /// budget is spent on rate limits.
    ///
    /// Timeouts are always fatal and are checked before any output is
    /// classified. No sleep follows the final attempt.
    pub async fn invoke(&self, operation: &dyn ExternalOperation) -> InvokeOutcome {
        let span = tracing::info_span!(
            "invoke",
            invocation_id = %Uuid::new_v4(),
            operation = %operation.describe(),
            max_attempts = self.policy.effective_attempts(),
        );
        self.invoke_inner(operation).instrument(span).await
    }

    async fn invoke_inner(&self, operation: &dyn ExternalOperation) -> InvokeOutcome {
        let max_attempts = self.policy.effective_attempts();
        let mut failures: Vec<RetryAttempt> = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            let result = with_timeout(self.policy.per_attempt_timeout, operation.run()).await;

            let output = match result {
                Ok(output) => output,
                Err(TimeoutError::Timeout(after)) => {
                    tracing::error!(
                        attempt = attempt + 1,
                        timeout_ms = after.as_millis(),
                        state = ?RetryState::FatalFailed,
                        "Operation timed out, not retrying"
                    );
                    return InvokeOutcome::Fatal {
                        cause: FatalCause::TimedOut { after },
                        failures,
                    };
                }
                Err(TimeoutError::Inner(err)) => {
                    tracing::error!(
                        attempt = attempt + 1,
                        error = %err,
                        state = ?RetryState::FatalFailed,
                        "Operation could not be run"
                    );
                    return InvokeOutcome::Fatal {
                        cause: FatalCause::Launch {
                            message: err.to_string(),
                        },
                        failures,
                    };
                }
            };

            if output.is_success() {
                tracing::debug!(attempt = attempt + 1, "Operation succeeded");
                return InvokeOutcome::Succeeded {
                    output: output.stdout,
                    failures,
                };
            }

            let diagnostic = output.diagnostic();
            let classification = self.classifier.classify(diagnostic);

            if !classification.is_retryable() {
                tracing::error!(
                    attempt = attempt + 1,
                    exit_code = output.exit_code,
                    diagnostic = %diagnostic.trim(),
                    state = ?RetryState::FatalFailed,
                    "Operation failed with unclassified error, not retrying"
                );
                return InvokeOutcome::Fatal {
                    cause: FatalCause::Failed {
                        exit_code: output.exit_code,
                        diagnostic: diagnostic.to_string(),
                    },
                    failures,
                };
            }

            if attempt + 1 >= max_attempts {
                failures.push(RetryAttempt {
                    attempt_number: attempt,
                    delay_before_next: None,
                    classification,
                });
                tracing::warn!(
                    attempts = max_attempts,
                    classification = %classification,
                    state = ?RetryState::Exhausted,
                    "Retry budget exhausted"
                );
                return InvokeOutcome::Exhausted {
                    last_error: diagnostic.to_string(),
                    failures,
                };
            }

            let delay = self.policy.jittered_backoff(attempt);
            tracing::warn!(
                attempt = attempt + 1,
                max_attempts,
                classification = %classification,
                delay_ms = delay.as_millis(),
                state = ?RetryState::Retrying,
                "Retryable failure, backing off"
            );
            failures.push(RetryAttempt {
                attempt_number: attempt,
                delay_before_next: Some(delay),
                classification,
            });

            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::operation::{
        CommandOperation, FnOperation, OperationError, OperationOutput,
    };
    use crate::services::retry::classifier::FailureClass;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(4))
            .with_per_attempt_timeout(Duration::from_secs(5))
    }

    fn counting(
        calls: Arc<AtomicU32>,
        respond: impl Fn(u32) -> Result<OperationOutput, OperationError> + Send + Sync + 'static,
    ) -> impl ExternalOperation {
        let respond = Arc::new(respond);
        FnOperation::new("fake-llm", move || {
            let calls = Arc::clone(&calls);
            let respond = Arc::clone(&respond);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                respond(n)
            }
        })
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting(Arc::clone(&calls), |_| Ok(OperationOutput::success("draft")));

        let outcome = RetryExecutor::new(fast_policy(3)).invoke(&op).await;

        assert_eq!(outcome.state(), RetryState::Succeeded);
        assert_eq!(outcome.attempt_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.into_result().unwrap(), "draft");
    }

    #[tokio::test]
    async fn test_success_after_rate_limits() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting(Arc::clone(&calls), |n| {
            if n < 2 {
                Ok(OperationOutput::failure(1, "Error: Rate limit reached"))
            } else {
                Ok(OperationOutput::success("review"))
            }
        });

        let outcome = RetryExecutor::new(fast_policy(5)).invoke(&op).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempt_count(), 3);
        assert_eq!(outcome.sleeps().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting(Arc::clone(&calls), |_| {
            Ok(OperationOutput::failure(1, "HTTP 429 Too Many Requests"))
        });

        let outcome = RetryExecutor::new(fast_policy(3)).invoke(&op).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.state(), RetryState::Exhausted);
        assert_eq!(outcome.attempt_count(), 3);
        // No sleep after the final attempt
        assert_eq!(outcome.sleeps().len(), 2);
        match outcome {
            InvokeOutcome::Exhausted { last_error, .. } => assert!(last_error.contains("429")),
            other => panic!("expected exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fatal_short_circuit() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting(Arc::clone(&calls), |_| {
            Ok(OperationOutput::failure(2, "Error: unknown flag --frobnicate"))
        });

        let outcome = RetryExecutor::new(fast_policy(5)).invoke(&op).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.sleeps().is_empty());
        assert_eq!(
            outcome,
            InvokeOutcome::Fatal {
                cause: FatalCause::Failed {
                    exit_code: 2,
                    diagnostic: "Error: unknown flag --frobnicate".to_string(),
                },
                failures: Vec::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_is_fatal_even_with_429_text() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let op = FnOperation::new("wedged", move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(OperationOutput::failure(1, "429"))
            }
        });

        let policy = fast_policy(3).with_per_attempt_timeout(Duration::from_millis(20));
        let outcome = RetryExecutor::new(policy).invoke(&op).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcome,
            InvokeOutcome::Fatal {
                cause: FatalCause::TimedOut {
                    after: Duration::from_millis(20)
                },
                failures: Vec::new(),
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = format!("echo 429 1>&2; sleep 1; touch '{}'", marker.display());
        let op = CommandOperation::new("sh").args(["-c", script.as_str()]);

        let policy = fast_policy(3).with_per_attempt_timeout(Duration::from_millis(100));
        let outcome = RetryExecutor::new(policy).invoke(&op).await;
        assert_eq!(outcome.state(), RetryState::FatalFailed);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "timed out process kept running");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_background_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("grandchild-finished");
        // The marker is written by a forked subshell, not by the direct child
        let script = format!("(sleep 1; touch '{}') & wait", marker.display());
        let op = CommandOperation::new("sh").args(["-c", script.as_str()]);

        let policy = fast_policy(1).with_per_attempt_timeout(Duration::from_millis(100));
        let outcome = RetryExecutor::new(policy).invoke(&op).await;
        assert!(matches!(
            outcome,
            InvokeOutcome::Fatal {
                cause: FatalCause::TimedOut { .. },
                ..
            }
        ));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "forked helper outlived the attempt deadline");
    }

    #[tokio::test]
    async fn test_launch_error_is_fatal() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting(Arc::clone(&calls), |_| {
            Err(OperationError::Other("binary not found".to_string()))
        });

        let outcome = RetryExecutor::new(fast_policy(3)).invoke(&op).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            outcome,
            InvokeOutcome::Fatal {
                cause: FatalCause::Launch { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_reported_on_stdout() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting(Arc::clone(&calls), |_| {
            Ok(OperationOutput {
                exit_code: 1,
                stdout: "too many requests".to_string(),
                stderr: String::new(),
            })
        });

        let outcome = RetryExecutor::new(fast_policy(2)).invoke(&op).await;
        assert_eq!(outcome.state(), RetryState::Exhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_custom_classifier_capacity_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting(Arc::clone(&calls), |n| {
            if n == 0 {
                Ok(OperationOutput::failure(1, "API overloaded"))
            } else {
                Ok(OperationOutput::success("ok"))
            }
        });

        let executor = RetryExecutor::new(fast_policy(3)).with_classifier(|text: &str| {
            if text.contains("overloaded") {
                FailureClass::Capacity
            } else {
                FailureClass::Fatal
            }
        });
        let outcome = executor.invoke(&op).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.failures()[0].classification, FailureClass::Capacity);
    }

    #[tokio::test]
    async fn test_zero_attempt_budget_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting(Arc::clone(&calls), |_| Ok(OperationOutput::failure(1, "429")));

        let outcome = RetryExecutor::new(fast_policy(0)).invoke(&op).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.state(), RetryState::Exhausted);
        assert!(outcome.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_backoff_delays_recorded_within_jitter_bounds() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting(Arc::clone(&calls), |_| Ok(OperationOutput::failure(1, "429")));

        let policy = RetryPolicy::new()
            .with_max_attempts(4)
            .with_base_delay(Duration::from_millis(2))
            .with_max_delay(Duration::from_millis(8))
            .with_jitter_fraction(0.2);
        let outcome = RetryExecutor::new(policy.clone()).invoke(&op).await;

        for (attempt, delay) in outcome.sleeps().into_iter().enumerate() {
            let base = policy.base_backoff(attempt as u32);
            assert!(delay + Duration::from_nanos(10) >= base.mul_f64(0.8));
            assert!(delay <= base.mul_f64(1.2) + Duration::from_nanos(10));
        }
    }
}
