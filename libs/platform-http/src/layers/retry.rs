use crate::config::{ExponentialBackoff, RETRY_ATTEMPT_HEADER, RetryPolicy, RetryTrigger};
use crate::error::{ClassifiedError, ErrorKind};
use crate::request::RequestDescriptor;
use crate::response::ResponseEnvelope;
use http::HeaderValue;
use http::header::HeaderName;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};

/// Where a call stands in the retry state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting,
    RetryScheduled,
    Succeeded,
    Failed,
}

/// One transition of a call, reported to the [`RetryObserver`]
#[derive(Debug, Clone, PartialEq)]
pub struct RetryEvent {
    /// Zero-based index of the attempt that just finished or is about to start
    pub attempt: u32,
    /// Backoff before the next attempt; zero unless `state` is `RetryScheduled`
    pub delay: Duration,
    /// Error kind of the failed attempt, if it failed
    pub kind: Option<ErrorKind>,
    pub state: RetryState,
}

/// Callback notified on every state transition
#[derive(Clone)]
pub struct RetryObserver(Arc<dyn Fn(&RetryEvent) + Send + Sync>);

impl RetryObserver {
    pub fn new(f: impl Fn(&RetryEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    fn notify(&self, event: &RetryEvent) {
        (self.0)(event);
    }
}

impl fmt::Debug for RetryObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryObserver")
    }
}

/// Tower layer that re-runs failed attempts with exponential backoff and jitter
#[derive(Clone, Debug)]
pub struct RetryLayer {
    policy: Arc<RetryPolicy>,
    observer: Option<RetryObserver>,
}

impl RetryLayer {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            observer: None,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Option<RetryObserver>) -> Self {
        self.observer = observer;
        self
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            policy: Arc::clone(&self.policy),
            observer: self.observer.clone(),
        }
    }
}

/// Runs one logical call as a sequence of attempts.
///
/// Each attempt gets a fresh clone of the caller's descriptor. Errors matching
/// the policy's triggers are retried until the attempt ceiling is reached; any
/// other error, and the error of the last attempt, is returned unchanged.
#[derive(Clone, Debug)]
pub struct RetryService<S> {
    inner: S,
    policy: Arc<RetryPolicy>,
    observer: Option<RetryObserver>,
}

impl<S> Service<RequestDescriptor> for RetryService<S>
where
    S: Service<RequestDescriptor, Response = ResponseEnvelope, Error = ClassifiedError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = ResponseEnvelope;
    type Error = ClassifiedError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, descriptor: RequestDescriptor) -> Self::Future {
        // Swap so we consume the instance that was poll_ready'd,
        // leaving a fresh clone for the next poll_ready cycle.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let policy = descriptor
            .policy_override()
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.policy));
        let observer = self.observer.clone();

        Box::pin(async move {
            let ceiling = policy.attempt_ceiling();
            let method = descriptor.method().clone();
            let path = descriptor.path().to_owned();
            let emit = |event: RetryEvent| {
                if let Some(observer) = &observer {
                    observer.notify(&event);
                }
            };

            let mut attempt = 0u32;
            loop {
                let mut request = descriptor.clone();
                if attempt > 0 {
                    request.headers_mut().insert(
                        HeaderName::from_static(RETRY_ATTEMPT_HEADER),
                        HeaderValue::from(attempt),
                    );
                }
                emit(RetryEvent {
                    attempt,
                    delay: Duration::ZERO,
                    kind: None,
                    state: RetryState::Attempting,
                });

                let result = match inner.clone().ready().await {
                    Ok(svc) => svc.call(request).await,
                    Err(e) => Err(e),
                };

                let err = match result {
                    Ok(envelope) => {
                        tracing::trace!(attempt, method = %method, path = %path, "request succeeded");
                        emit(RetryEvent {
                            attempt,
                            delay: Duration::ZERO,
                            kind: None,
                            state: RetryState::Succeeded,
                        });
                        return Ok(envelope);
                    }
                    Err(err) => err,
                };

                let retryable = policy.should_retry(&err);
                if !retryable || attempt + 1 >= ceiling {
                    if retryable {
                        tracing::warn!(
                            attempts = attempt + 1,
                            kind = %err.kind(),
                            status = ?err.http_status(),
                            method = %method,
                            path = %path,
                            error = %err,
                            "retries exhausted"
                        );
                    }
                    emit(RetryEvent {
                        attempt,
                        delay: Duration::ZERO,
                        kind: Some(err.kind()),
                        state: RetryState::Failed,
                    });
                    return Err(err);
                }

                let delay = next_delay(&policy, attempt, &err);
                tracing::debug!(
                    attempt = attempt + 1,
                    max_attempts = ceiling,
                    kind = %err.kind(),
                    trigger = ?RetryTrigger::for_error(&err),
                    status = ?err.http_status(),
                    method = %method,
                    path = %path,
                    delay_ms = delay.as_millis(),
                    "retrying request"
                );
                emit(RetryEvent {
                    attempt,
                    delay,
                    kind: Some(err.kind()),
                    state: RetryState::RetryScheduled,
                });

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        })
    }
}

/// Backoff for `attempt`, or the server's `Retry-After` when the policy honours it
fn next_delay(policy: &RetryPolicy, attempt: u32, err: &ClassifiedError) -> Duration {
    match err.retry_after() {
        Some(hint) if policy.respect_retry_after => hint.min(policy.backoff.max),
        _ => calculate_backoff(&policy.backoff, attempt),
    }
}

/// Deterministic part of the delay for the zero-based `attempt`, capped at `max`
///
/// Safely handles edge cases (NaN, infinity, negative values) to avoid panics.
#[must_use]
pub fn exponential_delay(backoff: &ExponentialBackoff, attempt: u32) -> Duration {
    // Beyond a day is not a meaningful retry delay
    const MAX_BACKOFF_SECS: f64 = 86400.0;

    let attempt = i32::try_from(attempt).unwrap_or(i32::MAX);

    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };
    let max_secs = backoff.max.as_secs_f64().min(MAX_BACKOFF_SECS);

    let secs = backoff.base.as_secs_f64() * multiplier.powi(attempt);
    let clamped = if secs.is_finite() {
        secs.clamp(0.0, max_secs)
    } else {
        max_secs
    };
    Duration::from_secs_f64(clamped)
}

/// `(lower, upper)` bounds of the delay for `attempt`
#[must_use]
pub fn backoff_bounds(backoff: &ExponentialBackoff, attempt: u32) -> (Duration, Duration) {
    let lower = exponential_delay(backoff, attempt);
    let upper = lower.saturating_add(backoff.jitter).min(backoff.max.max(lower));
    (lower, upper)
}

/// Calculate the delay before retrying after the zero-based `attempt`:
/// `min(max, base * multiplier^attempt + U[0, jitter])`
#[must_use]
pub fn calculate_backoff(backoff: &ExponentialBackoff, attempt: u32) -> Duration {
    let (lower, upper) = backoff_bounds(backoff, attempt);
    if upper <= lower {
        return lower;
    }
    let jitter_secs = rand::rng().random_range(0.0..=(upper - lower).as_secs_f64());
    lower + Duration::from_secs_f64(jitter_secs)
}
