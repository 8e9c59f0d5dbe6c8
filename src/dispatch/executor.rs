use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::config::RateLimitConfig;
use crate::dispatch::GenerationRequest;
use crate::dispatch::responses::{JobStatus, ResponsesApi};
use crate::dispatch::transport::{Transport, TransportError, WireResponse};
use crate::error::CommentaryError;

/// Runs one generation request end to end: submit with retries, then poll
/// until the job is terminal. Returns the raw terminal payload.
pub struct RequestExecutor<T> {
    transport: T,
    api: ResponsesApi,
    backoff: Backoff,
    max_attempts: u32,
    poll_interval: Duration,
    max_poll_failures: u32,
}

/// Sleep unless cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), CommentaryError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CommentaryError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), CommentaryError> {
    if cancel.is_cancelled() {
        Err(CommentaryError::Cancelled)
    } else {
        Ok(())
    }
}

/// `Retry-After` in seconds, capped at `ceiling`. HTTP-date values are
/// ignored (caller falls back to backoff).
fn parse_retry_after(value: Option<&str>, ceiling: Duration) -> Option<Duration> {
    let secs: f64 = value?.trim().parse().ok()?;
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    Some(
        Duration::try_from_secs_f64(secs)
            .unwrap_or(ceiling)
            .min(ceiling),
    )
}

impl<T: Transport> RequestExecutor<T> {
    pub fn new(transport: T, api: ResponsesApi, config: &RateLimitConfig) -> Self {
        Self {
            transport,
            api,
            backoff: Backoff::from_config(config),
            max_attempts: config.max_attempts.max(1),
            poll_interval: config.poll_interval,
            max_poll_failures: config.max_poll_failures.max(1),
        }
    }

    pub fn api(&self) -> &ResponsesApi {
        &self.api
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn execute(
        &self,
        req: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, CommentaryError> {
        ensure_not_cancelled(cancel)?;

        let effort = self.api.effective_effort(req.reasoning_effort);
        let timeout = effort.request_timeout();
        let start = Instant::now();

        let mut attempt: u32 = 0;

        loop {
            ensure_not_cancelled(cancel)?;

            let wire = self.api.build_submit_request(req, timeout);
            let (err, wait) = match self.transport.send(wire).await {
                Err(TransportError::Timeout) => {
                    tracing::warn!(
                        model = self.api.model(),
                        timeout_s = timeout.as_secs(),
                        "request timed out; not retrying, the job may still be processing"
                    );
                    return Err(CommentaryError::Timeout(start.elapsed().as_millis() as u64));
                }
                Err(TransportError::Network(msg)) => {
                    (CommentaryError::Network(msg), self.backoff.delay(attempt))
                }
                Err(TransportError::TooLarge(size)) => {
                    return Err(CommentaryError::SchemaParse(
                        TransportError::too_large_message(size),
                    ));
                }
                Ok(resp) if resp.status == 429 => {
                    let wait = parse_retry_after(resp.retry_after.as_deref(), self.backoff.max())
                        .unwrap_or_else(|| self.backoff.delay(attempt));
                    (
                        CommentaryError::RateLimited {
                            attempts: attempt + 1,
                        },
                        wait,
                    )
                }
                Ok(resp) if !resp.is_success() => (
                    CommentaryError::upstream(resp.status, &resp.body),
                    self.backoff.delay(attempt),
                ),
                Ok(resp) => return self.finish(resp, timeout, cancel).await,
            };

            attempt += 1;
            if !err.is_retryable() || attempt >= self.max_attempts {
                tracing::warn!(attempts = attempt, "giving up: {err}");
                return Err(err);
            }
            tracing::warn!(
                attempt = attempt,
                wait_ms = wait.as_millis() as u64,
                "retrying: {err}"
            );
            sleep_or_cancel(wait, cancel).await?;
        }
    }

    /// Parse a successful submit response, polling if the job is still running.
    async fn finish(
        &self,
        response: WireResponse,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, CommentaryError> {
        let payload = self.api.parse_body(&response.body)?;
        match ResponsesApi::job_status(&payload) {
            JobStatus::Terminal => Ok(payload),
            JobStatus::Pending { id } => {
                tracing::info!(model = self.api.model(), job_id = %id, "job queued, polling");
                self.poll(&id, max_wait, cancel).await
            }
        }
    }

    /// Poll the status endpoint every `poll_interval` until terminal, cancelled
    /// or `max_wait` elapsed. Transient failures are tolerated up to
    /// `max_poll_failures` in a row; the job is never re-submitted.
    pub async fn poll(
        &self,
        job_id: &str,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, CommentaryError> {
        let start = Instant::now();
        let mut polls: u32 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            sleep_or_cancel(self.poll_interval, cancel).await?;
            ensure_not_cancelled(cancel)?;

            let elapsed = start.elapsed();
            if elapsed > max_wait {
                tracing::warn!(job_id = job_id, polls = polls, "polling gave up");
                return Err(CommentaryError::Timeout(elapsed.as_millis() as u64));
            }

            polls += 1;
            let failure = match self.transport.send(self.api.build_poll_request(job_id)).await {
                Ok(resp) if resp.is_success() => {
                    consecutive_failures = 0;
                    let payload = self.api.parse_body(&resp.body)?;
                    match ResponsesApi::job_status(&payload) {
                        JobStatus::Terminal => {
                            tracing::info!(
                                job_id = job_id,
                                polls = polls,
                                elapsed_ms = start.elapsed().as_millis() as u64,
                                "job finished"
                            );
                            return Ok(payload);
                        }
                        JobStatus::Pending { .. } => {
                            tracing::debug!(job_id = job_id, polls = polls, "job still running");
                            continue;
                        }
                    }
                }
                Ok(resp) if resp.status == 429 || resp.status >= 500 => {
                    if resp.status == 429 {
                        CommentaryError::RateLimited {
                            attempts: consecutive_failures + 1,
                        }
                    } else {
                        CommentaryError::upstream(resp.status, &resp.body)
                    }
                }
                // Other 4xx (auth, unknown job) will not fix themselves.
                Ok(resp) => return Err(CommentaryError::upstream(resp.status, &resp.body)),
                Err(TransportError::Timeout) => {
                    CommentaryError::Timeout(start.elapsed().as_millis() as u64)
                }
                Err(TransportError::Network(msg)) => CommentaryError::Network(msg),
                Err(TransportError::TooLarge(size)) => {
                    return Err(CommentaryError::SchemaParse(
                        TransportError::too_large_message(size),
                    ));
                }
            };

            consecutive_failures += 1;
            tracing::warn!(
                job_id = job_id,
                failures = consecutive_failures,
                "poll failed: {failure}"
            );
            if consecutive_failures >= self.max_poll_failures {
                return Err(failure);
            }
        }
    }
}
