use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{Id as TaskId, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::dispatch::GenerationRequest;
use crate::dispatch::executor::RequestExecutor;
use crate::dispatch::transport::Transport;
use crate::error::{CommentaryError, ErrorKind};
use crate::interpret::interpret;
use crate::reasoning::{ReasoningEffort, TextVerbosity};
use crate::response::ExecutionResult;

/// Default admission gate size.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Progress callback: (item label, completed so far, total).
pub type ProgressFn = Arc<dyn Fn(&str, usize, usize) + Send + Sync>;

/// Identifies where a result belongs. Tickers repeat across portfolios, so
/// only the full key (or the position in the batch) is unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub portcode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
}

impl RequestKey {
    pub fn security(portcode: impl Into<String>, ticker: impl Into<String>) -> Self {
        Self {
            portcode: portcode.into(),
            ticker: Some(ticker.into()),
        }
    }

    pub fn portfolio(portcode: impl Into<String>) -> Self {
        Self {
            portcode: portcode.into(),
            ticker: None,
        }
    }

    /// Short name shown in progress updates.
    pub fn label(&self) -> &str {
        self.ticker.as_deref().unwrap_or(&self.portcode)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ticker {
            Some(ticker) => write!(f, "{}|{ticker}", self.portcode),
            None => f.write_str(&self.portcode),
        }
    }
}

/// One unit of work: a key, a fully rendered prompt, and routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub key: RequestKey,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_name: Option<String>,
}

/// Settings shared by every request in one batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency_limit: usize,
    pub web_search: bool,
    pub preferred_domains: Vec<String>,
    pub reasoning_effort: ReasoningEffort,
    pub text_verbosity: TextVerbosity,
    pub require_citations: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY,
            web_search: true,
            preferred_domains: Vec::new(),
            reasoning_effort: ReasoningEffort::Medium,
            text_verbosity: TextVerbosity::default(),
            require_citations: true,
        }
    }
}

impl BatchOptions {
    /// Gate size: at least one, at most what a semaphore can hold.
    pub fn permits(&self) -> usize {
        self.concurrency_limit.clamp(1, Semaphore::MAX_PERMITS)
    }

    fn generation_request(&self, prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            web_search: self.web_search,
            preferred_domains: self.preferred_domains.clone(),
            reasoning_effort: self.reasoning_effort,
            text_verbosity: self.text_verbosity,
        }
    }
}

/// Fans requests out under a concurrency cap and returns results in
/// submission order.
///
/// - One task per request; each must hold a gate permit while its request runs
/// - Item failures are folded into that item's result, never the batch
/// - Cancellation aborts outstanding tasks and fails the whole batch
pub struct BatchOrchestrator<T> {
    executor: Arc<RequestExecutor<T>>,
}

impl<T> Clone for BatchOrchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
        }
    }
}

impl<T: Transport> BatchOrchestrator<T> {
    pub fn new(executor: Arc<RequestExecutor<T>>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &RequestExecutor<T> {
        &self.executor
    }

    pub async fn run(
        &self,
        requests: &[RequestDescriptor],
        options: &BatchOptions,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExecutionResult>, CommentaryError> {
        if cancel.is_cancelled() {
            return Err(CommentaryError::Cancelled);
        }

        let total = requests.len();
        let gate = Arc::new(Semaphore::new(options.permits()));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut set = JoinSet::new();
        let mut task_index: HashMap<TaskId, usize> = HashMap::new();

        for (index, descriptor) in requests.iter().enumerate() {
            let executor = self.executor.clone();
            let gate = gate.clone();
            let completed = completed.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            let label = descriptor.key.label().to_string();
            let request = options.generation_request(&descriptor.prompt);
            let require_citations = options.require_citations;

            let handle = set.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return (index, Err(CommentaryError::Cancelled)),
                    permit = gate.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return (index, Err(CommentaryError::Cancelled)),
                    },
                };

                let result = match executor.execute(&request, &cancel).await {
                    Ok(payload) => interpret(&payload).require_citations(require_citations),
                    Err(e) if e.is_cancelled() => return (index, Err(e)),
                    Err(e) => {
                        tracing::warn!(item = %label, "request failed: {e}");
                        ExecutionResult::from_error(&e)
                    }
                };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = &progress {
                    callback(&label, done, total);
                }
                (index, Ok(result))
            });
            task_index.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<ExecutionResult>> = vec![None; total];

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    set.abort_all();
                    tracing::info!(completed = completed.load(Ordering::SeqCst), total, "batch cancelled");
                    return Err(CommentaryError::Cancelled);
                }
                joined = set.join_next() => match joined {
                    Some(Ok((index, Ok(result)))) => slots[index] = Some(result),
                    Some(Ok((_, Err(e)))) => {
                        set.abort_all();
                        return Err(e);
                    }
                    Some(Err(join_err)) if join_err.is_panic() => {
                        tracing::error!("batch task panicked: {join_err}");
                        if let Some(&index) = task_index.get(&join_err.id()) {
                            slots[index] = Some(ExecutionResult::failure(
                                ErrorKind::Internal,
                                format!("task panicked: {join_err}"),
                            ));
                        }
                    }
                    Some(Err(_)) => {}
                    None => break,
                },
            }
        }

        if cancel.is_cancelled() {
            return Err(CommentaryError::Cancelled);
        }

        Ok(slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    ExecutionResult::failure(ErrorKind::Internal, "task did not complete")
                })
            })
            .collect())
    }
}
