//! Bounded-concurrency batch executor
//!
//! Runs independent remote calls with at most `limit` in flight. The cap applies
//! per call to [`BatchExecutor::run`]: every batch gets its own semaphore, so two
//! batches running at once (or a batch started from inside another batch's
//! item) never compete for the same permits.
//!
//! Two policies:
//! - [`ErrorPolicy::FailFast`]: the first error cancels items that have not
//!   started yet. Items already in flight finish, and their results are kept so
//!   the caller can roll back what was created.
//! - [`ErrorPolicy::CollectAll`]: every item runs; failures are gathered into
//!   one [`BuildError::Batch`].

use crate::error::{BatchFailure, BuildError};
use amiforge_common::defaults::DEFAULT_BATCH_CONCURRENCY;
use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a batch does when an item fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    FailFast,
    CollectAll,
}

enum ItemResult<T> {
    Done(T),
    Failed(anyhow::Error),
    /// Never started because the batch was cancelled
    Skipped,
}

/// Runs batches of independent work under a per-batch concurrency cap
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    limit: usize,
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_CONCURRENCY)
    }
}

impl BatchExecutor {
    /// Executor allowing `limit` concurrent items (at least one)
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `work` for every item.
    ///
    /// Each item waits for a permit, then checks `cancel` before doing any
    /// remote work. Under `FailFast` the first failure cancels a child of
    /// `cancel`, so the caller's token is never cancelled by the batch.
    pub async fn run<I, T, F, Fut>(
        &self,
        operation: &str,
        items: Vec<I>,
        policy: ErrorPolicy,
        cancel: &CancellationToken,
        work: F,
    ) -> BatchOutcome<T>
    where
        F: Fn(usize, I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let total = items.len();
        let batch_cancel = cancel.child_token();
        let work = &work;
        let limiter = &Semaphore::new(self.limit);

        let mut pending: FuturesUnordered<_> = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let token = batch_cancel.clone();
                async move {
                    let _permit = tokio::select! {
                        permit = limiter.acquire() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return (index, ItemResult::Skipped),
                        },
                        _ = token.cancelled() => return (index, ItemResult::Skipped),
                    };
                    if token.is_cancelled() {
                        return (index, ItemResult::Skipped);
                    }
                    match work(index, item).await {
                        Ok(value) => (index, ItemResult::Done(value)),
                        Err(e) => (index, ItemResult::Failed(e)),
                    }
                }
            })
            .collect();

        let mut outcome = BatchOutcome::new(operation, policy, total);
        while let Some((index, result)) = pending.next().await {
            match result {
                ItemResult::Done(value) => outcome.results[index] = Some(value),
                ItemResult::Failed(error) => {
                    warn!(operation = %operation, index, error = ?error, "Batch item failed");
                    if policy == ErrorPolicy::FailFast && !batch_cancel.is_cancelled() {
                        debug!(operation = %operation, "Cancelling remaining batch items");
                        batch_cancel.cancel();
                    }
                    outcome.failures.push((index, error));
                }
                ItemResult::Skipped => outcome.skipped.push(index),
            }
        }

        info!(
            operation = %operation,
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            skipped = outcome.skipped.len(),
            "Batch complete"
        );
        outcome
    }
}

/// Results of one batch, one slot per submitted item
#[derive(Debug)]
pub struct BatchOutcome<T> {
    operation: String,
    policy: ErrorPolicy,
    results: Vec<Option<T>>,
    /// Failures in completion order
    failures: Vec<(usize, anyhow::Error)>,
    skipped: Vec<usize>,
}

impl<T> BatchOutcome<T> {
    fn new(operation: &str, policy: ErrorPolicy, total: usize) -> Self {
        Self {
            operation: operation.to_string(),
            policy,
            results: std::iter::repeat_with(|| None).take(total).collect(),
            failures: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn skipped(&self) -> usize {
        self.skipped.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    /// Indices of the items that failed
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|(index, _)| *index).collect()
    }

    /// Successful results with their item index, plus the batch error if any.
    ///
    /// Under `FailFast` the error is the first failure observed. Under
    /// `CollectAll` it is a [`BuildError::Batch`] listing every failure. A batch
    /// that skipped items without any failure was cancelled by the caller.
    pub fn into_parts(self) -> (Vec<(usize, T)>, Option<anyhow::Error>) {
        let successes: Vec<(usize, T)> = self
            .results
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| value.map(|v| (index, v)))
            .collect();

        let total = successes.len() + self.failures.len() + self.skipped.len();
        let error = if self.failures.is_empty() {
            (!self.skipped.is_empty()).then(|| anyhow::Error::new(BuildError::Cancelled))
        } else {
            match self.policy {
                ErrorPolicy::FailFast => self.failures.into_iter().next().map(|(index, error)| {
                    error.context(format!("{} failed on item {index}", self.operation))
                }),
                ErrorPolicy::CollectAll => {
                    let mut failures: Vec<BatchFailure> = self
                        .failures
                        .into_iter()
                        .map(|(index, error)| BatchFailure {
                            index,
                            message: format!("{error:#}"),
                        })
                        .collect();
                    failures.sort_by_key(|f| f.index);
                    Some(anyhow::Error::new(BuildError::Batch {
                        operation: self.operation,
                        total,
                        failures,
                    }))
                }
            }
        };
        (successes, error)
    }

    /// All results in item order, or the batch error.
    pub fn into_result(self) -> Result<Vec<T>> {
        let (successes, error) = self.into_parts();
        match error {
            Some(error) => Err(error),
            None => Ok(successes.into_iter().map(|(_, value)| value).collect()),
        }
    }
}
