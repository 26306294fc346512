//! Load-retry controller.
//!
//! Wraps an adapter's `load_ad` with the crate's retry policy: a bounded
//! number of attempts on [`LoadError::FailedToLoad`], unconditional
//! reattempts on [`LoadError::Expired`] (expiry is routine provider churn,
//! not a failure), and strictly sequential attempts. Concurrent callers
//! for the same adapter join the single in-flight cycle and all observe
//! the same outcome.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::adapter::{AdUnitAdapter, AdUnitTag, LoadError};

/// Default number of load attempts per cycle before failure is surfaced.
pub const DEFAULT_LOAD_RETRY_COUNT: u32 = 3;

/// Retry policy applied to every load cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per cycle on `FailedToLoad`. Normalized to at
    /// least 1. Expired attempts do not consume this budget.
    pub load_retry_count: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            load_retry_count: DEFAULT_LOAD_RETRY_COUNT,
        }
    }
}

impl RetryPolicy {
    /// Overrides the attempt budget.
    pub fn with_load_retry_count(mut self, count: u32) -> Self {
        self.load_retry_count = count.max(1);
        self
    }
}

/// Outcome of one load cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadResult {
    /// An ad is loaded; the adapter's readiness is (or is about to
    /// become) `true`.
    Loaded(AdUnitTag),
    /// Every attempt in the budget failed. Readiness stays `false` and no
    /// further attempts happen until a new `load` call starts a cycle.
    RetriesExhausted {
        tag: AdUnitTag,
        last_error: LoadError,
    },
}

impl LoadResult {
    /// Returns true if the cycle ended with a loaded ad.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// The tag of the adapter the cycle ran for.
    pub fn tag(&self) -> &AdUnitTag {
        match self {
            Self::Loaded(tag) => tag,
            Self::RetriesExhausted { tag, .. } => tag,
        }
    }
}

enum CycleEntry {
    /// A cycle is already running; wait for its outcome.
    Join(watch::Receiver<Option<LoadResult>>),
    /// This caller runs the cycle and publishes the outcome.
    Run(watch::Sender<Option<LoadResult>>),
}

/// Runs load cycles and coalesces concurrent callers per adapter.
pub struct LoadController {
    policy: RetryPolicy,
    /// In-flight cycles keyed by adapter tag.
    cycles: Mutex<HashMap<AdUnitTag, watch::Receiver<Option<LoadResult>>>>,
}

impl LoadController {
    /// Creates a controller with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cycles: Mutex::new(HashMap::new()),
        }
    }

    /// The controller's policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Loads an ad through the adapter, applying the retry policy.
    ///
    /// If a cycle is already running for this adapter, the call joins it
    /// instead of starting another: attempts never overlap and every
    /// caller receives the same [`LoadResult`].
    pub async fn load(&self, adapter: Arc<dyn AdUnitAdapter>) -> LoadResult {
        let tag = adapter.tag().clone();
        loop {
            let entry = {
                let mut cycles = self.cycles.lock().await;
                match cycles.get(&tag) {
                    Some(rx) if rx.borrow().is_none() && rx.has_changed().is_ok() => {
                        CycleEntry::Join(rx.clone())
                    }
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        cycles.insert(tag.clone(), rx);
                        CycleEntry::Run(tx)
                    }
                }
            };

            match entry {
                CycleEntry::Join(mut rx) => {
                    debug!(tag = %tag, "joining in-flight load cycle");
                    let joined = loop {
                        if let Some(result) = rx.borrow().clone() {
                            break Some(result);
                        }
                        if rx.changed().await.is_err() {
                            break None;
                        }
                    };
                    match joined {
                        Some(result) => return result,
                        None => {
                            // The running caller was dropped without an
                            // outcome; clear the stale entry and start over.
                            let mut cycles = self.cycles.lock().await;
                            let stale = cycles
                                .get(&tag)
                                .is_some_and(|rx| rx.borrow().is_none() && rx.has_changed().is_err());
                            if stale {
                                cycles.remove(&tag);
                            }
                        }
                    }
                }
                CycleEntry::Run(outcome_tx) => {
                    let result = self.run_cycle(adapter.as_ref(), &tag).await;
                    self.cycles.lock().await.remove(&tag);
                    let _ = outcome_tx.send(Some(result.clone()));
                    return result;
                }
            }
        }
    }

    /// Runs one cycle: sequential attempts until loaded or the budget is
    /// spent.
    async fn run_cycle(&self, adapter: &dyn AdUnitAdapter, tag: &AdUnitTag) -> LoadResult {
        let budget = self.policy.load_retry_count.max(1);
        let mut failed_attempts = 0u32;
        loop {
            match adapter.load_ad().await {
                Ok(loaded) => {
                    debug!(tag = %tag, failed_attempts, "load cycle completed");
                    return LoadResult::Loaded(loaded);
                }
                Err(LoadError::Expired) => {
                    debug!(tag = %tag, "loaded ad expired, starting a fresh attempt");
                }
                Err(LoadError::FailedToLoad) => {
                    failed_attempts += 1;
                    if failed_attempts >= budget {
                        warn!(tag = %tag, attempts = failed_attempts, "load retries exhausted");
                        return LoadResult::RetriesExhausted {
                            tag: tag.clone(),
                            last_error: LoadError::FailedToLoad,
                        };
                    }
                    debug!(
                        tag = %tag,
                        attempt = failed_attempts,
                        budget,
                        "load failed, retrying"
                    );
                }
            }
        }
    }
}
