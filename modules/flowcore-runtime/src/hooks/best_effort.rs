use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::timeout;
use tracing::{error, warn};

/// Degrade policy for work that must not fail its caller: try everything in
/// one go, and if that fails or times out, retry item by item, dropping the
/// items that still fail.
#[derive(Debug, Clone, Copy)]
pub struct BestEffort {
    pub batch_timeout: Duration,
    pub item_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BestEffortOutcome {
    /// The batch attempt succeeded, no fallback was needed.
    pub batched: bool,
    /// Indexes of items that failed their individual attempt.
    pub failed: Vec<usize>,
}

impl BestEffortOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl BestEffort {
    pub fn new(batch_timeout: Duration, item_timeout: Duration) -> Self {
        Self {
            batch_timeout,
            item_timeout,
        }
    }

    /// `apply_batch` covers all `count` items; `apply_one(i)` covers item `i`.
    pub async fn run<B, BF, O, OF>(
        &self,
        count: usize,
        apply_batch: B,
        apply_one: O,
    ) -> BestEffortOutcome
    where
        B: FnOnce() -> BF,
        BF: Future<Output = Result<()>>,
        O: Fn(usize) -> OF,
        OF: Future<Output = Result<()>>,
    {
        if count == 0 {
            return BestEffortOutcome {
                batched: true,
                failed: vec![],
            };
        }

        match timeout(self.batch_timeout, apply_batch()).await {
            Ok(Ok(())) => {
                return BestEffortOutcome {
                    batched: true,
                    failed: vec![],
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, count, "Batch failed, retrying one at a time");
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.batch_timeout.as_millis() as u64,
                    count, "Batch timed out, retrying one at a time"
                );
            }
        }

        let mut failed = Vec::new();
        for i in 0..count {
            match timeout(self.item_timeout, apply_one(i)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, index = i, "Item failed, dropping");
                    failed.push(i);
                }
                Err(_) => {
                    error!(
                        timeout_ms = self.item_timeout.as_millis() as u64,
                        index = i,
                        "Item timed out, dropping"
                    );
                    failed.push(i);
                }
            }
        }

        BestEffortOutcome {
            batched: false,
            failed,
        }
    }
}
