//! Gathers dispatch outcomes under a single deadline.

use crate::dispatcher::Outcome;
use crate::metrics_defs::RESPONSE_RECEIVED;
use crate::role::Role;
use shared::metrics::Metrics;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcomes received so far, keyed by role. May be incomplete.
#[derive(Debug, Default)]
pub struct CollectedResults {
    outcomes: HashMap<Role, Outcome>,
}

impl CollectedResults {
    /// Records an outcome, returning any earlier outcome for the same role.
    pub fn insert(&mut self, outcome: Outcome) -> Option<Outcome> {
        self.outcomes.insert(outcome.role, outcome)
    }

    pub fn get(&self, role: Role) -> Option<&Outcome> {
        self.outcomes.get(&role)
    }

    pub fn take(&mut self, role: Role) -> Option<Outcome> {
        self.outcomes.remove(&role)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.outcomes.contains_key(&role)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Roles in `expected` that have not reported.
    pub fn missing(&self, expected: &[Role]) -> Vec<Role> {
        expected
            .iter()
            .copied()
            .filter(|role| !self.contains(*role))
            .collect()
    }
}

/// Waits for every expected role to report, or for the deadline, whichever
/// comes first.
///
/// The collector owns its `CollectedResults` outright; dispatch tasks only
/// ever talk to it through the results channel.
pub struct ResponseCollector {
    expected: Vec<Role>,
    timeout: Duration,
    metrics: Metrics,
}

impl ResponseCollector {
    pub fn new(expected: Vec<Role>, timeout: Duration, metrics: Metrics) -> Self {
        Self {
            expected,
            timeout,
            metrics,
        }
    }

    /// Runs the collector on its own task. The returned receiver yields the
    /// results exactly once.
    pub fn spawn(
        self,
        results: mpsc::Receiver<Outcome>,
        cancel: CancellationToken,
    ) -> oneshot::Receiver<CollectedResults> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let collected = self.collect(results, cancel).await;
            let _ = tx.send(collected);
        });
        rx
    }

    /// Collects outcomes until all expected roles reported, the deadline
    /// passes or every sender is gone.
    ///
    /// When the deadline passes `cancel` is fired so that dispatch tasks still
    /// in flight are aborted.
    pub async fn collect(
        self,
        mut results: mpsc::Receiver<Outcome>,
        cancel: CancellationToken,
    ) -> CollectedResults {
        let deadline = tokio::time::sleep_until(Instant::now() + self.timeout);
        tokio::pin!(deadline);

        let mut collected = CollectedResults::default();
        let mut received = 0usize;

        while !collected.missing(&self.expected).is_empty() {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::error!(
                        missing = ?collected.missing(&self.expected),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Response timeout"
                    );
                    cancel.cancel();
                    break;
                }
                outcome = results.recv() => match outcome {
                    Some(outcome) => {
                        received += 1;
                        let role = outcome.role;
                        self.metrics.incr(&RESPONSE_RECEIVED, &[("role", role.as_str())]);
                        if collected.insert(outcome).is_some() {
                            tracing::warn!(role = %role, "Duplicate outcome, keeping the latest");
                        }
                    }
                    None => {
                        tracing::debug!("All dispatchers finished");
                        break;
                    }
                },
            }
        }

        tracing::debug!(received, recorded = collected.len(), "Collection finished");
        collected
    }
}
