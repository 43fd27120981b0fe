//! Chooses the authoritative outcome among the collected ones.

use crate::collector::CollectedResults;
use crate::dispatcher::{Outcome, UpstreamResponse};
use crate::errors::{FailoverError, Result};
use crate::role::Role;
use http::StatusCode;
use std::collections::HashSet;
use std::sync::Arc;

/// Decides whether the primary's response may be used.
///
/// Implemented for plain closures, so latency or header based checks can be
/// swapped in without touching dispatch or collection.
pub trait ValidityPredicate: Send + Sync {
    fn accepts(&self, response: &UpstreamResponse) -> bool;
}

impl<F> ValidityPredicate for F
where
    F: Fn(&UpstreamResponse) -> bool + Send + Sync,
{
    fn accepts(&self, response: &UpstreamResponse) -> bool {
        self(response)
    }
}

/// Rejects responses whose status is in a configured set.
#[derive(Clone, Debug)]
pub struct InvalidStatusSet {
    statuses: HashSet<StatusCode>,
}

impl InvalidStatusSet {
    pub fn new(statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }

    pub fn contains(&self, status: StatusCode) -> bool {
        self.statuses.contains(&status)
    }
}

/// Primary statuses rejected when nothing else is configured.
pub const DEFAULT_INVALID_STATUSES: [StatusCode; 5] = [
    StatusCode::BAD_REQUEST,
    StatusCode::NOT_FOUND,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

impl Default for InvalidStatusSet {
    fn default() -> Self {
        Self::new(DEFAULT_INVALID_STATUSES)
    }
}

impl ValidityPredicate for InvalidStatusSet {
    fn accepts(&self, response: &UpstreamResponse) -> bool {
        let status = response.response.status();
        tracing::debug!(status = status.as_u16(), "Primary response");
        !self.contains(status)
    }
}

/// The outcome chosen as the final response, tagged with its role.
///
/// `result` is an error when the chosen role failed or never reported.
#[derive(Debug)]
pub struct Selection {
    pub role: Role,
    pub result: Result<UpstreamResponse>,
}

#[derive(Clone)]
pub struct ArbitrationPolicy {
    predicate: Arc<dyn ValidityPredicate>,
}

impl ArbitrationPolicy {
    pub fn new(predicate: impl ValidityPredicate + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Uses the primary when it reported a response the predicate accepts,
    /// otherwise the secondary, whatever state the secondary is in.
    pub fn select(&self, mut results: CollectedResults) -> Selection {
        let primary_accepted = match results.get(Role::Primary) {
            Some(Outcome {
                result: Ok(response),
                ..
            }) => self.predicate.accepts(response),
            Some(Outcome { result: Err(e), .. }) => {
                tracing::debug!(error = %e, "Primary failed");
                false
            }
            None => {
                tracing::debug!("Primary did not report");
                false
            }
        };

        let role = if primary_accepted {
            Role::Primary
        } else {
            tracing::debug!("Primary response was determined to be unacceptable, using secondary");
            Role::Secondary
        };

        let result = match results.take(role) {
            Some(outcome) => outcome.result,
            None => Err(FailoverError::UpstreamTimeout(role)),
        };

        Selection { role, result }
    }
}

impl Default for ArbitrationPolicy {
    fn default() -> Self {
        Self::new(InvalidStatusSet::default())
    }
}
