//! Sends outbound requests to their upstream, one task per role.

use crate::config::Timeouts;
use crate::duplicator::OutboundRequest;
use crate::errors::{FailoverError, Result};
use crate::role::Role;
use std::error::Error as StdError;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A response received from an upstream, body still unread.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub response: reqwest::Response,
    /// Time from dispatch until the response headers arrived
    pub elapsed: Duration,
}

/// The result of dispatching one role's request.
#[derive(Debug)]
pub struct Outcome {
    pub role: Role,
    pub result: Result<UpstreamResponse>,
}

impl Outcome {
    pub fn failed(role: Role, error: FailoverError) -> Self {
        Self {
            role,
            result: Err(error),
        }
    }
}

/// Issues upstream calls.
///
/// The client never reuses connections and never follows redirects: the
/// first response an upstream sends is the one that gets arbitrated.
/// Certificates of TLS upstreams are not verified since upstreams sit inside
/// the trusted internal network.
#[derive(Clone)]
pub struct UpstreamDispatcher {
    client: reqwest::Client,
}

impl UpstreamDispatcher {
    pub fn new(timeouts: &Timeouts) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect_timeout())
            .timeout(timeouts.response_timeout())
            .pool_max_idle_per_host(0)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                FailoverError::InvalidConfig(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Dispatches on a new task and delivers exactly one `Outcome` to `results`.
    ///
    /// `results` must have room for one outcome per role so that delivery
    /// never waits on the collector.
    pub fn spawn(
        &self,
        role: Role,
        request: Result<OutboundRequest>,
        results: mpsc::Sender<Outcome>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();

        tokio::spawn(async move {
            let outcome = dispatcher.dispatch(role, request, &cancel).await;
            if results.send(outcome).await.is_err() {
                tracing::debug!(role = %role, "Collector finished before outcome arrived");
            }
        })
    }

    /// Sends one request. Every failure, including cancellation, becomes the
    /// error of the returned outcome.
    pub async fn dispatch(
        &self,
        role: Role,
        request: Result<OutboundRequest>,
        cancel: &CancellationToken,
    ) -> Outcome {
        let request = match request.and_then(|request| {
            reqwest::Request::try_from(request)
                .map_err(|e| FailoverError::RequestBuildError(role, describe(&e)))
        }) {
            Ok(request) => request,
            Err(e) => return Outcome::failed(role, e),
        };

        let started = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(role = %role, "Upstream request cancelled");
                Err(FailoverError::Cancelled(role))
            }
            response = self.client.execute(request) => match response {
                Ok(response) => Ok(UpstreamResponse {
                    response,
                    elapsed: started.elapsed(),
                }),
                Err(e) => {
                    let message = describe(&e);
                    tracing::error!(role = %role, error = %message, "Upstream request failed");
                    Err(FailoverError::UpstreamRequestFailed(role, message))
                }
            },
        };

        Outcome { role, result }
    }
}

/// Renders an error together with its chain of sources.
fn describe(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
