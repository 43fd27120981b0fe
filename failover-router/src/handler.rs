use crate::arbitration::{ArbitrationPolicy, InvalidStatusSet};
use crate::collector::{CollectedResults, ResponseCollector};
use crate::config::Config;
use crate::dispatcher::UpstreamDispatcher;
use crate::duplicator::RequestDuplicator;
use crate::errors::{FailoverError, Result};
use crate::metrics_defs::RESPONSE_USED;
use crate::role::Endpoints;
use crate::transcriber::{HandlerBody, ResponseTranscriber};
use hyper::body::Body;
use hyper::{Request, Response};
use shared::metrics::Metrics;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Duplicates each request to both roles and answers with the arbitrated
/// response.
///
/// Everything the handler needs is passed in at construction.
pub struct FailoverHandler {
    endpoints: Endpoints,
    response_timeout: Duration,
    dispatcher: UpstreamDispatcher,
    policy: ArbitrationPolicy,
    metrics: Metrics,
}

impl FailoverHandler {
    pub fn new(
        endpoints: Endpoints,
        response_timeout: Duration,
        dispatcher: UpstreamDispatcher,
        policy: ArbitrationPolicy,
        metrics: Metrics,
    ) -> Result<Self> {
        if response_timeout.is_zero() {
            return Err(FailoverError::InvalidConfig(
                "response timeout cannot be 0".to_string(),
            ));
        }

        Ok(Self {
            endpoints,
            response_timeout,
            dispatcher,
            policy,
            metrics,
        })
    }

    /// Builds a handler with the status-set policy from `config`.
    pub fn from_config(config: &Config, metrics: Metrics) -> Result<Self> {
        let endpoints = Endpoints::try_from(&config.upstreams)?;
        let invalid_statuses = config
            .arbitration
            .status_codes()
            .map_err(|e| FailoverError::InvalidConfig(e.to_string()))?;

        Self::new(
            endpoints,
            config.timeouts.response_timeout(),
            UpstreamDispatcher::new(&config.timeouts)?,
            ArbitrationPolicy::new(InvalidStatusSet::new(invalid_statuses)),
            metrics,
        )
    }

    pub async fn handle<B>(&self, request: Request<B>) -> Response<HandlerBody>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let started = Instant::now();
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        // Fired by the collector at the deadline, and when this request is done
        let cancel = CancellationToken::new();
        let _abort_pending = cancel.clone().drop_guard();

        // Room for one outcome per role so dispatch never waits on the collector
        let (results_tx, results_rx) = mpsc::channel(self.endpoints.len());
        let roles: Vec<_> = self.endpoints.iter().map(|(role, _)| role).collect();
        let collected = ResponseCollector::new(roles, self.response_timeout, self.metrics.clone())
            .spawn(results_rx, cancel.clone());

        let outbound = tokio::select! {
            outbound = RequestDuplicator::duplicate_all(request, &self.endpoints) => outbound,
            _ = cancel.cancelled() => Vec::new(),
        };
        for (role, request) in outbound {
            self.dispatcher
                .spawn(role, request, results_tx.clone(), cancel.clone());
        }
        drop(results_tx);

        let results = collected.await.unwrap_or_else(|_| {
            tracing::error!("Collector task ended without delivering results");
            CollectedResults::default()
        });

        let selection = self.policy.select(results);
        self.metrics
            .incr(&RESPONSE_USED, &[("role", selection.role.as_str())]);

        tracing::debug!(
            method = %method,
            path = %path,
            role = %selection.role,
            status = selection.result.as_ref().ok().map(|r| r.response.status().as_u16()),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Final response"
        );

        ResponseTranscriber::transcribe(selection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::duplicator::InboundTransport;
    use crate::metrics_defs::RESPONSE_RECEIVED;
    use crate::role::{Role, parse_authority};
    use crate::testutils::{UpstreamBehavior, refused_address, start_tls_upstream, start_upstream};
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::StatusCode;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn test_handler(
        primary: &str,
        secondary: &str,
        timeout: Duration,
        metrics: Metrics,
    ) -> FailoverHandler {
        let endpoints = Endpoints::new(
            parse_authority(Role::Primary, primary).unwrap(),
            parse_authority(Role::Secondary, secondary).unwrap(),
        );
        // The client bound stays wide so only the handler deadline is exercised
        let dispatcher = UpstreamDispatcher::new(&Timeouts {
            response_timeout_ms: TIMEOUT.as_millis() as u64,
            connect_timeout_ms: 1_000,
        })
        .unwrap();

        FailoverHandler::new(
            endpoints,
            timeout,
            dispatcher,
            ArbitrationPolicy::default(),
            metrics,
        )
        .unwrap()
    }

    fn test_request(body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method("POST")
            .uri("/api/v2/device/mac:112233445566/config?names=a,b")
            .header("x-webpa-device-name", "mac:112233445566")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn status_for(primary: UpstreamBehavior, secondary: UpstreamBehavior) -> StatusCode {
        let primary = start_upstream(primary).await;
        let secondary = start_upstream(secondary).await;
        let handler = test_handler(
            &primary.address(),
            &secondary.address(),
            TIMEOUT,
            Metrics::new_noop(),
        );
        handler.handle(test_request("")).await.status()
    }

    #[tokio::test]
    async fn test_status_scenarios() {
        let cases = [
            (404, 200, 200),
            (400, 200, 200),
            (500, 503, 503),
            (200, 404, 200),
            (202, 200, 202),
            (403, 200, 403),
        ];

        for (primary, secondary, expected) in cases {
            let status = status_for(
                UpstreamBehavior::status(primary),
                UpstreamBehavior::status(secondary),
            )
            .await;
            assert_eq!(status.as_u16(), expected, "{primary}/{secondary}");
        }
    }

    #[tokio::test]
    async fn test_primary_transcribed_byte_for_byte() {
        let primary = start_upstream(
            UpstreamBehavior::status(201)
                .with_header("set-cookie", "a=1")
                .with_header("x-primary", "yes")
                .with_header("set-cookie", "b=2")
                .with_body("primary body"),
        )
        .await;
        let secondary =
            start_upstream(UpstreamBehavior::status(200).with_body("secondary body")).await;
        let metrics = Metrics::new_in_memory();
        let handler = test_handler(
            &primary.address(),
            &secondary.address(),
            TIMEOUT,
            metrics.clone(),
        );

        let response = handler.handle(test_request("the payload")).await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-primary"], "yes");
        let cookies: Vec<_> = response.headers().get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"primary body");

        // Both upstreams saw the same request
        for upstream in [&primary, &secondary] {
            let seen = upstream.requests();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].method, "POST");
            assert_eq!(seen[0].uri.path(), "/api/v2/device/mac:112233445566/config");
            assert_eq!(seen[0].uri.query(), Some("names=a,b"));
            assert_eq!(seen[0].headers["x-webpa-device-name"], "mac:112233445566");
            assert_eq!(seen[0].headers["host"], upstream.address().as_str());
            assert_eq!(seen[0].body.as_ref(), b"the payload");
        }

        assert_eq!(metrics.count(&RESPONSE_RECEIVED, &[("role", "primary")]), 1);
        assert_eq!(metrics.count(&RESPONSE_RECEIVED, &[("role", "secondary")]), 1);
        assert_eq!(metrics.count(&RESPONSE_USED, &[("role", "primary")]), 1);
        assert_eq!(metrics.count(&RESPONSE_USED, &[("role", "secondary")]), 0);
    }

    #[tokio::test]
    async fn test_primary_refused_uses_secondary() {
        let primary = refused_address().await;
        let secondary =
            start_upstream(UpstreamBehavior::status(200).with_body("from secondary")).await;
        let metrics = Metrics::new_in_memory();
        let handler = test_handler(&primary, &secondary.address(), TIMEOUT, metrics.clone());

        let response = handler.handle(test_request("")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"from secondary");
        assert_eq!(metrics.count(&RESPONSE_USED, &[("role", "secondary")]), 1);
        // a refused connection still counts as a received outcome
        assert_eq!(metrics.count(&RESPONSE_RECEIVED, &[("role", "primary")]), 1);
    }

    #[tokio::test]
    async fn test_both_refused_is_server_error() {
        let primary = refused_address().await;
        let secondary = refused_address().await;
        let handler = test_handler(&primary, &secondary, TIMEOUT, Metrics::new_noop());

        let response = handler.handle(test_request("")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_slow_primary_bounded_by_deadline() {
        let primary =
            start_upstream(UpstreamBehavior::status(200).with_delay(Duration::from_secs(10))).await;
        let secondary = start_upstream(UpstreamBehavior::status(200).with_body("fast")).await;
        let metrics = Metrics::new_in_memory();
        let timeout = Duration::from_millis(300);
        let handler = test_handler(
            &primary.address(),
            &secondary.address(),
            timeout,
            metrics.clone(),
        );

        let started = Instant::now();
        let response = handler.handle(test_request("")).await;

        assert!(started.elapsed() < timeout + Duration::from_secs(1));
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"fast");
        assert_eq!(metrics.count(&RESPONSE_RECEIVED, &[("role", "primary")]), 0);
        assert_eq!(metrics.count(&RESPONSE_USED, &[("role", "secondary")]), 1);
    }

    #[tokio::test]
    async fn test_both_slow_is_server_error_within_deadline() {
        let slow = UpstreamBehavior::status(200).with_delay(Duration::from_secs(10));
        let primary = start_upstream(slow.clone()).await;
        let secondary = start_upstream(slow).await;
        let timeout = Duration::from_millis(200);
        let handler = test_handler(
            &primary.address(),
            &secondary.address(),
            timeout,
            Metrics::new_noop(),
        );

        let started = Instant::now();
        let response = handler.handle(test_request("")).await;

        assert!(started.elapsed() < timeout + Duration::from_secs(1));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_secure_transport_fails_against_plain_upstreams() {
        // Plain-text upstreams cannot complete a TLS handshake, so both roles
        // fail once the scheme is switched to https
        let primary = start_upstream(UpstreamBehavior::status(200)).await;
        let secondary = start_upstream(UpstreamBehavior::status(200)).await;
        let handler = test_handler(
            &primary.address(),
            &secondary.address(),
            TIMEOUT,
            Metrics::new_noop(),
        );

        let mut request = test_request("");
        request.extensions_mut().insert(InboundTransport::Secure);

        let response = handler.handle(request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_secure_transport_reaches_tls_upstreams() {
        let primary = start_tls_upstream(UpstreamBehavior::status(503)).await;
        let secondary =
            start_tls_upstream(UpstreamBehavior::status(200).with_body("secure secondary")).await;
        let handler = test_handler(
            &primary.address(),
            &secondary.address(),
            TIMEOUT,
            Metrics::new_noop(),
        );

        let mut request = test_request("payload");
        request.extensions_mut().insert(InboundTransport::Secure);

        let response = handler.handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"secure secondary");
        assert_eq!(primary.requests()[0].body.as_ref(), b"payload");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let endpoints = Endpoints::new(
            parse_authority(Role::Primary, "localhost:6001").unwrap(),
            parse_authority(Role::Secondary, "localhost:6000").unwrap(),
        );
        let dispatcher = UpstreamDispatcher::new(&Timeouts::default()).unwrap();

        let result = FailoverHandler::new(
            endpoints,
            Duration::ZERO,
            dispatcher,
            ArbitrationPolicy::default(),
            Metrics::new_noop(),
        );
        assert!(matches!(result, Err(FailoverError::InvalidConfig(_))));
    }
}
