//! Builds one outbound request per role from an inbound request.

use crate::errors::{FailoverError, Result};
use crate::role::{Endpoints, Role};
use bytes::Bytes;
use http::header::HOST;
use http::request::Parts;
use http::uri::{Authority, PathAndQuery, Scheme, Uri};
use http_body_util::BodyExt;
use hyper::Request;
use hyper::body::Body;
use shared::http::filter_hop_by_hop;

/// An inbound request rewritten for one upstream role.
pub type OutboundRequest = Request<Bytes>;

/// Whether the inbound request arrived over a secure transport.
///
/// TLS termination happens outside this crate. Whoever terminates it tags the
/// request with this extension; untagged requests are treated as plain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InboundTransport {
    #[default]
    Plain,
    Secure,
}

impl InboundTransport {
    pub fn of<B>(request: &Request<B>) -> Self {
        request
            .extensions()
            .get::<InboundTransport>()
            .copied()
            .unwrap_or_default()
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            InboundTransport::Plain => Scheme::HTTP,
            InboundTransport::Secure => Scheme::HTTPS,
        }
    }
}

pub struct RequestDuplicator;

impl RequestDuplicator {
    /// Produces one outbound request per configured role.
    ///
    /// The inbound body is read exactly once and every copy shares the
    /// buffered bytes. A failure is reported against each role individually
    /// so one role's failure never stops the other from being dispatched.
    pub async fn duplicate_all<B>(
        request: Request<B>,
        endpoints: &Endpoints,
    ) -> Vec<(Role, Result<OutboundRequest>)>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let transport = InboundTransport::of(&request);
        let (parts, body) = request.into_parts();

        let body = match Self::buffer_body(body).await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Error reading request body");
                let message = e.to_string();
                return endpoints
                    .iter()
                    .map(|(role, _)| {
                        (role, Err(FailoverError::RequestBodyError(message.clone())))
                    })
                    .collect();
            }
        };

        endpoints
            .iter()
            .map(|(role, target)| {
                let outbound = Self::duplicate(&parts, &body, transport, role, target);
                if let Err(e) = &outbound {
                    tracing::error!(role = %role, error = %e, "Error creating request copy");
                }
                (role, outbound)
            })
            .collect()
    }

    /// Reads the whole body into memory.
    pub async fn buffer_body<B>(body: B) -> Result<Bytes>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        body.collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| FailoverError::RequestBodyError(e.to_string()))
    }

    /// Copies method, path, query and headers onto a request aimed at `target`.
    ///
    /// `Host` and hop-by-hop headers belong to the inbound connection and are
    /// not copied; the client derives them for the outbound one.
    pub fn duplicate(
        parts: &Parts,
        body: &Bytes,
        transport: InboundTransport,
        role: Role,
        target: &Authority,
    ) -> Result<OutboundRequest> {
        let path_and_query = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        let uri = Uri::builder()
            .scheme(transport.scheme())
            .authority(target.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| FailoverError::InvalidTarget(role, e.to_string()))?;

        let mut headers = parts.headers.clone();
        headers.remove(HOST);
        filter_hop_by_hop(&mut headers, parts.version);

        let mut outbound = Request::builder()
            .method(parts.method.clone())
            .uri(uri)
            .body(body.clone())
            .map_err(|e| FailoverError::RequestBuildError(role, e.to_string()))?;
        *outbound.headers_mut() = headers;

        Ok(outbound)
    }
}
