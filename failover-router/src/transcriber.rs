//! Writes the selected outcome back to the caller.

use crate::arbitration::Selection;
use crate::errors::FailoverError;
use bytes::Bytes;
use http::HeaderMap;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};
use shared::http::{filter_hop_by_hop, make_text_response};

pub type HandlerBody = BoxBody<Bytes, FailoverError>;

pub struct ResponseTranscriber;

impl ResponseTranscriber {
    /// Copies status, headers and the fully read body of the selection.
    ///
    /// A selection without a usable response, or whose body cannot be read,
    /// becomes a 500 carrying the error text.
    pub async fn transcribe(selection: Selection) -> Response<HandlerBody> {
        let upstream = match selection.result {
            Ok(upstream) => upstream.response,
            Err(e) => {
                tracing::error!(role = %selection.role, error = %e, "No usable response");
                return server_error(&e);
            }
        };

        let status = upstream.status();
        let version = upstream.version();
        let mut headers = HeaderMap::with_capacity(upstream.headers().len());
        copy_headers(upstream.headers(), &mut headers);
        filter_hop_by_hop(&mut headers, version);

        // Consumes the upstream response, releasing its connection either way
        let body = match upstream.bytes().await {
            Ok(body) => body,
            Err(e) => {
                let e = FailoverError::ResponseBodyError(e.to_string());
                tracing::error!(role = %selection.role, error = %e, "Error reading response body");
                return server_error(&e);
            }
        };

        let mut response = Response::new(Full::new(body).map_err(|e| match e {}).boxed());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Copies every header value in order. The first value of a name replaces
/// whatever `dst` held, later values are appended.
pub fn copy_headers(src: &HeaderMap, dst: &mut HeaderMap) {
    for name in src.keys() {
        for (i, value) in src.get_all(name).iter().enumerate() {
            if i == 0 {
                dst.insert(name.clone(), value.clone());
            } else {
                dst.append(name.clone(), value.clone());
            }
        }
    }
}

fn server_error(error: &FailoverError) -> Response<HandlerBody> {
    make_text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{error}\n"))
}
