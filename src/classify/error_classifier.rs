use bytes::BytesMut;
use futures::StreamExt;
use http::header::CONTENT_LENGTH;
use http::{Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::oauth2::credentials::INVALID_ACCESS_TOKEN;
use crate::transport::Body;

/// Largest 401 body that is read to look for the invalid-token signal.
pub const ERROR_BODY_LIMIT: usize = 64 * 1024;

/// Outcome of inspecting a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    RenewalRequired,
    NoRenewal,
}

/// Error payload of a protected resource.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error_code: String,
}

/// Recognizes the resource server's invalid-access-token signal.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    invalid_token_code: String,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(INVALID_ACCESS_TOKEN)
    }
}

impl ErrorClassifier {
    pub fn new(invalid_token_code: impl Into<String>) -> Self {
        Self {
            invalid_token_code: invalid_token_code.into(),
        }
    }

    /// Inspects `response` and hands it back with its body intact.
    ///
    /// Only a 401 with a non-empty body of at most [`ERROR_BODY_LIMIT`] bytes
    /// is read. A body that does not decode as `{"error_code": ...}` is not a
    /// token problem and yields `NoRenewal`, as does a larger body, which is
    /// handed back as the bytes read so far followed by the unread rest. An
    /// error is returned only when reading the body itself fails.
    pub async fn classify(&self, response: Response<Body>) -> Result<(Response<Body>, Verdict)> {
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok((response, Verdict::NoRenewal));
        }
        match declared_length(&response) {
            Some(0) => return Ok((response, Verdict::NoRenewal)),
            Some(len) if len > ERROR_BODY_LIMIT as u64 => {
                debug!(len, "401 body too large to inspect, passing through");
                return Ok((response, Verdict::NoRenewal));
            }
            _ => {}
        }

        let (parts, body) = response.into_parts();
        if body.is_empty() {
            return Ok((Response::from_parts(parts, body), Verdict::NoRenewal));
        }

        let mut stream = body.into_stream();
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
            if buf.len() > ERROR_BODY_LIMIT {
                debug!("401 body exceeds {ERROR_BODY_LIMIT} bytes, passing through");
                let head = futures::stream::once(futures::future::ready(Ok(buf.freeze())));
                let body = Body::wrap_stream(head.chain(stream));
                return Ok((Response::from_parts(parts, body), Verdict::NoRenewal));
            }
        }
        let bytes = buf.freeze();
        let verdict = match serde_json::from_slice::<ErrorPayload>(&bytes) {
            Ok(payload) if payload.error_code == self.invalid_token_code => Verdict::RenewalRequired,
            Ok(payload) => {
                debug!(error_code = %payload.error_code, "401 is not an invalid token signal");
                Verdict::NoRenewal
            }
            Err(err) => {
                debug!("401 body is not a structured error, passing through: {err}");
                Verdict::NoRenewal
            }
        };
        Ok((Response::from_parts(parts, Body::Full(bytes)), verdict))
    }
}

fn declared_length(response: &Response<Body>) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
