// tests/common/mod.rs
pub use axum::Router;
pub use serde_json::json;
pub use tokio::task::JoinHandle;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{Request, Response};
use reqwest::Client;
use tokio::sync::Barrier;

use crate::error::{Error, Result};
use crate::oauth2::ClientCredentials;
use crate::transport::{Body, Transport};

pub const TOKEN_PATH: &str = "/oauth2/token";
pub const TOKEN_URL: &str = "http://auth.test/oauth2/token";

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

pub fn build_reqwest_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("reqwest client")
}

pub fn credentials(token_url: &str) -> ClientCredentials {
    ClientCredentials::builder("svc", "s3cr3t", token_url)
        .build()
        .expect("test credentials")
}

/// One scripted answer of the mock token endpoint.
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub body: String,
    pub delay: Option<Duration>,
}

impl CannedResponse {
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

pub fn token_response(token: &str, expires_in: i64) -> CannedResponse {
    CannedResponse {
        status: 200,
        body: json!({"access_token": token, "token_type": "bearer", "expires_in": expires_in}).to_string(),
        delay: None,
    }
}

pub fn token_error_response(status: u16, error: &str) -> CannedResponse {
    CannedResponse {
        status,
        body: json!({"error": error, "error_description": "rejected by test"}).to_string(),
        delay: None,
    }
}

pub fn invalid_token_body() -> String {
    json!({"error_code": "invalid_access_token"}).to_string()
}

/// In-process authorization server and protected resource.
///
/// `TOKEN_PATH` answers with the queued responses, then with token `valid`.
/// Every other path is the resource: `Bearer valid` gets `200 {"ok":true}`,
/// any other token gets `401 {"error_code":"invalid_access_token"}`.
#[derive(Default)]
pub struct MockAuthTransport {
    token_responses: Mutex<VecDeque<CannedResponse>>,
    resource_response: Option<(u16, String)>,
    stale_gate: Option<Arc<Barrier>>,
    fail_valid: bool,
    resource_failures: AtomicUsize,
    token_requests: AtomicUsize,
    resource_requests: AtomicUsize,
    authorizations: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Bytes>>,
}

impl MockAuthTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token_responses(self, responses: Vec<CannedResponse>) -> Self {
        *self.token_responses.lock().unwrap() = responses.into();
        self
    }

    /// Resource answers every request with this status and body.
    pub fn with_resource_response(mut self, status: u16, body: impl Into<String>) -> Self {
        self.resource_response = Some((status, body.into()));
        self
    }

    /// Requests carrying a stale token wait here before being rejected.
    pub fn with_stale_gate(mut self, parties: usize) -> Self {
        self.stale_gate = Some(Arc::new(Barrier::new(parties)));
        self
    }

    /// Requests carrying the valid token fail without a response.
    pub fn failing_valid_requests(mut self) -> Self {
        self.fail_valid = true;
        self
    }

    /// The next `count` resource requests fail without a response.
    pub fn failing_resource_requests(self, count: usize) -> Self {
        self.resource_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub fn resource_requests(&self) -> usize {
        self.resource_requests.load(Ordering::SeqCst)
    }

    pub fn seen_authorizations(&self) -> Vec<String> {
        self.authorizations.lock().unwrap().clone()
    }

    pub fn seen_bodies(&self) -> Vec<Bytes> {
        self.bodies.lock().unwrap().clone()
    }

    async fn token_endpoint(&self) -> Result<Response<Body>> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        let canned = self
            .token_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| token_response("valid", 3600));
        if let Some(delay) = canned.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(json_response(canned.status, canned.body))
    }

    async fn resource(&self, request: Request<Body>) -> Result<Response<Body>> {
        self.resource_requests.fetch_add(1, Ordering::SeqCst);
        let authorization = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        self.authorizations.lock().unwrap().push(authorization.clone());
        let body = request.into_body().collect().await?;
        self.bodies.lock().unwrap().push(body);

        let failing = self
            .resource_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Body(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by test",
            )));
        }

        if let Some((status, body)) = &self.resource_response {
            return Ok(json_response(*status, body.clone()));
        }
        if authorization == "Bearer valid" {
            if self.fail_valid {
                return Err(Error::Body(std::io::Error::other("connection reset by test")));
            }
            return Ok(json_response(200, json!({"ok": true}).to_string()));
        }
        if let Some(gate) = &self.stale_gate {
            gate.wait().await;
        }
        Ok(json_response(401, invalid_token_body()))
    }
}

#[async_trait]
impl Transport for MockAuthTransport {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        if request.uri().path() == TOKEN_PATH {
            self.token_endpoint().await
        } else {
            self.resource(request).await
        }
    }
}

fn json_response(status: u16, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// Stream body made of the given chunks.
pub fn chunked(chunks: &[&'static str]) -> Body {
    let items: Vec<std::io::Result<Bytes>> = chunks
        .iter()
        .copied()
        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
        .collect();
    Body::wrap_stream(futures::stream::iter(items))
}
