use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use oauth2::basic::{BasicClient, BasicTokenType};
use oauth2::{
    AsyncHttpClient, AuthType, ClientId, ClientSecret, HttpRequest, HttpResponse, RequestTokenError, Scope,
    TokenResponse, TokenUrl,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::helpers::time::get_instant;
use crate::oauth2::credentials::{AuthStyle, ClientCredentials};
use crate::oauth2::token::Token;
use crate::observability::metrics::get_metrics;
use crate::transport::{Body, RequestContext, Transport};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";
const ERROR_BODY_PREVIEW: usize = 512;

/// Performs one client-credentials grant through `base`.
pub async fn fetch_token(
    credentials: &ClientCredentials,
    base: &dyn Transport,
    ctx: &RequestContext,
) -> Result<Token> {
    let metrics = get_metrics().await;
    let start = get_instant();
    metrics.token_fetch_requests.inc();

    let result = ctx.run(exchange(credentials, base, ctx)).await;

    metrics
        .token_fetch_duration
        .observe(start.elapsed().as_secs_f64());
    match &result {
        Ok(token) => debug!(
            token_url = %credentials.token_url,
            expires_at = ?token.expires_at,
            "token fetched"
        ),
        Err(err) => {
            metrics.token_fetch_failures.inc();
            warn!(token_url = %credentials.token_url, "token fetch failed: {err}");
        }
    }
    result
}

async fn exchange(
    credentials: &ClientCredentials,
    base: &dyn Transport,
    ctx: &RequestContext,
) -> Result<Token> {
    let token_url = TokenUrl::new(credentials.token_url.to_string())
        .map_err(|e| Error::Config(format!("invalid token url '{}': {e}", credentials.token_url)))?;
    let auth_type = match credentials.auth_style {
        AuthStyle::Header => AuthType::BasicAuth,
        AuthStyle::Params => AuthType::RequestBody,
    };
    let client = BasicClient::new(ClientId::new(credentials.client_id.clone()))
        .set_client_secret(ClientSecret::new(credentials.client_secret.clone()))
        .set_token_uri(token_url)
        .set_auth_type(auth_type);

    let mut request = client.exchange_client_credentials();
    for scope in &credentials.scopes {
        request = request.add_scope(Scope::new(scope.clone()));
    }
    for (key, value) in &credentials.endpoint_params {
        request = request.add_extra_param(key.as_str(), value.as_str());
    }

    let http_client = GrantClient::new(base, ctx);
    let response = match request.request_async(&http_client).await {
        Ok(response) => response,
        Err(err) => return Err(http_client.grant_error(err)),
    };

    let token_type = match response.token_type() {
        BasicTokenType::Bearer => "Bearer".to_owned(),
        BasicTokenType::Mac => "MAC".to_owned(),
        BasicTokenType::Extension(other) => other.clone(),
    };
    let mut token = Token::new(response.access_token().secret().clone(), token_type);
    if let Some(lifetime) = response.expires_in().filter(|d| !d.is_zero()) {
        token = token.expiring_after(lifetime);
    }
    Ok(token)
}

/// Routes the grant request of the `oauth2` client through the base transport.
///
/// Keeps the last status and body so failures that the client could not
/// decode still report what the endpoint said.
struct GrantClient<'a> {
    base: &'a dyn Transport,
    ctx: &'a RequestContext,
    last: Mutex<Option<(StatusCode, Bytes)>>,
}

impl<'a> GrantClient<'a> {
    fn new(base: &'a dyn Transport, ctx: &'a RequestContext) -> Self {
        Self {
            base,
            ctx,
            last: Mutex::new(None),
        }
    }

    async fn forward(&self, request: HttpRequest) -> Result<HttpResponse> {
        let (parts, body) = request.into_parts();
        let request = self.ctx.clone().attach(Request::from_parts(parts, Body::from(body)));
        let response = self.base.send(request).await?;

        let (mut parts, body) = response.into_parts();
        let body = body.collect().await?;
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some((parts.status, body.clone()));

        let body = if parts.status.is_success() {
            normalize_token_body(&mut parts.headers, &body)?
        } else {
            body.to_vec()
        };
        Ok(Response::from_parts(parts, body))
    }

    fn grant_error(&self, err: RequestTokenError<Error, oauth2::basic::BasicErrorResponse>) -> Error {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner).take();
        match (err, last) {
            (RequestTokenError::Request(err), _) => err,
            (RequestTokenError::ServerResponse(response), last) => Error::TokenRejected {
                status: last.map_or(StatusCode::BAD_REQUEST, |(status, _)| status),
                code: response.error().to_string(),
                description: response.error_description().cloned(),
            },
            (_, Some((status, body))) if !status.is_success() => rejected(status, &body),
            (RequestTokenError::Parse(err, _), _) => Error::TokenResponse(err.to_string()),
            (RequestTokenError::Other(message), _) => Error::TokenResponse(message),
        }
    }
}

impl<'c, 'a> AsyncHttpClient<'c> for GrantClient<'a> {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + Sync + 'c>>;

    fn call(&'c self, request: HttpRequest) -> Self::Future {
        Box::pin(SyncFuture(Mutex::new(self.forward(request).boxed())))
    }
}

/// Makes a `Send` future `Sync`; it is only ever polled through `&mut`.
struct SyncFuture<'a, T>(Mutex<BoxFuture<'a, T>>);

impl<T> Future for SyncFuture<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        self.get_mut()
            .0
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .poll(cx)
    }
}

/// Rewrites a successful token response into the JSON the `oauth2` client expects.
///
/// Form-encoded bodies become JSON objects, a textual or out-of-range
/// `expires_in` becomes a number or `null`, and a missing `token_type` means
/// bearer. Anything that is not an object is left for the client to reject.
fn normalize_token_body(headers: &mut HeaderMap, body: &[u8]) -> Result<Vec<u8>> {
    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(FORM_CONTENT_TYPE) || v.starts_with("text/plain"));

    let mut fields: Map<String, Value> = if is_form {
        serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)
            .map_err(|e| Error::TokenResponse(e.to_string()))?
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect()
    } else {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(fields)) => fields,
            _ => return Ok(body.to_vec()),
        }
    };

    if let Some(expires_in) = fields.get("expires_in") {
        let seconds = match expires_in {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        fields.insert("expires_in".to_owned(), Value::from(seconds));
    }
    fields
        .entry("token_type")
        .or_insert_with(|| Value::String("bearer".to_owned()));

    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    serde_json::to_vec(&Value::Object(fields)).map_err(|e| Error::TokenResponse(e.to_string()))
}

// error body the oauth2 client could not decode
fn rejected(status: StatusCode, body: &Bytes) -> Error {
    let text = String::from_utf8_lossy(body);
    let preview: String = text.chars().take(ERROR_BODY_PREVIEW).collect();
    Error::TokenRejected {
        status,
        code: status.canonical_reason().unwrap_or("unknown").to_owned(),
        description: (!preview.is_empty()).then_some(preview),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReqwestTransport;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    fn credentials(server: &MockServer, style: AuthStyle) -> ClientCredentials {
        ClientCredentials::builder("svc", "s3cr3t", server.url("/oauth2/token"))
            .scopes(["read", "write"])
            .endpoint_param("audience", "api")
            .auth_style(style)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn fetches_token_with_basic_auth() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth2/token")
                    .header("authorization", "Basic c3ZjOnMzY3IzdA==")
                    .header("content-type", FORM_CONTENT_TYPE)
                    .form_urlencoded_tuple("grant_type", "client_credentials")
                    .form_urlencoded_tuple("scope", "read write")
                    .form_urlencoded_tuple("audience", "api");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"access_token":"valid","token_type":"bearer","expires_in":3600}));
            })
            .await;

        let base = ReqwestTransport::default();
        let token = fetch_token(
            &credentials(&server, AuthStyle::Header),
            &base,
            &RequestContext::new(),
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(token.authorization(), "Bearer valid");
        assert!(token.expires_at.is_some());
        assert!(token.is_valid(10));
    }

    #[tokio::test]
    async fn sends_credentials_as_params_when_configured() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth2/token")
                    .form_urlencoded_tuple("client_id", "svc")
                    .form_urlencoded_tuple("client_secret", "s3cr3t");
                then.status(200)
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body("access_token=form-token&token_type=bearer&expires_in=60");
            })
            .await;

        let token = fetch_token(
            &credentials(&server, AuthStyle::Params),
            &ReqwestTransport::default(),
            &RequestContext::new(),
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(token.access_token, "form-token");
        assert!(token.expires_at.is_some());
    }

    #[tokio::test]
    async fn surfaces_oauth2_error_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(401)
                    .header("content-type", "application/json")
                    .json_body(json!({"error":"invalid_client","error_description":"Invalid client credentials"}));
            })
            .await;

        let err = fetch_token(
            &credentials(&server, AuthStyle::Header),
            &ReqwestTransport::default(),
            &RequestContext::new(),
        )
        .await
        .unwrap_err();

        match err {
            Error::TokenRejected {
                status,
                code,
                description,
            } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(code, "invalid_client");
                assert_eq!(description.as_deref(), Some("Invalid client credentials"));
            }
            other => panic!("expected TokenRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_success_without_access_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"token_type":"bearer"}));
            })
            .await;

        let err = fetch_token(
            &credentials(&server, AuthStyle::Header),
            &ReqwestTransport::default(),
            &RequestContext::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::TokenResponse(_)));
    }

    #[test]
    fn non_json_error_body_keeps_preview() {
        let err = rejected(StatusCode::BAD_GATEWAY, &Bytes::from_static(b"upstream down"));
        match err {
            Error::TokenRejected {
                code, description, ..
            } => {
                assert_eq!(code, "Bad Gateway");
                assert_eq!(description.as_deref(), Some("upstream down"));
            }
            other => panic!("expected TokenRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_expires_in_means_no_expiry() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"access_token":"valid","token_type":"bearer","expires_in":100000000000000000}"#);
            })
            .await;

        let token = fetch_token(
            &credentials(&server, AuthStyle::Header),
            &ReqwestTransport::default(),
            &RequestContext::new(),
        )
        .await
        .unwrap();

        assert_eq!(token.access_token, "valid");
        assert!(token.expires_at.is_none());
        assert!(token.is_valid(10));
    }

    #[tokio::test]
    async fn textual_expires_in_and_missing_type_are_accepted() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"access_token":"valid","expires_in":"120"}));
            })
            .await;

        let token = fetch_token(
            &credentials(&server, AuthStyle::Header),
            &ReqwestTransport::default(),
            &RequestContext::new(),
        )
        .await
        .unwrap();

        assert_eq!(token.authorization(), "Bearer valid");
        assert!(token.expires_at.is_some());
    }

    #[tokio::test]
    async fn html_error_page_keeps_status_and_preview() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(502)
                    .header("content-type", "text/html")
                    .body("<html>upstream down</html>");
            })
            .await;

        let err = fetch_token(
            &credentials(&server, AuthStyle::Header),
            &ReqwestTransport::default(),
            &RequestContext::new(),
        )
        .await
        .unwrap_err();

        match err {
            Error::TokenRejected {
                status, description, ..
            } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(description.as_deref(), Some("<html>upstream down</html>"));
            }
            other => panic!("expected TokenRejected, got {other:?}"),
        }
    }

    #[test]
    fn form_body_is_rewritten_as_json() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        let body = normalize_token_body(&mut headers, b"access_token=abc&expires_in=-5").unwrap();

        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["access_token"], "abc");
        assert_eq!(value["token_type"], "bearer");
        assert!(value["expires_in"].is_null());
        assert_eq!(headers[CONTENT_TYPE], JSON_CONTENT_TYPE);
    }
}
