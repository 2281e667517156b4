use std::sync::Arc;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::{HeaderValue, Request, Response};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::oauth2::credentials::ClientCredentials;
use crate::oauth2::token::Token;
use crate::oauth2::token_source::fetch_token;
use crate::transport::{Body, RequestContext, Transport};

/// Transport that stamps a client-credentials bearer token on every request.
///
/// The token is fetched on first use and reused until it expires. One
/// instance is one generation of the authenticator's inner transport; it is
/// never reset, a renewal builds a new one.
pub struct BearerTransport {
    generation: u64,
    credentials: Arc<ClientCredentials>,
    base: Arc<dyn Transport>,
    token: Mutex<Option<Token>>,
}

impl BearerTransport {
    pub fn new(generation: u64, credentials: Arc<ClientCredentials>, base: Arc<dyn Transport>) -> Self {
        Self {
            generation,
            credentials,
            base,
            token: Mutex::new(None),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cached token if still valid, otherwise a freshly fetched one.
    ///
    /// The cache lock is held across the fetch so concurrent first uses of
    /// one generation reach the token endpoint once.
    pub async fn token(&self, ctx: &RequestContext) -> Result<Token> {
        let mut cached = ctx.run(async { Ok::<_, Error>(self.token.lock().await) }).await?;
        if let Some(token) = cached.as_ref() {
            if token.is_valid(self.credentials.safety_margin_seconds) {
                return Ok(token.clone());
            }
            debug!(generation = self.generation, "cached token expired");
        }
        let token = fetch_token(&self.credentials, self.base.as_ref(), ctx).await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl Transport for BearerTransport {
    async fn send(&self, mut request: Request<Body>) -> Result<Response<Body>> {
        let ctx = RequestContext::of(&request);
        let token = self.token(&ctx).await?;
        let value = HeaderValue::from_str(&token.authorization())
            .map_err(|e| Error::TokenResponse(format!("token is not a valid header value: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        self.base.send(request).await
    }
}

impl std::fmt::Debug for BearerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTransport")
            .field("generation", &self.generation)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}
