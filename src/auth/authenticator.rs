use std::sync::Arc;

use async_trait::async_trait;
use http::{Request, Response};
use reqwest::Client;
use tracing::{debug, info};

use crate::classify::{ErrorClassifier, Verdict};
use crate::error::{Error, Result};
use crate::oauth2::ClientCredentials;
use crate::observability::metrics::get_metrics;
use crate::renewal::RenewalCoordinator;
use crate::replay::BodyReplayBuffer;
use crate::transport::{clone_request_head, Body, ReqwestTransport, RequestContext, Transport};

/// Builds an [`Authenticator`] for `credentials` that reaches the token
/// endpoint and the protected resources through `base`. Performs no I/O.
pub fn new_authenticated_transport(credentials: ClientCredentials, base: Arc<dyn Transport>) -> Authenticator {
    Authenticator::new(credentials, base)
}

/// Transport decorator that renews an invalid access token and retries once.
///
/// Cloning is cheap and clones share the inner transport and the renewal
/// coordination.
#[derive(Clone)]
pub struct Authenticator {
    inner: Arc<Inner>,
}

struct Inner {
    coordinator: RenewalCoordinator,
    classifier: ErrorClassifier,
}

impl Authenticator {
    pub fn new(credentials: ClientCredentials, base: Arc<dyn Transport>) -> Self {
        let classifier = ErrorClassifier::new(credentials.invalid_token_code());
        Self {
            inner: Arc::new(Inner {
                coordinator: RenewalCoordinator::new(Arc::new(credentials), base),
                classifier,
            }),
        }
    }

    pub fn with_reqwest(credentials: ClientCredentials, client: Client) -> Self {
        Self::new(credentials, Arc::new(ReqwestTransport::new(client)))
    }

    pub fn credentials(&self) -> &ClientCredentials {
        self.inner.coordinator.credentials()
    }

    /// Generation of the inner transport; starts at 1 and grows with every renewal.
    pub fn generation(&self) -> u64 {
        self.inner.coordinator.current().generation()
    }

    pub async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        let metrics = get_metrics().await;
        let ctx = RequestContext::of(&request);

        let (parts, body) = request.into_parts();
        let (body, replay) = BodyReplayBuffer::capture(body);
        let first = Request::from_parts(parts, body);
        let mut retry = clone_request_head(&first, Body::Empty);

        let inner = self.inner.coordinator.current();
        let response = match ctx.run(inner.send(first)).await {
            Ok(response) => response,
            Err(err) => {
                metrics.sends.with_label_values(&["transport_error"]).inc();
                return Err(Error::request(err));
            }
        };

        let (response, verdict) = ctx
            .run(self.inner.classifier.classify(response))
            .await
            .map_err(Error::request)?;
        if verdict == Verdict::NoRenewal {
            metrics.sends.with_label_values(&["passed"]).inc();
            return Ok(response);
        }
        drop(response);

        info!(
            method = %retry.method(),
            uri = %retry.uri(),
            generation = inner.generation(),
            "access token rejected, renewing"
        );
        if let Err(err) = self.inner.coordinator.renew(inner.generation(), &ctx).await {
            metrics.sends.with_label_values(&["renewal_error"]).inc();
            return Err(err);
        }

        *retry.body_mut() = replay.replay();
        let renewed = self.inner.coordinator.current();
        debug!(generation = renewed.generation(), "retrying with renewed token");
        match ctx.run(renewed.send(retry)).await {
            Ok(response) => {
                metrics
                    .retries
                    .with_label_values(&[response.status().as_str()])
                    .inc();
                metrics.sends.with_label_values(&["retried"]).inc();
                Ok(response)
            }
            Err(err) => {
                metrics.retries.with_label_values(&["transport_error"]).inc();
                metrics.sends.with_label_values(&["transport_error"]).inc();
                Err(Error::retry(err))
            }
        }
    }
}

#[async_trait]
impl Transport for Authenticator {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        Authenticator::send(self, request).await
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("credentials", self.credentials())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
