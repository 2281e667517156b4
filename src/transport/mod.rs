//! Transport abstraction shared by the plain HTTP client, the bearer-token
//! transport and the authenticating decorator.

use std::sync::Arc;

use async_trait::async_trait;
use http::{Request, Response};

use crate::error::Result;

pub mod body;
pub mod context;
pub mod reqwest_transport;

pub use body::{Body, BoxStream};
pub use context::RequestContext;
pub use reqwest_transport::ReqwestTransport;

/// Sends one request and yields one response.
///
/// Implementations must not retry on their own. A returned `Err` means no
/// response was received.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        (**self).send(request).await
    }
}

/// Copies everything but the body: method, uri, version, headers and extensions.
pub(crate) fn clone_request_head<B>(request: &Request<B>, body: Body) -> Request<Body> {
    let mut clone = Request::new(body);
    *clone.method_mut() = request.method().clone();
    *clone.uri_mut() = request.uri().clone();
    *clone.version_mut() = request.version();
    *clone.headers_mut() = request.headers().clone();
    *clone.extensions_mut() = request.extensions().clone();
    clone
}
