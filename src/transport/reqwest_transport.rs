use std::io;

use async_trait::async_trait;
use futures::TryStreamExt;
use http::{Request, Response};
use reqwest::Client;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::body::SyncStream;
use crate::transport::{Body, RequestContext, Transport};

/// Plain HTTP transport over a shared [`reqwest::Client`].
///
/// Request and response bodies are streamed, nothing is buffered here.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl From<Body> for reqwest::Body {
    fn from(body: Body) -> Self {
        match body {
            Body::Empty => reqwest::Body::from(Vec::new()),
            Body::Full(bytes) => reqwest::Body::from(bytes),
            Body::Stream(stream) => reqwest::Body::wrap_stream(SyncStream::new(stream)),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        let ctx = RequestContext::of(&request);
        let request = reqwest::Request::try_from(request)?;
        debug!(method = %request.method(), url = %request.url(), "sending request");

        let response = ctx
            .run(async { self.client.execute(request).await.map_err(Error::from) })
            .await?;

        let mut builder = Response::builder()
            .status(response.status())
            .version(response.version());
        if let Some(headers) = builder.headers_mut() {
            *headers = response.headers().clone();
        }
        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(builder.body(Body::wrap_stream(stream))?)
    }
}
