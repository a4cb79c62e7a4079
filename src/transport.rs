//! The HTTP seam between the worker loop and the target service.

use std::future::Future;
use std::time::Duration;

use url::Url;

use crate::error::TransportError;

/// What the checks get to see of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub bytes: u64,
}

pub trait Transport: Send + Sync + 'static {
    fn get(&self, url: Url) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

/// reqwest-backed transport. With `discard_bodies` the body is streamed
/// and dropped chunk by chunk instead of being buffered.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    discard_bodies: bool,
}

impl HttpTransport {
    pub fn new(timeout: Duration, discard_bodies: bool) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            discard_bodies,
        })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: Url) -> Result<Response, TransportError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status().as_u16();

        // Discarded bodies are still read to the end; only the bytes are dropped.
        let bytes = if self.discard_bodies {
            let mut received = 0;
            while let Some(chunk) = response.chunk().await? {
                received += chunk.len() as u64;
            }
            received
        } else {
            response.bytes().await?.len() as u64
        };

        Ok(Response { status, bytes })
    }
}
