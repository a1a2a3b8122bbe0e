//! HTTP transport implementation.
//!
//! The concrete HTTP client is abstracted behind a trait so different
//! libraries (reqwest, hyper, or an in-process loopback for tests) can
//! drive the same transport. Bodies are JSON.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use docsync_protocol::{PullResponse, PushRequest, PushResponse};
use std::future::Future;

/// A raw HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// An empty response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    /// A 200 response with a JSON body.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, String> {
        Ok(Self {
            status: 200,
            body: serde_json::to_vec(value).map_err(|e| e.to_string())?,
        })
    }
}

/// HTTP client abstraction.
///
/// An `Err` means the request never produced a response (DNS, refused
/// connection, timeout); a response with a failure status comes back
/// as `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request.
    fn post(
        &self,
        url: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<HttpResponse, String>> + Send;

    /// Sends a GET request.
    fn get(&self, url: &str) -> impl Future<Output = Result<HttpResponse, String>> + Send;

    /// Sends a HEAD request.
    fn head(&self, url: &str) -> impl Future<Output = Result<HttpResponse, String>> + Send;
}

/// HTTP-based sync transport.
///
/// `POST <base>/push`, `GET <base>/pull?checkpoint=<cursor>`,
/// `HEAD <base>/ping`. Network failures and 502/503/504 map to
/// gateway-class transport errors (they flip the reachability flag);
/// other failure statuses map to non-gateway transport errors.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport over a client.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn check_status(response: HttpResponse) -> SyncResult<Vec<u8>> {
    match response.status {
        200..=299 => Ok(response.body),
        status @ (502 | 503 | 504) => {
            Err(SyncError::transport_gateway(format!("server returned {status}")))
        }
        status => Err(SyncError::transport(format!("server returned {status}"))),
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push(
        &self,
        request: &PushRequest,
    ) -> impl Future<Output = SyncResult<PushResponse>> + Send {
        async move {
            let body = serde_json::to_vec(request)?;
            let url = format!("{}/push", self.base_url);
            let response = self
                .client
                .post(&url, body)
                .await
                .map_err(SyncError::transport_gateway)?;
            let body = check_status(response)?;
            Ok(serde_json::from_slice(&body)?)
        }
    }

    fn pull(
        &self,
        checkpoint: Option<&str>,
    ) -> impl Future<Output = SyncResult<PullResponse>> + Send {
        let url = match checkpoint {
            Some(cursor) => format!("{}/pull?checkpoint={cursor}", self.base_url),
            None => format!("{}/pull", self.base_url),
        };
        async move {
            let response = self
                .client
                .get(&url)
                .await
                .map_err(SyncError::transport_gateway)?;
            let body = check_status(response)?;
            Ok(serde_json::from_slice(&body)?)
        }
    }

    fn ping(&self) -> impl Future<Output = SyncResult<()>> + Send {
        let url = format!("{}/ping", self.base_url);
        async move {
            let response = self
                .client
                .head(&url)
                .await
                .map_err(SyncError::transport_gateway)?;
            check_status(response)?;
            Ok(())
        }
    }
}

/// In-process request handler for tests.
pub trait LoopbackServer: Send + Sync {
    /// Handles one request. `target` is the path plus query string.
    fn handle(&self, method: &str, target: &str, body: &[u8]) -> Result<HttpResponse, String>;
}

/// An [`HttpClient`] that routes to a [`LoopbackServer`].
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Wraps a server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(
        &self,
        url: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<HttpResponse, String>> + Send {
        std::future::ready(self.server.handle("POST", url, &body))
    }

    fn get(&self, url: &str) -> impl Future<Output = Result<HttpResponse, String>> + Send {
        std::future::ready(self.server.handle("GET", url, &[]))
    }

    fn head(&self, url: &str) -> impl Future<Output = Result<HttpResponse, String>> + Send {
        std::future::ready(self.server.handle("HEAD", url, &[]))
    }
}
