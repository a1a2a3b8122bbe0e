//! Transport layer abstraction for sync operations.

use crate::error::SyncResult;
use docsync_protocol::{PullResponse, PushRequest, PushResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A sync transport handles network communication with the sync
/// server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
/// Futures are `Send` so the sync loop can run on a multi-threaded
/// runtime.
pub trait SyncTransport: Send + Sync {
    /// Pushes pending mutations to the server.
    fn push(
        &self,
        request: &PushRequest,
    ) -> impl Future<Output = SyncResult<PushResponse>> + Send;

    /// Pulls changes since `checkpoint` from the server.
    fn pull(
        &self,
        checkpoint: Option<&str>,
    ) -> impl Future<Output = SyncResult<PullResponse>> + Send;

    /// Cheap reachability probe.
    fn ping(&self) -> impl Future<Output = SyncResult<()>> + Send;
}

impl<T: SyncTransport> SyncTransport for std::sync::Arc<T> {
    fn push(
        &self,
        request: &PushRequest,
    ) -> impl Future<Output = SyncResult<PushResponse>> + Send {
        (**self).push(request)
    }

    fn pull(
        &self,
        checkpoint: Option<&str>,
    ) -> impl Future<Output = SyncResult<PullResponse>> + Send {
        (**self).pull(checkpoint)
    }

    fn ping(&self) -> impl Future<Output = SyncResult<()>> + Send {
        (**self).ping()
    }
}

/// A mock transport for testing.
///
/// Responses are scripted with the `enqueue_*` methods and consumed in
/// order. With nothing scripted, pushes acknowledge every mutation,
/// pulls return an empty batch, and pings succeed. All requests are
/// recorded.
#[derive(Default)]
pub struct MockTransport {
    push_script: Mutex<VecDeque<SyncResult<PushResponse>>>,
    pull_script: Mutex<VecDeque<SyncResult<PullResponse>>>,
    ping_script: Mutex<VecDeque<SyncResult<()>>>,
    pushes: Mutex<Vec<PushRequest>>,
    pulls: Mutex<Vec<Option<String>>>,
    pings: AtomicUsize,
}

impl MockTransport {
    /// Creates a mock with default behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next push response.
    pub fn enqueue_push(&self, response: SyncResult<PushResponse>) {
        self.push_script.lock().push_back(response);
    }

    /// Scripts the next pull response.
    pub fn enqueue_pull(&self, response: SyncResult<PullResponse>) {
        self.pull_script.lock().push_back(response);
    }

    /// Scripts the next ping result.
    pub fn enqueue_ping(&self, result: SyncResult<()>) {
        self.ping_script.lock().push_back(result);
    }

    /// Push requests seen so far.
    pub fn pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().clone()
    }

    /// Pull checkpoints seen so far.
    pub fn pulls(&self) -> Vec<Option<String>> {
        self.pulls.lock().clone()
    }

    /// Number of pings seen so far.
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::Relaxed)
    }
}

impl SyncTransport for MockTransport {
    fn push(
        &self,
        request: &PushRequest,
    ) -> impl Future<Output = SyncResult<PushResponse>> + Send {
        self.pushes.lock().push(request.clone());
        let response = self.push_script.lock().pop_front().unwrap_or_else(|| {
            Ok(PushResponse {
                sync_receipts: request
                    .mutations
                    .iter()
                    .map(|m| docsync_protocol::Receipt { key: m.key.clone() })
                    .collect(),
            })
        });
        std::future::ready(response)
    }

    fn pull(
        &self,
        checkpoint: Option<&str>,
    ) -> impl Future<Output = SyncResult<PullResponse>> + Send {
        self.pulls.lock().push(checkpoint.map(str::to_string));
        let response = self.pull_script.lock().pop_front().unwrap_or_else(|| {
            Ok(PullResponse {
                documents: Vec::new(),
                checkpoint: None,
            })
        });
        std::future::ready(response)
    }

    fn ping(&self) -> impl Future<Output = SyncResult<()>> + Send {
        self.pings.fetch_add(1, Ordering::Relaxed);
        let result = self.ping_script.lock().pop_front().unwrap_or(Ok(()));
        std::future::ready(result)
    }
}
