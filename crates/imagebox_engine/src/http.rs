//! HTTP client seam for box-to-box traffic.
//!
//! Delivery and fetch code reach peers exclusively through [`HttpClient`],
//! so tests can substitute scripted or in-process implementations. An
//! `Err` from the client means the request never produced a response;
//! an `Ok` may still carry a failure status, which callers classify.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

/// A decoded HTTP response: status code plus raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response with a body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// An empty response with the given status.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Bytes::new(),
        }
    }

    /// An empty 200 response.
    #[must_use]
    pub fn ok() -> Self {
        Self::status(200)
    }

    /// True for any 2xx status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body as printable text, trimmed for log and error messages.
    pub fn body_snippet(&self) -> String {
        const MAX: usize = 120;
        let text = String::from_utf8_lossy(&self.body);
        let mut snippet: String = text.chars().take(MAX).collect();
        if text.chars().count() > MAX {
            snippet.push_str("...");
        }
        snippet
    }
}

/// Abstraction over the transport used to reach peers.
pub trait HttpClient: Send + Sync {
    /// POSTs a body to the given URL.
    fn post(&self, url: &str, body: Bytes) -> Result<HttpResponse, String>;

    /// GETs the given URL.
    fn get(&self, url: &str) -> Result<HttpResponse, String>;

    /// DELETEs the given URL.
    fn delete(&self, url: &str) -> Result<HttpResponse, String>;
}

/// One request captured by [`MockHttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// HTTP verb.
    pub method: &'static str,
    /// Full request URL.
    pub url: String,
    /// Request body. Empty for GET and DELETE.
    pub body: Bytes,
}

/// Scripted client for tests.
///
/// Responses are queued per verb and consumed in order; an exhausted
/// queue yields a transport error, which doubles as an unreachable-peer
/// script. Every request is recorded for assertions.
pub struct MockHttpClient {
    posts: Mutex<VecDeque<Result<HttpResponse, String>>>,
    gets: Mutex<VecDeque<Result<HttpResponse, String>>>,
    deletes: Mutex<VecDeque<Result<HttpResponse, String>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockHttpClient {
    /// Creates a client with empty scripts.
    pub fn new() -> Self {
        Self {
            posts: Mutex::new(VecDeque::new()),
            gets: Mutex::new(VecDeque::new()),
            deletes: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues the response for the next POST.
    pub fn push_post(&self, response: Result<HttpResponse, String>) {
        self.posts.lock().push_back(response);
    }

    /// Queues the response for the next GET.
    pub fn push_get(&self, response: Result<HttpResponse, String>) {
        self.gets.lock().push_back(response);
    }

    /// Queues the response for the next DELETE.
    pub fn push_delete(&self, response: Result<HttpResponse, String>) {
        self.deletes.lock().push_back(response);
    }

    /// Returns every request seen so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn record(&self, method: &'static str, url: &str, body: Bytes) {
        self.requests.lock().push(RecordedRequest {
            method,
            url: url.to_string(),
            body,
        });
    }

    fn take(
        queue: &Mutex<VecDeque<Result<HttpResponse, String>>>,
        method: &str,
        url: &str,
    ) -> Result<HttpResponse, String> {
        queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(format!("no scripted response for {method} {url}")))
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for MockHttpClient {
    fn post(&self, url: &str, body: Bytes) -> Result<HttpResponse, String> {
        self.record("POST", url, body);
        Self::take(&self.posts, "POST", url)
    }

    fn get(&self, url: &str) -> Result<HttpResponse, String> {
        self.record("GET", url, Bytes::new());
        Self::take(&self.gets, "GET", url)
    }

    fn delete(&self, url: &str) -> Result<HttpResponse, String> {
        self.record("DELETE", url, Bytes::new());
        Self::take(&self.deletes, "DELETE", url)
    }
}

/// Serves requests in process, for wiring two nodes together in tests.
pub trait LoopbackPeer: Send + Sync {
    /// Handles one request. `body` is empty for GET and DELETE.
    fn handle(&self, method: &str, url: &str, body: Bytes) -> Result<HttpResponse, String>;
}

/// Client that hands every request straight to a [`LoopbackPeer`].
pub struct LoopbackClient<P: LoopbackPeer> {
    peer: Arc<P>,
}

impl<P: LoopbackPeer> LoopbackClient<P> {
    /// Creates a client backed by the given peer.
    pub fn new(peer: Arc<P>) -> Self {
        Self { peer }
    }
}

impl<P: LoopbackPeer> HttpClient for LoopbackClient<P> {
    fn post(&self, url: &str, body: Bytes) -> Result<HttpResponse, String> {
        self.peer.handle("POST", url, body)
    }

    fn get(&self, url: &str) -> Result<HttpResponse, String> {
        self.peer.handle("GET", url, Bytes::new())
    }

    fn delete(&self, url: &str) -> Result<HttpResponse, String> {
        self.peer.handle("DELETE", url, Bytes::new())
    }
}
