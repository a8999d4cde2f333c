// src/services/replay.rs

//! In-memory transport that answers from recorded responses.
//!
//! Used to replay captured exchanges (for example when checking which
//! signature variant upstream currently accepts) and by the test suites.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::transport::{ApiRequest, HttpResponse, Transport, TransportError};

/// A recorded reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Response(HttpResponse),
    Failure(TransportError),
}

impl Reply {
    pub fn json(value: Value) -> Self {
        Self::text(200, value.to_string())
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::Response(HttpResponse {
            status,
            body: body.into(),
        })
    }

    pub fn status(status: u16) -> Self {
        Self::text(status, "")
    }

    pub fn timeout() -> Self {
        Self::Failure(TransportError::timeout())
    }
}

/// Which requests a reply answers.
#[derive(Debug, Clone, PartialEq)]
pub struct Matcher {
    url_contains: String,
    params: Vec<(String, String)>,
}

impl Matcher {
    pub fn url(fragment: impl Into<String>) -> Self {
        Self {
            url_contains: fragment.into(),
            params: Vec::new(),
        }
    }

    /// Require a body field or query parameter to equal `value`.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = match value.into() {
            Value::String(s) => s,
            other => other.to_string(),
        };
        self.params.push((key.into(), value));
        self
    }

    fn matches(&self, request: &ApiRequest) -> bool {
        request.url.contains(&self.url_contains)
            && self
                .params
                .iter()
                .all(|(k, v)| request.param(k).as_deref() == Some(v.as_str()))
    }
}

#[derive(Debug)]
struct Route {
    matcher: Matcher,
    replies: VecDeque<Reply>,
}

/// Replays queued replies per matcher.
///
/// Replies for one matcher are served in order; the last one repeats.
/// Requests no route matches get a 404.
#[derive(Debug, Default)]
pub struct ReplayTransport {
    routes: Mutex<Vec<Route>>,
    sent: Mutex<Vec<ApiRequest>>,
}

impl ReplayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for requests matching `matcher`.
    pub fn add(&self, matcher: Matcher, reply: Reply) -> &Self {
        let mut routes = lock(&self.routes);
        match routes.iter_mut().find(|r| r.matcher == matcher) {
            Some(route) => route.replies.push_back(reply),
            None => routes.push(Route {
                matcher,
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        lock(&self.sent).clone()
    }

    /// Number of requests sent to URLs containing `fragment`.
    pub fn count(&self, fragment: &str) -> usize {
        lock(&self.sent)
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }

    fn next_reply(&self, request: &ApiRequest) -> Reply {
        let mut routes = lock(&self.routes);
        let route = routes.iter_mut().find(|r| r.matcher.matches(request));
        match route {
            Some(route) if route.replies.len() > 1 => {
                route.replies.pop_front().unwrap_or_else(|| Reply::status(404))
            }
            Some(route) => route
                .replies
                .front()
                .cloned()
                .unwrap_or_else(|| Reply::status(404)),
            None => Reply::status(404),
        }
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn send(&self, request: &ApiRequest) -> Result<HttpResponse, TransportError> {
        lock(&self.sent).push(request.clone());
        match self.next_reply(request) {
            Reply::Response(response) => Ok(response),
            Reply::Failure(error) => Err(error),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
