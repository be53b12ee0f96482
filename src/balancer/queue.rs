//! Bounded admission queue between the front-end listener and the workers.
//!
//! The queue is the only admission control in the system: when it is full,
//! enqueue fails immediately instead of blocking, and the caller is told to
//! back off. Dequeue suspends until work arrives, and each queued request is
//! delivered to exactly one worker.

use std::collections::VecDeque;
use std::pin::pin;
use std::time::Instant;

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use tokio::sync::{oneshot, Mutex, Notify};

use crate::error::ProxyError;

/// Outcome a worker settles a queued request with.
pub type ProxyResult = Result<BackendResponse, ProxyError>;

/// A snapshot of the inbound request, waiting for a worker.
pub struct PendingRequest {
    pub method: Method,
    /// Original path plus query string, appended verbatim to the backend
    /// base URL.
    pub path_and_query: String,
    /// Inbound headers minus hop-by-hop fields (`Host` is stripped by the
    /// listener before enqueueing).
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Channel to send the outcome back to the caller. Single-shot: settled
    /// exactly once, by success, timeout, or proxy-internal error.
    pub response_tx: oneshot::Sender<ProxyResult>,
    /// When this request was enqueued.
    pub enqueued_at: Instant,
}

/// The backend's answer, relayed to the caller unmodified.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

struct QueueInner {
    items: VecDeque<PendingRequest>,
    closed: bool,
}

/// Bounded FIFO of pending requests.
pub struct AdmissionQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
    /// Wakes one blocked consumer per enqueue, all of them on close.
    notify: Notify,
}

impl AdmissionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current occupancy.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.items.is_empty()
    }

    /// Admit a request, or reject it without waiting.
    ///
    /// Returns a receiver that resolves when a worker settles the request.
    /// Fails with `QueueFull` at capacity and `Closed` after shutdown; it
    /// never suspends waiting for space.
    pub async fn enqueue(
        &self,
        method: Method,
        path_and_query: String,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<oneshot::Receiver<ProxyResult>, ProxyError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(ProxyError::Closed);
        }
        if inner.items.len() >= self.capacity {
            return Err(ProxyError::QueueFull);
        }

        let (tx, rx) = oneshot::channel();
        inner.items.push_back(PendingRequest {
            method,
            path_and_query,
            headers,
            body,
            response_tx: tx,
            enqueued_at: Instant::now(),
        });
        drop(inner);

        self.notify.notify_one();
        Ok(rx)
    }

    /// Take the oldest pending request, suspending while the queue is empty.
    ///
    /// Returns `None` once the queue has been closed and drained. Items are
    /// handed to exactly one of the concurrently-waiting consumers.
    pub async fn dequeue(&self) -> Option<PendingRequest> {
        let mut notified = pin!(self.notify.notified());
        loop {
            // Register for a wakeup before checking state, so an enqueue
            // racing with the check cannot be missed.
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().await;
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }

    /// Stop admissions and abandon whatever is still queued.
    ///
    /// Dropped completion handles surface to the awaiting callers as
    /// service-unavailable, so nobody hangs on a request no worker will
    /// ever pick up.
    pub async fn close(&self) {
        let abandoned = {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            let abandoned = inner.items.len();
            inner.items.clear();
            abandoned
        };
        if abandoned > 0 {
            tracing::warn!(abandoned, "dropped queued requests at shutdown");
        }
        self.notify.notify_waiters();
    }
}
