//! Correlation registry for request/response over pub/sub.
//!
//! MQTT gives us no request/response semantics: a command goes out on one
//! topic and the reply (if any) comes back on another, in no particular order
//! relative to other traffic. The registry keeps one pending entry per
//! correlation identifier and settles it exactly once, either with the
//! matching response, with a timeout at its deadline, or by cancellation when
//! the requester goes away.
//!
//! ```text
//! register(id) ──→ [pending: id → completion, timer]
//!                        │
//!        resolve(id) ────┼──→ Ok(payload)        (first remover wins,
//!        deadline    ────┼──→ Err(Timeout)        losers see no entry)
//!        drop(reply) ────┘──→ entry removed
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

/// Failure outcome of a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// No response matched before the deadline
    #[error("No response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The entry was removed without being fulfilled
    #[error("Request cancelled")]
    Cancelled,
}

/// Registry invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Correlation identifier already registered: {0}")]
    DuplicateIdentifier(String),
}

type Completion<T> = oneshot::Sender<Result<T, CorrelationError>>;

struct PendingEntry<T> {
    completion: Completion<T>,
    timer: JoinHandle<()>,
    deadline: Instant,
}

struct RegistryInner<T> {
    pending: Mutex<HashMap<String, PendingEntry<T>>>,
}

impl<T> RegistryInner<T> {
    /// Remove an entry. Whoever gets `Some` here owns the settlement.
    fn take(&self, id: &str) -> Option<PendingEntry<T>> {
        self.pending.lock().remove(id)
    }

    fn expire(&self, id: &str, timeout_ms: u64) -> bool {
        let Some(entry) = self.take(id) else {
            return false;
        };
        debug!(req_id = %id, timeout_ms, "Pending request expired");
        let _ = entry.completion.send(Err(CorrelationError::Timeout { timeout_ms }));
        true
    }

    fn cancel(&self, id: &str) -> bool {
        let Some(entry) = self.take(id) else {
            return false;
        };
        entry.timer.abort();
        true
    }
}

/// Process-wide table of in-flight correlated requests.
///
/// Cloning is cheap and every clone shares the same table.
pub struct CorrelationRegistry<T> {
    inner: Arc<RegistryInner<T>>,
}

impl<T> Clone for CorrelationRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> Default for CorrelationRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> CorrelationRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a pending request and start its deadline timer.
    ///
    /// Must be called from within a Tokio runtime. The returned reply
    /// resolves with the matching payload, or with
    /// [`CorrelationError::Timeout`] once `timeout` has elapsed.
    pub fn register(
        &self,
        id: impl Into<String>,
        timeout: Duration,
    ) -> Result<PendingReply<T>, RegistryError> {
        let id = id.into();
        let deadline = Instant::now() + timeout;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let (completion, receiver) = oneshot::channel();

        let mut pending = self.inner.pending.lock();
        if pending.contains_key(&id) {
            drop(pending);
            error!(req_id = %id, "Correlation identifier already registered");
            return Err(RegistryError::DuplicateIdentifier(id));
        }
        let timer = tokio::spawn(expire_at(
            Arc::downgrade(&self.inner),
            id.clone(),
            deadline,
            timeout_ms,
        ));
        pending.insert(
            id.clone(),
            PendingEntry {
                completion,
                timer,
                deadline,
            },
        );
        drop(pending);

        debug!(req_id = %id, timeout_ms, "Registered pending request");
        Ok(PendingReply {
            id,
            receiver,
            registry: Arc::downgrade(&self.inner),
            settled: false,
        })
    }

    /// Fulfill the pending request for `id` with `payload`.
    ///
    /// Returns `false` when nothing is pending under `id` (already resolved,
    /// expired, cancelled or never registered). That is the normal outcome
    /// for late or foreign responses.
    pub fn resolve(&self, id: &str, payload: T) -> bool {
        let Some(entry) = self.inner.take(id) else {
            debug!(req_id = %id, "No pending request for response");
            return false;
        };
        entry.timer.abort();
        if entry.completion.send(Ok(payload)).is_err() {
            debug!(req_id = %id, "Requester went away before the response arrived");
        }
        true
    }

    /// Remove the pending request for `id` without fulfilling it.
    pub fn cancel(&self, id: &str) -> bool {
        self.inner.cancel(id)
    }

    /// Number of requests currently in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.pending.lock().contains_key(id)
    }

    /// Deadline of the pending request for `id`.
    pub fn deadline(&self, id: &str) -> Option<Instant> {
        self.inner.pending.lock().get(id).map(|entry| entry.deadline)
    }
}

async fn expire_at<T>(
    registry: Weak<RegistryInner<T>>,
    id: String,
    deadline: Instant,
    timeout_ms: u64,
) {
    tokio::time::sleep_until(deadline).await;
    if let Some(registry) = registry.upgrade() {
        registry.expire(&id, timeout_ms);
    }
}

/// Awaitable handle for one pending request.
///
/// Dropping it before it settles cancels the request and its timer.
#[must_use = "dropping a PendingReply cancels the request"]
pub struct PendingReply<T> {
    id: String,
    receiver: oneshot::Receiver<Result<T, CorrelationError>>,
    registry: Weak<RegistryInner<T>>,
    settled: bool,
}

impl<T> PendingReply<T> {
    /// Correlation identifier of this request.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> Future for PendingReply<T> {
    type Output = Result<T, CorrelationError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(outcome) => outcome,
            Poll::Pending => return Poll::Pending,
        };
        self.settled = true;
        Poll::Ready(outcome.unwrap_or(Err(CorrelationError::Cancelled)))
    }
}

impl<T> Drop for PendingReply<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            if registry.cancel(&self.id) {
                debug!(req_id = %self.id, "Abandoned request cancelled");
            }
        }
    }
}
