//! Bounded executor pool
//!
//! Runs at most `capacity` asynchronous actions at a time, starting queued
//! actions in the order they were submitted. The pool knows nothing about
//! dependencies between actions.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Identifier of a submitted request, unique for the lifetime of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Default pool capacity: the host's logical processor count
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct PoolRequest {
    id: RequestId,
    job: Job,
}

struct PoolState {
    capacity: usize,
    running: usize,
    queue: VecDeque<PoolRequest>,
    next_request_id: u64,
}

/// Pool that runs up to `capacity` actions concurrently, first-submitted
/// first-run.
///
/// Cloning the pool yields another handle to the same queue and counters.
/// Actions are spawned onto the ambient tokio runtime, so [`submit`] must be
/// called from within one.
///
/// [`submit`]: ExecutorPool::submit
#[derive(Clone)]
pub struct ExecutorPool {
    state: Arc<Mutex<PoolState>>,
}

impl ExecutorPool {
    /// Create a pool with the given capacity (at least 1)
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        Ok(Self::with_state(capacity))
    }

    /// Create a pool sized to the host's logical processor count
    pub fn with_default_capacity() -> Self {
        Self::with_state(default_concurrency().max(1))
    }

    fn with_state(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                capacity,
                running: 0,
                queue: VecDeque::new(),
                next_request_id: 1,
            })),
        }
    }

    /// Submit an action for execution.
    ///
    /// Never blocks: the action is queued and started as soon as a slot is
    /// free. The returned [`Completion`] resolves with the action's output
    /// once it has run.
    pub fn submit<F, Fut>(&self, action: F) -> Completion<Fut::Output>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let output = action().await;
                // The submitter may have stopped listening; that is not the
                // pool's concern.
                let _ = tx.send(output);
            }
            .boxed()
        });

        let id = {
            let mut state = self.lock();
            let id = RequestId(state.next_request_id);
            state.next_request_id += 1;
            state.queue.push_back(PoolRequest { id, job });
            debug!(request = %id, queued = state.queue.len(), "request submitted");
            id
        };

        self.dispatch();
        Completion { id, rx }
    }

    /// True if no requests are waiting to start. Requests may still be
    /// running.
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Number of requests waiting to start
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Number of requests started but not yet settled
    pub fn running(&self) -> usize {
        self.lock().running
    }

    /// Maximum number of requests running at once
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Start queued requests while there is spare capacity
    fn dispatch(&self) {
        loop {
            let request = {
                let mut state = self.lock();
                if state.running >= state.capacity {
                    return;
                }
                match state.queue.pop_front() {
                    Some(request) => {
                        state.running += 1;
                        debug!(
                            request = %request.id,
                            running = state.running,
                            queued = state.queue.len(),
                            "request started"
                        );
                        request
                    }
                    None => return,
                }
            };

            let pool = self.clone();
            tokio::spawn(async move {
                let PoolRequest { id, job } = request;
                if AssertUnwindSafe(job()).catch_unwind().await.is_err() {
                    warn!(request = %id, "pool action panicked");
                }
                pool.release(id);
            });
        }
    }

    /// Free the slot held by a settled request and start the next one
    fn release(&self, id: RequestId) {
        {
            let mut state = self.lock();
            debug_assert!(state.running > 0, "released more requests than started");
            if state.running == 0 {
                error!(request = %id, "pool running counter underflow");
            }
            state.running = state.running.saturating_sub(1);
            debug!(request = %id, running = state.running, "request settled");
        }
        self.dispatch();
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ExecutorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ExecutorPool")
            .field("capacity", &state.capacity)
            .field("running", &state.running)
            .field("queued", &state.queue.len())
            .finish()
    }
}

/// Future resolving to the output of a submitted action
#[derive(Debug)]
pub struct Completion<T> {
    id: RequestId,
    rx: oneshot::Receiver<T>,
}

impl<T> Completion<T> {
    /// Identifier of the request this completion belongs to
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| PoolError::Abandoned { request: id }))
    }
}

/// Errors raised by the executor pool
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// A pool cannot run anything with no slots
    #[error("Executor pool capacity must be at least 1")]
    ZeroCapacity,

    /// The action never produced an output (it panicked or its runtime shut
    /// down)
    #[error("Request {request} was abandoned before producing a result")]
    Abandoned { request: RequestId },
}
