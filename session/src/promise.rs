//! One-shot promise with linked cancellation.
//!
//! [`promise`] returns a [`Completer`] kept with the queued operation and a
//! [`QueryHandle`] given to the caller, connected by a `tokio` oneshot
//! channel. Cancellation is linked both ways:
//!
//! - cancelling (or dropping) the handle marks the operation cancelled, so the
//!   worker skips it or discards its result;
//! - dropping the completer without completing it (queue shut down, operation
//!   skipped) resolves the handle as [`QueryOutcome::Cancelled`].
//!
//! The handle can be awaited from async code or waited on from a plain thread.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::{RecvError, TryRecvError};

use crate::types::ToolError;

/// Final state of a query, as seen by its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome<T> {
    /// The query ran; the tool answered or failed.
    Completed(Result<T, ToolError>),
    /// The query was cancelled before a result was delivered.
    Cancelled,
}

impl<T> QueryOutcome<T> {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The result, or `None` when cancelled.
    pub fn into_result(self) -> Option<Result<T, ToolError>> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Cancelled => None,
        }
    }
}

type Reply<T> = Result<T, ToolError>;

/// Create a linked completer/handle pair.
pub(crate) fn promise<T>() -> (Completer<T>, QueryHandle<T>) {
    let (tx, rx) = oneshot::channel();
    let cancelled = Arc::new(AtomicBool::new(false));
    (
        Completer {
            tx,
            cancelled: Arc::clone(&cancelled),
        },
        QueryHandle {
            rx,
            cancelled,
            slot: Slot::Waiting,
        },
    )
}

/// Producer side, owned by the queued operation. Dropping it uncompleted
/// resolves the handle as cancelled.
pub(crate) struct Completer<T> {
    tx: oneshot::Sender<Reply<T>>,
    cancelled: Arc<AtomicBool>,
}

impl<T> Completer<T> {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Deliver `result`. Returns false when the handle was cancelled first,
    /// in which case the result is discarded.
    pub(crate) fn complete(self, result: Reply<T>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.tx.send(result).is_ok()
    }
}

/// Cloneable cancellation switch for a [`QueryHandle`], for code that does not
/// own the handle itself.
///
/// A caller already blocked in [`QueryHandle::wait`] or awaiting the handle
/// resumes once the worker reaches the query and drops it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

enum Slot<T> {
    Waiting,
    Ready(QueryOutcome<T>),
    Taken,
}

/// Caller side of a queued query.
///
/// Dropping the handle cancels the query. [`QueryHandle::wait`] blocks the
/// calling thread; never call it on the thread that answers document-host
/// requests, since the worker waits on that thread before each query.
pub struct QueryHandle<T> {
    rx: oneshot::Receiver<Reply<T>>,
    cancelled: Arc<AtomicBool>,
    slot: Slot<T>,
}

impl<T> Unpin for QueryHandle<T> {}

impl<T> QueryHandle<T> {
    /// Cancel the query. A query that has not started is never sent to the
    /// tool; a running one finishes, but its result is discarded. Once
    /// cancelled, the outcome is [`QueryOutcome::Cancelled`] even if a result
    /// had already arrived.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        self.rx.close();
        if !matches!(self.slot, Slot::Taken) {
            self.slot = Slot::Ready(QueryOutcome::Cancelled);
        }
    }

    /// Whether cancellation was requested through this handle or one of its
    /// tokens.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Pull a delivered outcome into the slot. Returns whether the query is
    /// finished.
    fn settle(&mut self) -> bool {
        if !matches!(self.slot, Slot::Waiting) {
            return true;
        }
        if self.is_cancelled() {
            self.rx.close();
            self.slot = Slot::Ready(QueryOutcome::Cancelled);
            return true;
        }
        self.slot = match self.rx.try_recv() {
            Ok(result) => Slot::Ready(QueryOutcome::Completed(result)),
            Err(TryRecvError::Closed) => Slot::Ready(QueryOutcome::Cancelled),
            Err(TryRecvError::Empty) => return false,
        };
        true
    }

    /// Whether the outcome is available without blocking.
    #[must_use]
    pub fn is_finished(&mut self) -> bool {
        self.settle()
    }

    /// Take the outcome if it is available. Returns `None` while pending and
    /// after the outcome has been taken once.
    pub fn try_take(&mut self) -> Option<QueryOutcome<T>> {
        if !self.settle() {
            return None;
        }
        match std::mem::replace(&mut self.slot, Slot::Taken) {
            Slot::Ready(outcome) => Some(outcome),
            Slot::Waiting | Slot::Taken => None,
        }
    }

    /// Block until the query completes or is cancelled. A handle whose
    /// outcome was already taken reports [`QueryOutcome::Cancelled`].
    ///
    /// # Panics
    ///
    /// Panics when called from async code; `.await` the handle there.
    pub fn wait(mut self) -> QueryOutcome<T> {
        if let Some(outcome) = self.take_if_settled() {
            return outcome;
        }
        let rx = std::mem::replace(&mut self.rx, oneshot::channel().1);
        let received = rx.blocking_recv();
        self.finish(received)
    }

    fn take_if_settled(&mut self) -> Option<QueryOutcome<T>> {
        if !self.settle() {
            return None;
        }
        match std::mem::replace(&mut self.slot, Slot::Taken) {
            Slot::Ready(outcome) => Some(outcome),
            Slot::Waiting | Slot::Taken => Some(QueryOutcome::Cancelled),
        }
    }

    fn finish(&mut self, received: Result<Reply<T>, RecvError>) -> QueryOutcome<T> {
        self.slot = Slot::Taken;
        match received {
            Ok(_) if self.is_cancelled() => QueryOutcome::Cancelled,
            Ok(result) => QueryOutcome::Completed(result),
            Err(_) => QueryOutcome::Cancelled,
        }
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl<T> std::fmt::Debug for QueryHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("cancelled", &self.is_cancelled())
            .field("settled", &!matches!(self.slot, Slot::Waiting))
            .finish_non_exhaustive()
    }
}

impl<T> Drop for QueryHandle<T> {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl<T> Future for QueryHandle<T> {
    type Output = QueryOutcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.take_if_settled() {
            return Poll::Ready(outcome);
        }
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| this.finish(received))
    }
}
