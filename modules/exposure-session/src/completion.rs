//! Single-shot completion handles for platform callbacks.
//!
//! Every asynchronous session operation takes a `Completion<T>`. The platform
//! invokes it exactly once; `FnOnce` makes a second invocation impossible and
//! dropping the handle without invoking it surfaces as `SessionError::Dropped`
//! on the waiting side.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use exposure_common::SessionError;
use tokio::sync::oneshot;

type Callback<T> = Box<dyn FnOnce(Result<T, SessionError>) + Send>;

pub struct Completion<T> {
    callback: Callback<T>,
}

impl<T: Send + 'static> Completion<T> {
    /// Wrap an arbitrary callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Result<T, SessionError>) + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Completion whose result is awaited on the async driver.
    pub fn pending() -> (Self, Pending<T>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self::new(move |result| {
            // Receiver gone means the run was abandoned; nothing left to notify.
            let _ = tx.send(result);
        });
        (completion, Pending { rx })
    }

    /// Completion whose result is received on a blocking worker thread.
    pub fn blocking() -> (Self, BlockingPending<T>) {
        let (tx, rx) = mpsc::sync_channel(1);
        let completion = Self::new(move |result| {
            let _ = tx.send(result);
        });
        (completion, BlockingPending { rx })
    }

    pub fn complete(self, result: Result<T, SessionError>) {
        (self.callback)(result)
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value))
    }

    pub fn fail(self, error: SessionError) {
        self.complete(Err(error))
    }
}

/// Async side of [`Completion::pending`].
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T, SessionError>>,
}

impl<T> Pending<T> {
    pub async fn wait(self, timeout: Option<Duration>) -> Result<T, SessionError> {
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.rx)
                .await
                .map_err(|_| SessionError::TimedOut(limit))?,
            None => self.rx.await,
        };
        received.map_err(|_| SessionError::Dropped)?
    }
}

/// Blocking side of [`Completion::blocking`]. Must not be waited on from an
/// async executor thread.
pub struct BlockingPending<T> {
    rx: mpsc::Receiver<Result<T, SessionError>>,
}

impl<T> BlockingPending<T> {
    pub fn wait(self, timeout: Option<Duration>) -> Result<T, SessionError> {
        match timeout {
            None => self.rx.recv().map_err(|_| SessionError::Dropped)?,
            Some(limit) => match self.rx.recv_timeout(limit) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(SessionError::TimedOut(limit)),
                Err(RecvTimeoutError::Disconnected) => Err(SessionError::Dropped),
            },
        }
    }
}
