//! Single-threaded execution queue that owns the SQLite connection.
//!
//! Every read and write is a job submitted to one dedicated thread, so jobs
//! run one at a time in submission order. Callers on any thread can submit
//! concurrently; only the worker ever touches the connection.

use crate::error::{StoreError, StoreResult};
use rusqlite::Connection;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Handle to the store thread. Dropping the last handle stops the thread
/// once the queue is drained.
#[derive(Clone)]
pub(crate) struct StoreWorker {
    tx: mpsc::Sender<Job>,
}

impl StoreWorker {
    pub(crate) fn spawn(mut conn: Connection) -> StoreResult<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("lineup-store".into())
            .spawn(move || {
                for job in rx {
                    job(&mut conn);
                }
                debug!("store worker queue closed, thread exiting");
            })?;
        Ok(Self { tx })
    }

    /// Queues a job. Returns `false` if the worker thread is gone.
    fn submit(&self, job: Job) -> bool {
        self.tx.send(job).is_ok()
    }

    /// Runs `f` on the store thread and blocks until it finishes or `timeout` elapses.
    pub(crate) fn read<T, F>(&self, timeout: Duration, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let submitted = self.submit(Box::new(move |conn| {
            let _ = reply_tx.send(f(conn));
        }));
        if !submitted {
            return Err(StoreError::Unavailable);
        }
        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(StoreError::Timeout(timeout.as_millis() as u64))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(StoreError::Unavailable),
        }
    }

    /// Queues `f` and returns immediately with a completion signal.
    ///
    /// The completion resolves to the value `f` returns, or `false` on error.
    pub(crate) fn write<F>(&self, op: &'static str, f: F) -> WriteCompletion
    where
        F: FnOnce(&mut Connection) -> StoreResult<bool> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let submitted = self.submit(Box::new(move |conn| {
            let ok = match f(conn) {
                Ok(written) => written,
                Err(e) => {
                    warn!("store write `{op}` failed: {e}");
                    false
                }
            };
            let _ = done_tx.send(ok);
        }));
        if submitted {
            WriteCompletion { rx: Some(done_rx) }
        } else {
            warn!("store write `{op}` dropped: worker unavailable");
            WriteCompletion::failed()
        }
    }
}

/// Completion signal for a queued write.
///
/// Dropping it does not cancel the write. Resolves to `true` once the write
/// committed and `false` if it failed or the store is unavailable.
#[must_use = "writes are queued; wait or await to observe the result"]
#[derive(Debug)]
pub struct WriteCompletion {
    rx: Option<oneshot::Receiver<bool>>,
}

impl WriteCompletion {
    pub(crate) fn failed() -> Self {
        Self { rx: None }
    }

    /// Blocks the current thread until the write finished.
    ///
    /// Must not be called from inside an async task; await [`finished`](Self::finished) there.
    pub fn wait(self) -> bool {
        match self.rx {
            Some(rx) => rx.blocking_recv().unwrap_or(false),
            None => false,
        }
    }

    pub async fn finished(self) -> bool {
        match self.rx {
            Some(rx) => rx.await.unwrap_or(false),
            None => false,
        }
    }
}
