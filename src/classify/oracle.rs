//! Classifier worker thread.
//!
//! The adapter is owned by a single worker. Callers send it jobs over a
//! channel and wait for the reply with an optional timeout, so a stuck
//! classifier surfaces as [`ClassifyError::Timeout`] instead of a hung
//! resolution. Jobs run strictly in submission order.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::ClassifyError;

use super::{ClassificationAdapter, ClassifyResult};

type Job = Box<dyn FnOnce(&mut dyn ClassificationAdapter) + Send>;

/// Handle to the classifier worker.
///
/// Dropping the handle closes the job queue; the worker finishes whatever
/// it is running and exits on its own. It is not joined.
pub struct Oracle {
    jobs: mpsc::Sender<Job>,
    timeout: Option<Duration>,
    _worker: JoinHandle<()>,
}

impl Oracle {
    /// Move `adapter` onto a dedicated worker thread.
    ///
    /// `timeout` bounds how long [`run`](Self::run) waits for each reply;
    /// `None` waits indefinitely.
    pub fn spawn(
        mut adapter: Box<dyn ClassificationAdapter>,
        timeout: Option<Duration>,
    ) -> ClassifyResult<Self> {
        let (jobs, queue) = mpsc::channel::<Job>();
        let worker = std::thread::Builder::new()
            .name("exprepo-classifier".into())
            .spawn(move || {
                while let Ok(job) = queue.recv() {
                    job(adapter.as_mut());
                }
                tracing::debug!("classifier worker stopped");
            })
            .map_err(|e| ClassifyError::Unavailable {
                message: format!("failed to spawn classifier worker: {e}"),
            })?;

        Ok(Self {
            jobs,
            timeout,
            _worker: worker,
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `f` on the worker and wait for its result.
    ///
    /// On timeout the job is not cancelled: it keeps the worker busy and
    /// later jobs queue behind it.
    pub fn run<R, F>(&self, f: F) -> ClassifyResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn ClassificationAdapter) -> ClassifyResult<R> + Send + 'static,
    {
        let (reply, answer) = mpsc::sync_channel(1);
        let job: Job = Box::new(move |adapter| {
            // The caller may have given up waiting.
            let _ = reply.send(f(adapter));
        });
        self.jobs.send(job).map_err(|_| stopped())?;

        match self.timeout {
            Some(timeout) => match answer.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(timeout_ms = timeout.as_millis() as u64, "classifier timed out");
                    Err(ClassifyError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => Err(stopped()),
            },
            None => answer.recv().map_err(|_| stopped())?,
        }
    }

    /// Queue `f` without waiting for it.
    pub fn submit<F>(&self, f: F) -> ClassifyResult<()>
    where
        F: FnOnce(&mut dyn ClassificationAdapter) + Send + 'static,
    {
        self.jobs.send(Box::new(f)).map_err(|_| stopped())
    }
}

fn stopped() -> ClassifyError {
    ClassifyError::Unavailable {
        message: "classifier worker has stopped".into(),
    }
}

impl std::fmt::Debug for Oracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Oracle")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
