//! Cooperative cancellation and bounded external calls.
//!
//! Every collaborator call (analyzer, structured extractor, converter tool)
//! runs on its own thread while the pipeline thread waits in short slices.
//! On timeout or cancellation the waiting side returns immediately and the
//! worker thread is abandoned; its eventual result is dropped. Calls made
//! through a `SerialCalls` lane wait for such a worker before starting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Wait granularity for cancellation responsiveness.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Shared cancellation flag for one document's processing.
///
/// Cloning shares the flag: cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Why a bounded call did not produce a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Interrupted {
    #[error("Call '{label}' timed out after {secs}s")]
    TimedOut { label: String, secs: u64 },

    #[error("Call '{label}' cancelled")]
    Cancelled { label: String },

    #[error("Call '{label}' worker terminated without a result")]
    WorkerLost { label: String },

    #[error("Could not spawn worker for '{label}': {reason}")]
    Spawn { label: String, reason: String },
}

/// Run `f` on a worker thread, returning its value unless the deadline
/// passes or the token is cancelled first.
pub fn call_with_deadline<T, F>(
    label: &str,
    timeout: Duration,
    cancel: &CancelToken,
    f: F,
) -> Result<T, Interrupted>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(cancelled(label));
    }
    let (_worker, rx) = spawn_worker(label, f)?;
    wait_for(label, timeout, cancel, &rx)
}

/// Deadline-bounded calls that never overlap.
///
/// A call abandoned at its deadline keeps running on its worker thread.
/// The next call through the same lane starts only once that worker has
/// returned, waiting at most one more `timeout` for it.
#[derive(Debug, Default)]
pub struct SerialCalls {
    straggler: Option<JoinHandle<()>>,
}

impl SerialCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call<T, F>(&mut self, label: &str, timeout: Duration, cancel: &CancelToken, f: F) -> Result<T, Interrupted>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(cancelled(label));
        }
        self.wait_for_straggler(label, timeout, cancel)?;

        let (worker, rx) = spawn_worker(label, f)?;
        let outcome = wait_for(label, timeout, cancel, &rx);
        if outcome.is_err() && !worker.is_finished() {
            self.straggler = Some(worker);
        }
        outcome
    }

    /// True while an abandoned call is still running.
    pub fn is_busy(&self) -> bool {
        self.straggler.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn wait_for_straggler(&mut self, label: &str, timeout: Duration, cancel: &CancelToken) -> Result<(), Interrupted> {
        let Some(worker) = self.straggler.take() else {
            return Ok(());
        };
        let started = Instant::now();
        while !worker.is_finished() {
            if cancel.is_cancelled() {
                self.straggler = Some(worker);
                return Err(cancelled(label));
            }
            if started.elapsed() >= timeout {
                tracing::warn!(call = label, "Previous call still running, not starting another");
                self.straggler = Some(worker);
                return Err(Interrupted::TimedOut {
                    label: label.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            std::thread::sleep(POLL_SLICE);
        }
        Ok(())
    }
}

fn cancelled(label: &str) -> Interrupted {
    Interrupted::Cancelled {
        label: label.to_string(),
    }
}

fn spawn_worker<T, F>(label: &str, f: F) -> Result<(JoinHandle<()>, Receiver<T>), Interrupted>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let worker = std::thread::Builder::new()
        .name(format!("tenderlens-{label}"))
        .spawn(move || {
            // Receiver may already be gone after a timeout.
            let _ = tx.send(f());
        })
        .map_err(|e| Interrupted::Spawn {
            label: label.to_string(),
            reason: e.to_string(),
        })?;
    Ok((worker, rx))
}

fn wait_for<T>(label: &str, timeout: Duration, cancel: &CancelToken, rx: &Receiver<T>) -> Result<T, Interrupted> {
    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            tracing::warn!(call = label, "External call abandoned: cancelled");
            return Err(cancelled(label));
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            tracing::warn!(
                call = label,
                timeout_secs = timeout.as_secs(),
                "External call abandoned: deadline passed"
            );
            return Err(Interrupted::TimedOut {
                label: label.to_string(),
                secs: timeout.as_secs(),
            });
        }

        match rx.recv_timeout((timeout - elapsed).min(POLL_SLICE)) {
            Ok(value) => return Ok(value),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Interrupted::WorkerLost {
                    label: label.to_string(),
                })
            }
        }
    }
}
