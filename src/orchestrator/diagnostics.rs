//! Background draining of a process's diagnostic (stderr) stream.
//!
//! The agent writes errors and debug text to stderr independently of the
//! structured stdout protocol. If nobody reads it the pipe fills up and the
//! agent blocks, so every backing process gets one [`DiagnosticSink`] task
//! that runs for the lifetime of the process, unaffected by turn boundaries.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Append-only log of decoded diagnostic chunks.
///
/// Cloning yields another read handle onto the same log; only the owning
/// [`DiagnosticSink`] task appends to it.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog(Arc<Mutex<Vec<String>>>);

impl DiagnosticLog {
    fn append(&self, chunk: String) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(chunk);
    }

    /// Concatenation of all chunks captured so far.
    #[must_use]
    pub fn contents(&self) -> String {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .concat()
    }

    /// Number of chunks captured so far.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Concurrent task collecting a diagnostic stream into a [`DiagnosticLog`].
#[derive(Debug)]
pub struct DiagnosticSink {
    log: DiagnosticLog,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DiagnosticSink {
    /// Start draining `stream` in a background task.
    ///
    /// The task ends on EOF, on the first read error, or on [`stop`](Self::stop).
    /// It never reports an error to its caller.
    #[must_use]
    pub fn spawn<R>(session_id: String, stream: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let log = DiagnosticLog::default();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drain(session_id, stream, log.clone(), cancel.clone()));

        Self {
            log,
            cancel,
            task: Some(task),
        }
    }

    /// A sink with no stream attached; its log stays empty.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            log: DiagnosticLog::default(),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Concatenation of everything captured so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.log.contents()
    }

    /// Read handle onto the log.
    #[must_use]
    pub fn log(&self) -> DiagnosticLog {
        self.log.clone()
    }

    /// Whether the draining task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the task, first allowing it up to `grace` to reach EOF on its own.
    ///
    /// Waiting lets trailing output written just before process exit land in
    /// the log. Idempotent; the log stays readable afterwards.
    pub async fn stop(&mut self, grace: Duration) {
        let Some(mut task) = self.task.take() else {
            return;
        };

        if !grace.is_zero() && tokio::time::timeout(grace, &mut task).await.is_ok() {
            return;
        }

        self.cancel.cancel();
        if let Err(err) = task.await {
            debug!(%err, "diagnostic sink task ended abnormally");
        }
    }
}

impl Drop for DiagnosticSink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drain<R>(session_id: String, stream: R, log: DiagnosticLog, cancel: CancellationToken)
where
    R: AsyncRead + Send + Unpin,
{
    let mut chunks = ReaderStream::new(stream);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "diagnostic sink: cancellation received, stopping");
                break;
            }

            next = chunks.next() => match next {
                Some(Ok(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    debug!(session_id, "[stderr] {}", text.trim());
                    log.append(text);
                }
                Some(Err(err)) => {
                    debug!(session_id, %err, "diagnostic sink: read failed, stopping");
                    break;
                }
                None => {
                    debug!(session_id, "diagnostic sink: EOF");
                    break;
                }
            }
        }
    }
}
