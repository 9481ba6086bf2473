//! Process runtime abstraction.
//!
//! The sandbox that hosts the agent CLI is an external collaborator. This
//! module defines the seam the session engine consumes:
//!
//! - [`Runtime`] creates a process from a [`ProcessSpec`].
//! - [`ProcessHandle`] exposes the process's input sink, primary output
//!   stream, diagnostic stream, and exit status.
//!
//! [`local::LocalRuntime`] implements the seam with host processes.

pub mod local;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::stream::writer;
use crate::{AppError, Result};

/// Writable stdin of a backing process.
pub type InputSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable byte stream (stdout or stderr) of a backing process.
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Exit-status source of a backing process.
pub trait ProcessExit: Send {
    /// Wait for the process to exit and return its exit code.
    ///
    /// Processes terminated without an exit code (e.g. by a signal) report
    /// `-1`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Runtime`] if the exit status cannot be obtained.
    fn wait(&mut self) -> BoxFuture<'_, Result<i32>>;
}

/// Command and environment for a process the runtime should create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to `program`.
    pub args: Vec<String>,
    /// Working directory, typically the session workspace.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the process.
    pub env: BTreeMap<String, String>,
}

/// Creates backing processes inside an execution environment.
pub trait Runtime: Send + Sync {
    /// Create and start a process described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Runtime`] if the process cannot be created.
    fn create_process<'a>(&'a self, spec: &'a ProcessSpec) -> BoxFuture<'a, Result<ProcessHandle>>;
}

/// Handle to one running backing process.
///
/// The handle is exclusively owned by one session; all I/O methods take
/// `&mut self`, so two turns can never interleave writes to the same stdin.
pub struct ProcessHandle {
    id: String,
    stdin: Option<InputSink>,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    exit: Box<dyn ProcessExit>,
}

impl ProcessHandle {
    /// Assemble a handle from its parts.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        stdin: InputSink,
        stdout: OutputStream,
        stderr: Option<OutputStream>,
        exit: Box<dyn ProcessExit>,
    ) -> Self {
        Self {
            id: id.into(),
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr,
            exit,
        }
    }

    /// Runtime-assigned process identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write `message` to the process's stdin as one NDJSON line. Returns
    /// the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the input sink is closed or the
    /// write fails.
    pub async fn send(&mut self, message: &Value) -> Result<usize> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::Protocol("input sink already closed".into()))?;
        writer::write_message(stdin, message).await
    }

    /// Close stdin, signalling the process to finish. Idempotent.
    ///
    /// A failing shutdown is ignored: the sink is dropped either way, which
    /// closes the underlying pipe.
    pub async fn close_input(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(err) = stdin.shutdown().await {
                tracing::debug!(process_id = %self.id, %err, "stdin shutdown failed, dropping sink");
            }
        }
    }

    /// Take ownership of the primary output stream.
    pub fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    /// Take ownership of the diagnostic stream.
    pub fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Propagates [`ProcessExit::wait`] failures.
    pub async fn wait(&mut self) -> Result<i32> {
        self.exit.wait().await
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("stdin_open", &self.stdin.is_some())
            .field("stdout_attached", &self.stdout.is_some())
            .field("stderr_attached", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}
