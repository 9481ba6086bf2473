//! A backing agent process attached to a session.
//!
//! [`AgentProcess`] bundles what a turn needs from one process: the input
//! sink, stdout framed into lines by a [`FrameDecoder`], and the
//! [`DiagnosticSink`] draining stderr. The framed reader lives here rather
//! than in a single turn so bytes that follow a terminal record stay buffered
//! for the next turn on a persistent process.
//!
//! A turn that timed out still owes a `result` record. The process counts
//! such turns so the next turn can discard their late output first.

use std::fmt;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::codec::FramedRead;
use tracing::{info, warn};

use super::diagnostics::DiagnosticSink;
use crate::runtime::{OutputStream, ProcessHandle};
use crate::stream::codec::FrameDecoder;
use crate::{AppError, Result};

/// Time allowed for the diagnostic sink to reach EOF after process exit.
const DIAGNOSTIC_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// One read from the primary output stream.
#[derive(Debug)]
pub(crate) enum Output {
    /// A complete line arrived. At end of stream this may be the
    /// unterminated tail.
    Line(String),
    /// The stream ended (EOF or unrecoverable read error).
    End,
    /// No complete line arrived within the read timeout.
    TimedOut,
}

/// A running backing process owned by one session.
pub struct AgentProcess {
    session_id: String,
    handle: ProcessHandle,
    lines: FramedRead<OutputStream, FrameDecoder>,
    diagnostics: DiagnosticSink,
    exhausted: bool,
    unanswered_turns: usize,
}

impl AgentProcess {
    /// Attach to `handle`, taking its output streams and starting the
    /// diagnostic sink.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Runtime`] if the handle's stdout was already taken.
    pub fn attach(session_id: &str, mut handle: ProcessHandle) -> Result<Self> {
        let stdout = handle
            .take_stdout()
            .ok_or_else(|| AppError::Runtime("process stdout already taken".into()))?;

        let diagnostics = handle.take_stderr().map_or_else(DiagnosticSink::detached, |stderr| {
            DiagnosticSink::spawn(session_id.to_owned(), stderr)
        });

        Ok(Self {
            session_id: session_id.to_owned(),
            handle,
            lines: FramedRead::new(stdout, FrameDecoder::new()),
            diagnostics,
            exhausted: false,
            unanswered_turns: 0,
        })
    }

    /// Session this process belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Runtime-assigned process identifier.
    #[must_use]
    pub fn process_id(&self) -> &str {
        self.handle.id()
    }

    /// Whether the primary output stream has ended. This already holds
    /// while the final, unterminated line is being dispatched.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted || self.lines.decoder().reached_eof()
    }

    /// Diagnostic output captured so far.
    #[must_use]
    pub fn diagnostics(&self) -> String {
        self.diagnostics.output()
    }

    /// Bytes received but not yet dispatched as a complete line.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.lines.decoder().buffered() + self.lines.read_buffer().len()
    }

    /// Turns that timed out and whose `result` record has not been seen yet.
    #[must_use]
    pub fn unanswered_turns(&self) -> usize {
        self.unanswered_turns
    }

    /// Write one outbound record to stdin.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the input sink is closed or the
    /// write fails.
    pub async fn send_message(&mut self, message: &Value) -> Result<usize> {
        self.handle.send(message).await
    }

    /// Hand the unanswered-turn count to a starting turn, resetting it.
    pub(crate) fn take_unanswered_turns(&mut self) -> usize {
        std::mem::take(&mut self.unanswered_turns)
    }

    pub(crate) fn set_unanswered_turns(&mut self, count: usize) {
        self.unanswered_turns = count;
    }

    /// Await the next stdout line for at most `read_timeout`.
    ///
    /// A timeout leaves the framed reader intact so a later read resumes
    /// where this one stopped.
    pub(crate) async fn next_output(&mut self, read_timeout: Duration) -> Output {
        if self.exhausted {
            return Output::End;
        }

        match tokio::time::timeout(read_timeout, self.lines.next()).await {
            Err(_elapsed) => Output::TimedOut,
            Ok(Some(Ok(line))) => Output::Line(line),
            Ok(Some(Err(err))) => {
                warn!(session_id = %self.session_id, %err, "stdout read failed, treating as end of stream");
                self.exhausted = true;
                Output::End
            }
            Ok(None) => {
                self.exhausted = true;
                Output::End
            }
        }
    }

    /// Close stdin, wait up to `grace` for exit, and stop the diagnostic sink.
    ///
    /// Returns the exit code (`None` if the process did not exit within
    /// `grace` or its status could not be read) and the full diagnostic
    /// output.
    pub async fn shutdown(mut self, grace: Duration) -> (Option<i32>, String) {
        self.handle.close_input().await;

        let waited = tokio::time::timeout(grace, self.handle.wait()).await;
        let exit_code = match waited {
            Ok(Ok(code)) => {
                info!(session_id = %self.session_id, process_id = %self.handle.id(), code, "agent process exited");
                Some(code)
            }
            Ok(Err(err)) => {
                warn!(session_id = %self.session_id, %err, "failed to wait for agent process");
                None
            }
            Err(_) => {
                warn!(
                    session_id = %self.session_id,
                    ?grace,
                    "agent process did not exit within grace period"
                );
                None
            }
        };

        let drain_grace = if exit_code.is_some() {
            DIAGNOSTIC_DRAIN_GRACE
        } else {
            Duration::ZERO
        };
        self.diagnostics.stop(drain_grace).await;

        (exit_code, self.diagnostics.output())
    }
}

impl fmt::Debug for AgentProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentProcess")
            .field("session_id", &self.session_id)
            .field("handle", &self.handle)
            .field("buffered_bytes", &self.buffered_bytes())
            .field("exhausted", &self.exhausted)
            .field("unanswered_turns", &self.unanswered_turns)
            .finish_non_exhaustive()
    }
}
