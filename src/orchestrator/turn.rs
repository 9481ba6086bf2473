//! Turn controller: one request/response exchange with the agent.
//!
//! [`run_turn`] writes one `user` record, then reads stdout line by line,
//! each read bounded by the per-read timeout. Lines are dispatched in
//! arrival order until one of three things happens:
//!
//! | Event                  | [`TurnEnd`]                 | Process |
//! |------------------------|-----------------------------|---------|
//! | `result` record        | [`TurnEnd::Terminal`]       | kept    |
//! | stdout EOF / read error| [`TurnEnd::EndOfStream`]    | exited  |
//! | read timeout           | [`TurnEnd::TimedOut`]       | kept, never killed |
//!
//! [`compose_result`] then folds the outcome, the exit code, and the
//! diagnostic output into a [`TurnResult`].
//!
//! # Late answers
//!
//! A timed-out turn leaves its answer in flight. The process remembers how
//! many such turns are outstanding, and the next turn dispatches (logs) but
//! otherwise ignores every frame up to and including that many `result`
//! records. Those frames are neither counted nor forwarded to the observer.
//!
//! # Error precedence
//!
//! When several failure signals are present the error text is chosen as:
//! remote-reported error, then read timeout, then non-zero exit (using the
//! collected diagnostic output).

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::process::{AgentProcess, Output};
use crate::models::turn::TurnResult;
use crate::stream::dispatcher::{self, Frame, TerminalResult};
use crate::stream::writer;
use crate::Result;

/// Fallback error when the agent flags an error without any text.
const UNKNOWN_REMOTE_ERROR: &str = "Unknown error";

/// Why reading stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    /// A terminal `result` record was dispatched.
    Terminal,
    /// The primary output stream ended.
    EndOfStream,
    /// No output arrived within the per-read timeout.
    TimedOut,
}

/// Everything observed during one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Why reading stopped.
    pub end: TurnEnd,
    /// The terminal record, if one arrived.
    pub terminal: Option<TerminalResult>,
    /// Last non-empty conversation id carried by any dispatched frame.
    pub conversation_id: Option<String>,
    /// Number of frames dispatched.
    pub frames: usize,
    /// Per-read timeout in force for the turn.
    pub read_timeout: Duration,
}

impl TurnOutcome {
    fn new(read_timeout: Duration) -> Self {
        Self {
            end: TurnEnd::EndOfStream,
            terminal: None,
            conversation_id: None,
            frames: 0,
            read_timeout,
        }
    }

    /// Record one dispatched frame. Returns `true` when it ends the turn.
    fn observe(&mut self, frame: &Frame) -> bool {
        self.frames += 1;
        if let Some(id) = frame.conversation_id() {
            self.conversation_id = Some(id.to_owned());
        }
        if let Frame::Result(result) = frame {
            self.terminal = Some(result.clone());
            self.end = TurnEnd::Terminal;
            return true;
        }
        false
    }
}

/// Drive one exchange on `process`.
///
/// Sends `prompt` under `correlation_id`, then dispatches output until a
/// terminal record, end of stream, or a read timeout. Each dispatched frame
/// is also forwarded to `observer`, when given; a closed observer is
/// ignored. Lines that fail to parse are dropped without ending the turn.
///
/// # Errors
///
/// Returns [`AppError::Protocol`](crate::AppError::Protocol) only if the
/// request cannot be written. Timeouts and stream failures are reported
/// through [`TurnOutcome::end`].
#[instrument(skip_all, fields(session_id = %process.session_id()))]
pub async fn run_turn(
    process: &mut AgentProcess,
    prompt: &str,
    correlation_id: &str,
    read_timeout: Duration,
    observer: Option<&mpsc::Sender<Frame>>,
) -> Result<TurnOutcome> {
    let request = writer::user_message(prompt, correlation_id);
    let sent = process.send_message(&request).await?;
    debug!(bytes = sent, correlation_id, "turn: prompt sent");

    let session_id = process.session_id().to_owned();
    let mut outcome = TurnOutcome::new(read_timeout);
    let mut stale = process.take_unanswered_turns();
    if stale > 0 {
        debug!(stale, "turn: discarding late output of timed-out turns first");
    }

    loop {
        match process.next_output(read_timeout).await {
            Output::TimedOut => {
                warn!(?read_timeout, "turn: timed out waiting for agent output");
                process.set_unanswered_turns(stale + 1);
                outcome.end = TurnEnd::TimedOut;
                return Ok(outcome);
            }
            Output::End => {
                debug!("turn: end of stream");
                outcome.end = TurnEnd::EndOfStream;
                return Ok(outcome);
            }
            Output::Line(line) => {
                if dispatch(&session_id, &line, &mut outcome, &mut stale, observer).await {
                    return Ok(outcome);
                }
            }
        }
    }
}

/// Dispatch one line. Returns `true` when it was this turn's terminal record.
async fn dispatch(
    session_id: &str,
    line: &str,
    outcome: &mut TurnOutcome,
    stale: &mut usize,
    observer: Option<&mpsc::Sender<Frame>>,
) -> bool {
    let Some(frame) = dispatcher::parse_line(session_id, line) else {
        return false;
    };

    dispatcher::log_frame(session_id, &frame);
    if *stale > 0 {
        if frame.is_terminal() {
            *stale -= 1;
            debug!(session_id, remaining = *stale, "turn: discarded late result");
        }
        return false;
    }
    let terminal = outcome.observe(&frame);

    if let Some(tx) = observer {
        if tx.send(frame).await.is_err() {
            debug!(session_id, "turn: observer closed, frame not forwarded");
        }
    }

    terminal
}

/// Fold a turn outcome into the caller-facing [`TurnResult`].
///
/// `exit_code` is `None` while a persistent process is still running, which
/// counts as a healthy process. `diagnostics` is the collected stderr text,
/// used only when the process exited non-zero without a remote error.
#[must_use]
pub fn compose_result(outcome: &TurnOutcome, exit_code: Option<i32>, diagnostics: &str) -> TurnResult {
    let terminal = outcome.terminal.as_ref();
    let remote_error = terminal.is_some_and(|t| t.is_error);
    let mut response = terminal.map(|t| t.result.clone()).unwrap_or_default();

    let error = if remote_error {
        Some(if response.is_empty() {
            UNKNOWN_REMOTE_ERROR.to_owned()
        } else {
            response.clone()
        })
    } else if outcome.end == TurnEnd::TimedOut {
        Some(format!(
            "timed out after {}s waiting for agent output",
            outcome.read_timeout.as_secs_f64()
        ))
    } else if let Some(code) = exit_code.filter(|code| *code != 0) {
        let error = if diagnostics.trim().is_empty() {
            format!("Exit code {code}")
        } else {
            diagnostics.to_owned()
        };
        if response.is_empty() {
            response.clone_from(&error);
        }
        Some(error)
    } else {
        None
    };

    TurnResult {
        success: error.is_none(),
        raw_output: response.clone(),
        response,
        exit_code,
        error,
        reward: None,
        cost_usd: terminal.map(|t| t.total_cost_usd),
        duration_ms: terminal.map(|t| t.duration_ms),
        conversation_id: outcome.conversation_id.clone(),
    }
}

/// Like [`compose_result`], for a process that was expected to exit.
///
/// A clean turn whose process gave no exit status (it outlived
/// `exit_grace`, or waiting on it failed) is reported as failed, since
/// success requires a zero exit.
#[must_use]
pub fn compose_exited_result(
    outcome: &TurnOutcome,
    exit_code: Option<i32>,
    diagnostics: &str,
    exit_grace: Duration,
) -> TurnResult {
    let mut result = compose_result(outcome, exit_code, diagnostics);
    if exit_code.is_none() && result.error.is_none() {
        result.success = false;
        result.error = Some(format!(
            "agent process did not exit within {}s",
            exit_grace.as_secs_f64()
        ));
    }
    result
}
