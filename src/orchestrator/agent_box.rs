//! The agent box: one session, its workspace, and its backing process.
//!
//! [`AgentBox`] offers two ways to talk to the agent:
//!
//! - **One-shot** ([`AgentBox::code`]) creates a fresh process for a single
//!   turn, then closes its input and waits for it to exit.
//! - **Persistent** ([`AgentBox::send`], [`AgentBox::stream`]) starts a
//!   process on first use and keeps it across turns until the session
//!   closes. A process whose output ends is reaped and replaced on the next
//!   call.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::process::AgentProcess;
use super::session_manager::{LifecycleState, SessionLifecycle};
use super::turn::{self, TurnOutcome};
use crate::config::{AgentConfig, BoxConfig};
use crate::models::session::SessionRecord;
use crate::models::turn::TurnResult;
use crate::persistence::WorkspaceStore;
use crate::runtime::{ProcessSpec, Runtime};
use crate::stream::dispatcher::Frame;
use crate::{AppError, Result};

/// Scores a finished turn.
pub type RewardFn = Arc<dyn Fn(&TurnResult) -> f64 + Send + Sync>;

/// How a session is opened.
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Session to open or create; `None` creates an ephemeral session.
    pub session_id: Option<String>,
    /// Override for workspace removal on close.
    pub auto_remove: Option<bool>,
    /// Optional scorer applied to every turn result.
    pub reward_fn: Option<RewardFn>,
}

impl SessionOptions {
    /// Options naming a persistent session.
    #[must_use]
    pub fn named(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("session_id", &self.session_id)
            .field("auto_remove", &self.auto_remove)
            .field("reward_fn", &self.reward_fn.is_some())
            .finish()
    }
}

/// Per-call limits for a one-shot turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOptions {
    /// Maximum number of agentic turns (`--max-turns`).
    pub max_turns: Option<u32>,
    /// Tools the agent may use (`--allowedTools`).
    pub allowed_tools: Vec<String>,
    /// Tools the agent may not use (`--disallowedTools`).
    pub disallowed_tools: Vec<String>,
}

/// Build the agent invocation for a session workspace.
#[must_use]
pub fn agent_command(
    agent: &AgentConfig,
    working_dir: PathBuf,
    options: Option<&TurnOptions>,
) -> ProcessSpec {
    let mut args = agent.args.clone();

    if let Some(path) = &agent.mcp_config {
        args.extend(["--mcp-config".to_owned(), path.clone()]);
    }

    if let Some(options) = options {
        if let Some(max_turns) = options.max_turns {
            args.extend(["--max-turns".to_owned(), max_turns.to_string()]);
        }
        for tool in &options.allowed_tools {
            args.extend(["--allowedTools".to_owned(), tool.clone()]);
        }
        for tool in &options.disallowed_tools {
            args.extend(["--disallowedTools".to_owned(), tool.clone()]);
        }
    }

    ProcessSpec {
        program: agent.program.clone(),
        args,
        working_dir: Some(working_dir),
        env: agent.env.clone(),
    }
}

/// A session bound to a runtime and a workspace store.
pub struct AgentBox {
    runtime: Arc<dyn Runtime>,
    store: Arc<dyn WorkspaceStore>,
    config: BoxConfig,
    lifecycle: SessionLifecycle,
    process: Option<AgentProcess>,
    last_diagnostics: String,
    reward_fn: Option<RewardFn>,
}

impl AgentBox {
    /// Open (or create) the session named by `options`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the session record cannot be written.
    pub async fn open(
        runtime: Arc<dyn Runtime>,
        store: Arc<dyn WorkspaceStore>,
        config: BoxConfig,
        options: SessionOptions,
    ) -> Result<Self> {
        let mut lifecycle = SessionLifecycle::new(Arc::clone(&store), options.auto_remove);
        lifecycle.open(options.session_id.as_deref()).await?;
        Ok(Self::assemble(runtime, store, config, lifecycle, options.reward_fn))
    }

    /// Reopen an existing session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if `session_id` is unknown.
    pub async fn reconnect(
        runtime: Arc<dyn Runtime>,
        store: Arc<dyn WorkspaceStore>,
        config: BoxConfig,
        session_id: &str,
        options: SessionOptions,
    ) -> Result<Self> {
        let lifecycle =
            SessionLifecycle::reconnect(Arc::clone(&store), session_id, options.auto_remove)
                .await?;
        Ok(Self::assemble(runtime, store, config, lifecycle, options.reward_fn))
    }

    fn assemble(
        runtime: Arc<dyn Runtime>,
        store: Arc<dyn WorkspaceStore>,
        config: BoxConfig,
        lifecycle: SessionLifecycle,
        reward_fn: Option<RewardFn>,
    ) -> Self {
        Self {
            runtime,
            store,
            config,
            lifecycle,
            process: None,
            last_diagnostics: String::new(),
            reward_fn,
        }
    }

    /// Identifier of the open session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` once the session is closed.
    pub fn session_id(&self) -> Result<&str> {
        self.lifecycle.session_id()
    }

    /// Whether the workspace survives close.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.lifecycle.record().is_some_and(SessionRecord::is_persistent)
    }

    /// Host path of the session workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` once the session is closed.
    pub fn workspace_path(&self) -> Result<PathBuf> {
        Ok(self.store.workspace_path(self.lifecycle.session_id()?))
    }

    /// Current session record.
    #[must_use]
    pub fn record(&self) -> Option<&SessionRecord> {
        self.lifecycle.record()
    }

    /// Diagnostic output of the current persistent process, or of the most
    /// recently finished process when none is running.
    #[must_use]
    pub fn diagnostics(&self) -> String {
        self.process
            .as_ref()
            .map_or_else(|| self.last_diagnostics.clone(), AgentProcess::diagnostics)
    }

    /// Run one turn on a fresh process that exits afterwards.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session is closed,
    /// `AppError::Runtime` if the process cannot be created, or
    /// `AppError::Protocol` if the prompt cannot be written.
    pub async fn code(&mut self, prompt: &str, options: &TurnOptions) -> Result<TurnResult> {
        let mut process = self.spawn(Some(options)).await?;
        let outcome = turn::run_turn(
            &mut process,
            prompt,
            &self.config.default_conversation_id,
            self.config.read_timeout(),
            None,
        )
        .await;

        let (exit_code, diagnostics) = self.reap(process).await;
        let outcome = outcome?;

        let result =
            turn::compose_exited_result(&outcome, exit_code, &diagnostics, self.config.exit_grace());
        self.finish(&outcome, result)
    }

    /// Run one turn on the persistent process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the session is closed,
    /// `AppError::Runtime` if the process cannot be created, or
    /// `AppError::Protocol` if the prompt cannot be written.
    pub async fn send(&mut self, prompt: &str) -> Result<TurnResult> {
        self.persistent_turn(prompt, None).await
    }

    /// Like [`send`](Self::send), also forwarding every dispatched frame to
    /// `frames` as it arrives.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn stream(&mut self, prompt: &str, frames: mpsc::Sender<Frame>) -> Result<TurnResult> {
        self.persistent_turn(prompt, Some(&frames)).await
    }

    async fn persistent_turn(
        &mut self,
        prompt: &str,
        observer: Option<&mpsc::Sender<Frame>>,
    ) -> Result<TurnResult> {
        self.ensure_active()?;
        let mut process = match self.process.take() {
            Some(process) if !process.is_exhausted() => process,
            Some(exited) => {
                self.reap(exited).await;
                self.spawn(None).await?
            }
            None => self.spawn(None).await?,
        };

        let correlation_id = self.lifecycle.conversation_id().to_owned();
        let outcome = turn::run_turn(
            &mut process,
            prompt,
            &correlation_id,
            self.config.read_timeout(),
            observer,
        )
        .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    session_id = %process.session_id(),
                    process_id = %process.process_id(),
                    %err,
                    "agent process unusable, reaping"
                );
                self.reap(process).await;
                return Err(err);
            }
        };

        if process.is_exhausted() {
            let (exit_code, diagnostics) = self.reap(process).await;
            let result = turn::compose_exited_result(
                &outcome,
                exit_code,
                &diagnostics,
                self.config.exit_grace(),
            );
            return self.finish(&outcome, result);
        }

        let result = turn::compose_result(&outcome, None, &process.diagnostics());
        self.process = Some(process);
        self.finish(&outcome, result)
    }

    /// Close the session: stop the persistent process, flush the record, and
    /// remove the workspace when auto-removal applies. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the record cannot be flushed or removed.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(process) = self.process.take() {
            self.reap(process).await;
        }
        self.lifecycle.close().await
    }

    async fn spawn(&mut self, options: Option<&TurnOptions>) -> Result<AgentProcess> {
        let session_id = self.lifecycle.session_id()?.to_owned();
        let spec = agent_command(
            &self.config.agent,
            self.store.workspace_path(&session_id),
            options,
        );

        let handle = self.runtime.create_process(&spec).await?;
        info!(session_id, process_id = %handle.id(), program = %spec.program, "agent process started");
        self.lifecycle.record_backing_process(handle.id())?;
        AgentProcess::attach(&session_id, handle)
    }

    async fn reap(&mut self, process: AgentProcess) -> (Option<i32>, String) {
        let (exit_code, diagnostics) = process.shutdown(self.config.exit_grace()).await;
        self.last_diagnostics.clone_from(&diagnostics);
        (exit_code, diagnostics)
    }

    /// Record the conversation id the turn reported and score the result.
    fn finish(&mut self, outcome: &TurnOutcome, result: TurnResult) -> Result<TurnResult> {
        if let Some(conversation_id) = &outcome.conversation_id {
            self.lifecycle.observe_conversation_id(conversation_id)?;
        }

        Ok(match &self.reward_fn {
            Some(reward_fn) => {
                let reward = reward_fn(&result);
                result.with_reward(reward)
            }
            None => result,
        })
    }

    fn ensure_active(&self) -> Result<()> {
        if self.lifecycle.state() == LifecycleState::Active {
            Ok(())
        } else {
            Err(AppError::InvalidState("session is not open".into()))
        }
    }
}

impl fmt::Debug for AgentBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBox")
            .field("lifecycle", &self.lifecycle)
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}
