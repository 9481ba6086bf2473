//! Host-process runtime.
//!
//! Spawns the agent CLI directly on the host with:
//! - `kill_on_drop(true)` so processes are cleaned up with their handle.
//! - `env_clear()` plus an allowlist so credentials of the calling process
//!   only reach the agent when explicitly passed through [`ProcessSpec::env`].
//! - piped stdin/stdout/stderr.

use futures_util::future::{BoxFuture, FutureExt};
use tokio::process::{Child, Command};
use tracing::info;

use super::{ProcessExit, ProcessHandle, ProcessSpec, Runtime};
use crate::{AppError, Result};

/// Environment variables inherited from the calling process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// [`Runtime`] that runs processes on the local host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRuntime;

impl LocalRuntime {
    /// Create a host runtime.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn spawn(spec: &ProcessSpec) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);

        // Strip inherited environment, then inject only the safe allowlist.
        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.envs(&spec.env);

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Runtime(format!("failed to spawn {}: {err}", spec.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Runtime("failed to capture process stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Runtime("failed to capture process stdout".into()))?;
        let stderr = child.stderr.take();

        let id = child
            .id()
            .map_or_else(|| "local-exited".to_owned(), |pid| format!("local-{pid}"));
        info!(process_id = %id, program = %spec.program, "spawned local agent process");

        Ok(ProcessHandle::new(
            id,
            Box::new(stdin),
            Box::new(stdout),
            stderr.map(|s| Box::new(s) as super::OutputStream),
            Box::new(ChildExit(child)),
        ))
    }
}

impl Runtime for LocalRuntime {
    fn create_process<'a>(&'a self, spec: &'a ProcessSpec) -> BoxFuture<'a, Result<ProcessHandle>> {
        Self::spawn(spec).boxed()
    }
}

/// Exit-status source backed by a tokio [`Child`].
struct ChildExit(Child);

impl ProcessExit for ChildExit {
    fn wait(&mut self) -> BoxFuture<'_, Result<i32>> {
        async move {
            let status = self
                .0
                .wait()
                .await
                .map_err(|err| AppError::Runtime(format!("failed to wait for process: {err}")))?;
            Ok(status.code().unwrap_or(-1))
        }
        .boxed()
    }
}
