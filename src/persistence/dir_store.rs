//! Directory-backed workspace store.
//!
//! Layout under the configured root:
//!
//! ```text
//! {root}/sessions/{id}/workspace/          mounted into the sandbox
//! {root}/sessions/{id}/.meta/session.json  serialised SessionRecord
//! ```
//!
//! Records are written to a temporary file and renamed into place so a crash
//! mid-write never leaves a truncated `session.json`.

use std::io::ErrorKind;
use std::path::PathBuf;

use futures_util::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};

use super::WorkspaceStore;
use crate::models::session::{SessionRecord, SessionStatus};
use crate::{AppError, Result};

const SESSIONS_DIR: &str = "sessions";
const WORKSPACE_DIR: &str = "workspace";
const META_DIR: &str = ".meta";
const META_FILE: &str = "session.json";

/// [`WorkspaceStore`] keeping sessions as directories under a root.
#[derive(Debug, Clone)]
pub struct DirWorkspaceStore {
    root: PathBuf,
}

impl DirWorkspaceStore {
    /// Create a store rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.sessions_dir().join(id)
    }

    fn meta_file(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(META_DIR).join(META_FILE)
    }

    async fn exists_inner(&self, id: &str) -> Result<bool> {
        validate_session_id(id)?;
        tokio::fs::try_exists(self.meta_file(id))
            .await
            .map_err(|e| AppError::Store(format!("failed to stat session {id}: {e}")))
    }

    async fn create_inner(&self, record: &SessionRecord) -> Result<SessionRecord> {
        validate_session_id(&record.id)?;
        let session_dir = self.session_dir(&record.id);
        for dir in [session_dir.join(WORKSPACE_DIR), session_dir.join(META_DIR)] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| AppError::Store(format!("failed to create {}: {e}", dir.display())))?;
        }
        self.write_record(record).await?;
        debug!(session_id = %record.id, "workspace created");
        Ok(record.clone())
    }

    async fn load_inner(&self, id: &str) -> Result<SessionRecord> {
        validate_session_id(id)?;
        let path = self.meta_file(id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::SessionNotFound(id.to_owned()));
            }
            Err(e) => {
                return Err(AppError::Store(format!("failed to read {}: {e}", path.display())));
            }
        };
        serde_json::from_str(&raw)
            .map_err(|e| AppError::Store(format!("corrupt session record {id}: {e}")))
    }

    async fn update_inner(&self, record: &SessionRecord) -> Result<()> {
        if !self.exists_inner(&record.id).await? {
            return Err(AppError::SessionNotFound(record.id.clone()));
        }
        self.write_record(record).await
    }

    async fn remove_inner(&self, id: &str, remove_data: bool) -> Result<()> {
        if !self.exists_inner(id).await? {
            return Err(AppError::SessionNotFound(id.to_owned()));
        }

        if remove_data {
            let dir = self.session_dir(id);
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| AppError::Store(format!("failed to remove {}: {e}", dir.display())))?;
            debug!(session_id = id, "workspace removed");
            return Ok(());
        }

        let mut record = self.load_inner(id).await?;
        record.transition(SessionStatus::Closed);
        record.backing_process_id = None;
        self.write_record(&record).await
    }

    async fn list_inner(&self) -> Result<Vec<SessionRecord>> {
        let mut entries = match tokio::fs::read_dir(self.sessions_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Store(format!("failed to list sessions: {e}"))),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Store(format!("failed to list sessions: {e}")))?
        {
            let Some(id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            match self.load_inner(&id).await {
                Ok(record) => records.push(record),
                Err(AppError::SessionNotFound(_)) => {}
                Err(err) => warn!(session_id = %id, %err, "skipping unreadable session record"),
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn write_record(&self, record: &SessionRecord) -> Result<()> {
        let path = self.meta_file(&record.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| AppError::Store(format!("failed to serialise session record: {e}")))?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| AppError::Store(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AppError::Store(format!("failed to write {}: {e}", path.display())))
    }
}

impl WorkspaceStore for DirWorkspaceStore {
    fn exists<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>> {
        self.exists_inner(id).boxed()
    }

    fn create<'a>(&'a self, record: &'a SessionRecord) -> BoxFuture<'a, Result<SessionRecord>> {
        self.create_inner(record).boxed()
    }

    fn load<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<SessionRecord>> {
        self.load_inner(id).boxed()
    }

    fn update<'a>(&'a self, record: &'a SessionRecord) -> BoxFuture<'a, Result<()>> {
        self.update_inner(record).boxed()
    }

    fn remove<'a>(&'a self, id: &'a str, remove_data: bool) -> BoxFuture<'a, Result<()>> {
        self.remove_inner(id, remove_data).boxed()
    }

    fn list_all(&self) -> BoxFuture<'_, Result<Vec<SessionRecord>>> {
        self.list_inner().boxed()
    }

    fn workspace_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(WORKSPACE_DIR)
    }
}

/// Reject identifiers that are not a single, plain path component.
fn validate_session_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0'])
        && !id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(AppError::Store(format!("invalid session id: {id:?}")))
    }
}
