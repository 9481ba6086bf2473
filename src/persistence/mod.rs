//! Workspace store abstraction.
//!
//! Session metadata and the workspace directory mounted into the sandbox
//! live outside the session engine. [`WorkspaceStore`] is the seam; the
//! [`dir_store::DirWorkspaceStore`] implementation keeps everything under a
//! root directory on the host.

pub mod dir_store;

use std::path::PathBuf;

use futures_util::future::BoxFuture;

use crate::models::session::SessionRecord;
use crate::Result;

/// Persistence for session records and their workspaces.
pub trait WorkspaceStore: Send + Sync {
    /// Whether a record exists for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`](crate::AppError::Store) if the check fails.
    fn exists<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Create the workspace for `record.id` and persist `record`.
    ///
    /// An existing record with the same id is overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`](crate::AppError::Store) on write failure.
    fn create<'a>(&'a self, record: &'a SessionRecord) -> BoxFuture<'a, Result<SessionRecord>>;

    /// Load the record for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionNotFound`](crate::AppError::SessionNotFound)
    /// if no record exists, or [`AppError::Store`](crate::AppError::Store) if
    /// it cannot be read.
    fn load<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<SessionRecord>>;

    /// Overwrite the stored record for `record.id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionNotFound`](crate::AppError::SessionNotFound)
    /// if no record exists, or [`AppError::Store`](crate::AppError::Store) on
    /// write failure.
    fn update<'a>(&'a self, record: &'a SessionRecord) -> BoxFuture<'a, Result<()>>;

    /// Remove the session. With `remove_data` the workspace is deleted and
    /// `exists(id)` becomes false; without it the data is kept and the
    /// record is marked closed and detached from its backing process.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionNotFound`](crate::AppError::SessionNotFound)
    /// if no record exists, or [`AppError::Store`](crate::AppError::Store) on
    /// failure.
    fn remove<'a>(&'a self, id: &'a str, remove_data: bool) -> BoxFuture<'a, Result<()>>;

    /// List all stored records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`](crate::AppError::Store) if the listing fails.
    fn list_all(&self) -> BoxFuture<'_, Result<Vec<SessionRecord>>>;

    /// Host path of the workspace directory for `id`.
    fn workspace_path(&self, id: &str) -> PathBuf;
}
