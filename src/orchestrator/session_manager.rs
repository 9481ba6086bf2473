//! Session lifecycle management: open, reconnect, close, cleanup.
//!
//! [`SessionLifecycle`] is the only writer of a [`SessionRecord`]. It moves
//! through `Uninitialized → Active → Closed`; the record is written when the
//! session opens and flushed once more when it closes. Ephemeral sessions
//! remove their workspace on close unless told otherwise.

use std::sync::Arc;

use tracing::{info, info_span, instrument, warn, Instrument};

use crate::models::session::{
    Persistence, SessionRecord, SessionStatus, DEFAULT_CONVERSATION_ID,
};
use crate::persistence::WorkspaceStore;
use crate::{AppError, Result};

/// In-memory lifecycle state of a [`SessionLifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No record has been opened yet.
    Uninitialized,
    /// Record opened; turns may run.
    Active,
    /// Session closed; no further operations are accepted.
    Closed,
}

/// Owner of one session record and its transitions.
pub struct SessionLifecycle {
    store: Arc<dyn WorkspaceStore>,
    state: LifecycleState,
    record: Option<SessionRecord>,
    auto_remove: Option<bool>,
}

impl SessionLifecycle {
    /// A lifecycle that has not opened a session yet.
    ///
    /// `auto_remove` overrides whether the workspace is deleted on close;
    /// `None` deletes it only for ephemeral sessions.
    #[must_use]
    pub fn new(store: Arc<dyn WorkspaceStore>, auto_remove: Option<bool>) -> Self {
        Self {
            store,
            state: LifecycleState::Uninitialized,
            record: None,
            auto_remove,
        }
    }

    /// Reopen an existing session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if no record exists for `id`, or
    /// `AppError::Store` if the store fails.
    pub async fn reconnect(
        store: Arc<dyn WorkspaceStore>,
        id: &str,
        auto_remove: Option<bool>,
    ) -> Result<Self> {
        if !store.exists(id).await? {
            return Err(AppError::SessionNotFound(id.to_owned()));
        }
        let mut lifecycle = Self::new(store, auto_remove);
        lifecycle.open(Some(id)).await?;
        Ok(lifecycle)
    }

    /// Open a session and move to [`LifecycleState::Active`].
    ///
    /// - `Some(id)` naming a stored session reopens it.
    /// - `Some(id)` naming an unknown session creates a persistent one.
    /// - `None` creates an ephemeral session with a generated id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if this lifecycle was already opened,
    /// or `AppError::Store` if the store fails.
    pub async fn open(&mut self, id: Option<&str>) -> Result<&SessionRecord> {
        if self.state != LifecycleState::Uninitialized {
            return Err(AppError::InvalidState(format!(
                "session already {}",
                state_label(self.state)
            )));
        }

        let span = info_span!("open_session", session_id = id.unwrap_or("<ephemeral>"));
        let record = self.open_record(id).instrument(span).await?;

        self.state = LifecycleState::Active;
        Ok(self.record.insert(record))
    }

    async fn open_record(&self, id: Option<&str>) -> Result<SessionRecord> {
        let Some(id) = id else {
            let mut record = SessionRecord::ephemeral();
            record.transition(SessionStatus::Active);
            let record = self.store.create(&record).await?;
            info!(session_id = %record.id, "ephemeral session created");
            return Ok(record);
        };

        if self.store.exists(id).await? {
            let mut record = self.store.load(id).await?;
            if !record.transition(SessionStatus::Active) {
                warn!(session_id = id, status = ?record.status, "session was not closed cleanly, reopening");
                record.backing_process_id = None;
            }
            self.store.update(&record).await?;
            info!(
                session_id = id,
                conversation_id = %record.conversation_id,
                "session reconnected"
            );
            return Ok(record);
        }

        let mut record = SessionRecord::new(id, Persistence::Persistent);
        record.transition(SessionStatus::Active);
        let record = self.store.create(&record).await?;
        info!(session_id = id, "persistent session created");
        Ok(record)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The session record, once opened.
    #[must_use]
    pub fn record(&self) -> Option<&SessionRecord> {
        self.record.as_ref()
    }

    /// Identifier of the open session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` unless the session is active.
    pub fn session_id(&self) -> Result<&str> {
        self.active_record().map(|record| record.id.as_str())
    }

    /// Conversation id to send with the next request.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        self.record
            .as_ref()
            .map_or(DEFAULT_CONVERSATION_ID, |record| record.conversation_id.as_str())
    }

    /// Whether closing will delete the workspace.
    #[must_use]
    pub fn removes_on_close(&self) -> bool {
        let ephemeral = self.record.as_ref().is_some_and(|r| !r.is_persistent());
        self.auto_remove.unwrap_or(ephemeral)
    }

    /// Remember the backing process serving this session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` unless the session is active.
    pub fn record_backing_process(&mut self, process_id: &str) -> Result<()> {
        let record = self.active_record_mut()?;
        record.backing_process_id = Some(process_id.to_owned());
        Ok(())
    }

    /// Store a conversation id reported by the agent. Empty ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` unless the session is active.
    pub fn observe_conversation_id(&mut self, conversation_id: &str) -> Result<()> {
        if conversation_id.is_empty() {
            return Ok(());
        }
        self.active_record_mut()?.conversation_id = conversation_id.to_owned();
        Ok(())
    }

    /// Close the session: flush the record, then remove the workspace when
    /// auto-removal applies.
    ///
    /// A second call, or a call on a never-opened lifecycle, does nothing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if flushing or removal fails. The lifecycle
    /// is closed regardless.
    pub async fn close(&mut self) -> Result<()> {
        if self.state != LifecycleState::Active {
            return Ok(());
        }
        self.state = LifecycleState::Closed;

        let remove = self.removes_on_close();
        let Some(record) = self.record.as_mut() else {
            return Ok(());
        };
        record.transition(SessionStatus::Closed);
        record.backing_process_id = None;

        let span = info_span!("close_session", session_id = %record.id);
        flush_and_remove(self.store.as_ref(), record, remove)
            .instrument(span)
            .await
    }

    fn active_record(&self) -> Result<&SessionRecord> {
        match (self.state, self.record.as_ref()) {
            (LifecycleState::Active, Some(record)) => Ok(record),
            (state, _) => Err(AppError::InvalidState(format!(
                "session is {}",
                state_label(state)
            ))),
        }
    }

    fn active_record_mut(&mut self) -> Result<&mut SessionRecord> {
        match (self.state, self.record.as_mut()) {
            (LifecycleState::Active, Some(record)) => Ok(record),
            (state, _) => Err(AppError::InvalidState(format!(
                "session is {}",
                state_label(state)
            ))),
        }
    }
}

impl std::fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("state", &self.state)
            .field("record", &self.record)
            .field("auto_remove", &self.auto_remove)
            .finish_non_exhaustive()
    }
}

fn state_label(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::Uninitialized => "not open",
        LifecycleState::Active => "open",
        LifecycleState::Closed => "closed",
    }
}

/// List every stored session, oldest first.
///
/// # Errors
///
/// Returns `AppError::Store` if the listing fails.
pub async fn list_sessions(store: &dyn WorkspaceStore) -> Result<Vec<SessionRecord>> {
    store.list_all().await
}

/// Remove a stored session outside of any open lifecycle.
///
/// With `remove_data` the workspace is deleted; otherwise the record is
/// kept and marked closed.
///
/// # Errors
///
/// Returns `AppError::SessionNotFound` if `id` is unknown, or
/// `AppError::Store` if removal fails.
#[instrument(skip(store))]
pub async fn cleanup_session(store: &dyn WorkspaceStore, id: &str, remove_data: bool) -> Result<()> {
    if !store.exists(id).await? {
        return Err(AppError::SessionNotFound(id.to_owned()));
    }
    store.remove(id, remove_data).await?;
    info!("session cleaned up");
    Ok(())
}

async fn flush_and_remove(store: &dyn WorkspaceStore, record: &SessionRecord, remove: bool) -> Result<()> {
    store.update(record).await?;
    if remove {
        store.remove(&record.id, true).await?;
        info!("session closed, workspace removed");
    } else {
        info!(conversation_id = %record.conversation_id, "session closed, workspace kept");
    }
    Ok(())
}
