//! Session record model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conversation id used until the agent reports its own.
pub const DEFAULT_CONVERSATION_ID: &str = "default";

/// Prefix of generated ephemeral session identifiers.
pub const EPHEMERAL_PREFIX: &str = "ephemeral-";

/// Whether a session's workspace survives close.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// Workspace is removed automatically when the session closes.
    Ephemeral,
    /// Workspace survives close and can be reconnected later.
    Persistent,
}

/// Lifecycle status stored with the record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Record written but the session has not been activated.
    Created,
    /// Session open and able to run turns.
    Active,
    /// Session closed; a persistent record may be reopened.
    Closed,
}

/// Persisted metadata for one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SessionRecord {
    /// Unique session identifier; immutable after creation.
    pub id: String,
    /// Ephemeral or persistent.
    pub persistence: Persistence,
    /// Identifier of the backing process, once one has been created.
    #[serde(default)]
    pub backing_process_id: Option<String>,
    /// Last conversation id observed from the agent.
    #[serde(default = "default_conversation_id")]
    pub conversation_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last metadata update.
    pub updated_at: DateTime<Utc>,
}

fn default_conversation_id() -> String {
    DEFAULT_CONVERSATION_ID.to_owned()
}

impl SessionRecord {
    /// Construct a new record in the `Created` state.
    #[must_use]
    pub fn new(id: impl Into<String>, persistence: Persistence) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            persistence,
            backing_process_id: None,
            conversation_id: default_conversation_id(),
            status: SessionStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }

    /// Construct an ephemeral record with a generated `ephemeral-xxxxxxxx` id.
    #[must_use]
    pub fn ephemeral() -> Self {
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        Self::new(format!("{EPHEMERAL_PREFIX}{suffix}"), Persistence::Ephemeral)
    }

    /// Whether the workspace survives close.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.persistence == Persistence::Persistent
    }

    /// Determine whether a status transition is permitted.
    ///
    /// A closed record may be reactivated; that is how persistent sessions
    /// are reconnected.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self.status, next),
            (
                SessionStatus::Created | SessionStatus::Closed,
                SessionStatus::Active
            ) | (
                SessionStatus::Created | SessionStatus::Active,
                SessionStatus::Closed
            )
        )
    }

    /// Move to `next` and bump `updated_at` when the transition is permitted.
    ///
    /// Returns whether the transition happened.
    pub fn transition(&mut self, next: SessionStatus) -> bool {
        if !self.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }
}
