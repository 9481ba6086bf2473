//! Outcome of one request/response exchange.

use serde::{Deserialize, Serialize};

/// Result of a single turn, owned by the caller once returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResult {
    /// `true` when the process did not fail and the agent reported no error.
    pub success: bool,
    /// Final response text.
    pub response: String,
    /// Exit code of the backing process; `None` while a persistent process
    /// is still running or when it did not exit within the grace period.
    pub exit_code: Option<i32>,
    /// Raw response output.
    pub raw_output: String,
    /// Error description for unsuccessful turns.
    pub error: Option<String>,
    /// Score assigned by the session's reward function.
    pub reward: Option<f64>,
    /// Cost reported by the terminal record.
    pub cost_usd: Option<f64>,
    /// Duration reported by the terminal record.
    pub duration_ms: Option<u64>,
    /// Last conversation id seen during the turn.
    pub conversation_id: Option<String>,
}

impl TurnResult {
    /// Attach a reward score.
    #[must_use]
    pub fn with_reward(mut self, reward: f64) -> Self {
        self.reward = Some(reward);
        self
    }
}
