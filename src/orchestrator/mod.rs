//! Session orchestration.
//!
//! Covers backing-process management, the turn controller, diagnostic
//! draining, and session lifecycle, tied together by [`agent_box::AgentBox`].

pub mod agent_box;
pub mod diagnostics;
pub mod process;
pub mod session_manager;
pub mod turn;
