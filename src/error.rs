//!
//! error.rs
//! Crate-wide error type for the conditions treated as fatal: log parse
//! corruption and conflicting terminal decisions. Expected, non-fatal
//! conditions (link-failure drops, timeouts, unknown vote_id) are logged
//! through the `log` facade instead of surfaced here.
//!

use thiserror::Error;

use crate::message::VoteId;
use crate::oplog::LogEvent;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("log parse corruption in {path}: {detail}")]
    LogCorrupt { path: String, detail: String },

    #[error("conflicting terminal decisions for vote {vote_id}: {first:?} then {second:?}")]
    ConflictingDecision { vote_id: VoteId, first: LogEvent, second: LogEvent },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
