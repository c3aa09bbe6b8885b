//!
//! task.rs
//! Time-triggered scripted events injected into a node, and the
//! per-vote_id vote response schedule participants answer from.
//!

use crate::message::VoteId;

/// Pre-declares how a participant will respond if and when asked to vote
/// on `vote_id`. A test hook: production participants would derive
/// `vote` from local transactional state instead.
#[derive(Debug, Clone, Copy)]
pub struct VoteResponse {
    pub vote: u8,
    pub delay: f64,
}

impl VoteResponse {
    pub fn new(vote: u8, delay: f64) -> Self {
        VoteResponse { vote, delay }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Task {
    /// Coordinator only.
    SendVoteRequest { vote_id: VoteId, time_to_execute: f64 },
    KillSelf { time_to_execute: f64 },
    ResumeSelf { time_to_execute: f64 },
}

impl Task {
    pub fn time_to_execute(&self) -> f64 {
        match *self {
            Task::SendVoteRequest { time_to_execute, .. } => time_to_execute,
            Task::KillSelf { time_to_execute } => time_to_execute,
            Task::ResumeSelf { time_to_execute } => time_to_execute,
        }
    }
}
