//!
//! checker.rs
//! Post-mortem invariant checks over a completed run's log directory:
//! read every per-node log, group by vote_id, compare outcomes.
//!

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::SimError;
use crate::message::{NodeId, VoteId, COORDINATOR_ID};
use crate::oplog::{LogEvent, OpLog};

#[derive(Debug, Default)]
pub struct CheckReport {
    pub ok: bool,
    pub messages: Vec<String>,
}

impl CheckReport {
    fn fail(&mut self, msg: impl Into<String>) {
        self.ok = false;
        self.messages.push(msg.into());
    }
}

/// The last terminal (`commit`/`abort`) event recorded per vote_id in one
/// node's log, or `None` if that node never reached a decision for it.
fn latest_terminal_per_vote(log: &OpLog) -> Result<HashMap<VoteId, LogEvent>, SimError> {
    if !log.exists() {
        return Ok(HashMap::new());
    }
    let mut out = HashMap::new();
    for record in log.read_all()? {
        if record.event.is_terminal() {
            out.insert(record.vote_id, record.event);
        }
    }
    Ok(out)
}

fn has_yes(log: &OpLog, vote_id: VoteId) -> Result<bool, SimError> {
    if !log.exists() {
        return Ok(false);
    }
    Ok(log.read_all()?.iter().any(|r| r.vote_id == vote_id && r.event == LogEvent::Yes))
}

/// Checks agreement, validity, and monotone status over the log
/// directory left by a completed run with `num_participants` participants
/// (ids 1..=num_participants) plus the coordinator at id 0.
pub fn check_last_run(num_participants: usize, log_dir: &Path) -> Result<CheckReport, SimError> {
    let mut report = CheckReport { ok: true, messages: Vec::new() };

    let coordinator_log = OpLog::new(log_dir.join(COORDINATOR_ID.to_string()));
    let coordinator_decisions = latest_terminal_per_vote(&coordinator_log)?;

    let participant_ids: Vec<NodeId> = (1..=num_participants).collect();
    let mut participant_logs = HashMap::new();
    for &id in &participant_ids {
        participant_logs.insert(id, OpLog::new(log_dir.join(id.to_string())));
    }

    let mut all_vote_ids: HashSet<VoteId> = coordinator_decisions.keys().copied().collect();
    for log in participant_logs.values() {
        all_vote_ids.extend(latest_terminal_per_vote(log)?.keys().copied());
    }

    for &vote_id in &all_vote_ids {
        let mut decisions: HashSet<LogEvent> = HashSet::new();
        if let Some(&event) = coordinator_decisions.get(&vote_id) {
            decisions.insert(event);
        }
        for log in participant_logs.values() {
            if let Some(&event) = latest_terminal_per_vote(log)?.get(&vote_id) {
                decisions.insert(event);
            }
        }
        if decisions.len() > 1 {
            report.fail(format!("agreement violated for transaction {}: saw {:?}", vote_id, decisions));
        }

        // Validity: if ANY participant committed, every
        // participant must have durably voted yes for this vote_id, not
        // just the one that committed.
        if decisions.contains(&LogEvent::Commit) {
            for (&id, log) in &participant_logs {
                if !has_yes(log, vote_id)? {
                    report.fail(format!(
                        "validity violated: transaction {} committed but participant {} has no durable yes",
                        vote_id, id
                    ));
                }
            }
        }
    }

    for (&id, log) in &participant_logs {
        if !log.exists() {
            continue;
        }
        let records = log.read_all()?;
        let mut first_terminal: HashMap<VoteId, LogEvent> = HashMap::new();
        for r in records.iter().filter(|r| r.event.is_terminal()) {
            match first_terminal.get(&r.vote_id) {
                None => {
                    first_terminal.insert(r.vote_id, r.event);
                }
                Some(&prior) if prior != r.event => {
                    let err = SimError::ConflictingDecision { vote_id: r.vote_id, first: prior, second: r.event };
                    report.fail(format!("monotone status violated for participant {}: {}", id, err));
                }
                Some(_) => {}
            }
        }
    }

    Ok(report)
}
