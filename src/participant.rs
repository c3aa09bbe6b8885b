//!
//! participant.rs
//! 2PC participant: prepare/vote, commit/abort on decision, the
//! termination protocol when uncertain, and recovery.
//!

use std::collections::HashMap;

use log::{debug, info, trace};

use crate::message::{Message, NodeId, VoteId};
use crate::node::{NodeCore, VoteStatus};
use crate::oplog::{LogEvent, OpLog};
use crate::task::{Task, VoteResponse};

pub struct Participant {
    pub core: NodeCore,
    pub vote_responses: HashMap<VoteId, VoteResponse>,
}

impl Participant {
    pub fn new(
        id: NodeId,
        log: OpLog,
        vote_responses: HashMap<VoteId, VoteResponse>,
        tasks: Vec<Task>,
        tick: f64,
        timeout: f64,
    ) -> Self {
        let mut core = NodeCore::new(id, log, tick, timeout);
        core.tasks = tasks;
        Participant { core, vote_responses }
    }

    /// VoteRequest(vote_id) received: durably log and move to `requested`.
    /// The actual vote happens next tick, in `prepare_vote`, so durable
    /// writes and suspensions stay uniformly serialized through step 2.
    /// A duplicate request for a vote_id already in flight, or already
    /// durably decided, is ignored rather than regressing the state
    /// machine back to `requested`.
    fn on_vote_request(&mut self, vote_id: VoteId) {
        if self.core.vote_status.contains_key(&vote_id) {
            debug!("node {}: ignoring duplicate VoteRequest for {} already in flight", self.core.id, vote_id);
            return;
        }
        if self.has_terminal_record(vote_id) {
            debug!("node {}: ignoring VoteRequest for {}, already decided", self.core.id, vote_id);
            return;
        }
        self.core.append_log(vote_id, LogEvent::Requested);
        self.core.vote_status.insert(vote_id, VoteStatus::Requested);
    }

    fn has_terminal_record(&self, vote_id: VoteId) -> bool {
        if !self.core.log.exists() {
            return false;
        }
        match self.core.log.read_all() {
            Ok(records) => records.iter().any(|r| r.vote_id == vote_id && r.event.is_terminal()),
            Err(e) => {
                debug!("node {}: could not consult log checking VoteRequest({}) for duplicate: {}", self.core.id, vote_id, e);
                false
            }
        }
    }

    fn prepare_vote(&mut self, vote_id: VoteId) {
        let response = match self.vote_responses.get(&vote_id) {
            Some(r) => *r,
            None => {
                debug!("node {}: no vote response registered for {}", self.core.id, vote_id);
                return;
            }
        };
        let now = self.core.now();
        let msg = Message::Vote { from: self.core.id, vote_id, vote: response.vote };
        self.core.message_to_send.insert(vote_id, (msg, now + response.delay));
        if response.vote == 1 {
            self.core.append_log(vote_id, LogEvent::Yes);
            self.core.vote_status.insert(vote_id, VoteStatus::Pending);
            self.core.pending_times.insert(vote_id, now);
            info!("node {} votes YES for transaction {}, changing status to pending", self.core.id, vote_id);
        } else {
            self.core.vote_status.insert(vote_id, VoteStatus::Abort);
            info!("node {} votes NO for transaction {}", self.core.id, vote_id);
        }
    }

    fn on_commit(&mut self, vote_id: VoteId) {
        if matches!(self.core.vote_status.get(&vote_id), Some(VoteStatus::Pending)) {
            self.core.vote_status.insert(vote_id, VoteStatus::Commit);
        } else {
            debug!("node {}: ignoring Commit({}) outside pending", self.core.id, vote_id);
        }
    }

    fn on_abort(&mut self, vote_id: VoteId) {
        if matches!(self.core.vote_status.get(&vote_id), Some(VoteStatus::Pending)) {
            self.core.vote_status.insert(vote_id, VoteStatus::Abort);
        } else {
            debug!("node {}: ignoring Abort({}) outside pending", self.core.id, vote_id);
        }
    }

    /// A fuller termination protocol would let any participant holding a
    /// terminal decision answer DecisionReq; today only the coordinator
    /// answers authoritatively (see design notes). The dispatch surface
    /// is left in place for that extension.
    fn on_decision_req(&mut self, vote_id: VoteId, from: NodeId) {
        let _ = (vote_id, from);
    }

    fn request_decision(&mut self, vote_id: VoteId) {
        info!("node {} timeout, initiating decision requests for transaction {}", self.core.id, vote_id);
        let id = self.core.id;
        self.core.broadcast(|_peer| Message::DecisionReq { vote_id, from: id });
        self.core.pending_times.insert(vote_id, self.core.now());
    }

    fn dispatch(&mut self, msg: Message) {
        match msg {
            Message::VoteRequest { vote_id } => self.on_vote_request(vote_id),
            Message::Commit { vote_id } => self.on_commit(vote_id),
            Message::Abort { vote_id } => self.on_abort(vote_id),
            Message::DecisionReq { vote_id, from } => self.on_decision_req(vote_id, from),
            Message::Vote { vote_id, .. } => {
                debug!("node {}: ignoring stray Vote for {} addressed to a participant", self.core.id, vote_id);
            }
        }
    }

    fn advance_vote_status(&mut self) {
        let now = self.core.now();
        let timeout = self.core.timeout;
        let snapshot: Vec<(VoteId, VoteStatus)> = self.core.vote_status.iter().map(|(k, v)| (*k, *v)).collect();
        for (vote_id, status) in snapshot {
            match status {
                VoteStatus::Requested => self.prepare_vote(vote_id),
                VoteStatus::Commit => {
                    self.core.append_log(vote_id, LogEvent::Commit);
                    info!("node {} commits transaction {}", self.core.id, vote_id);
                    self.core.vote_status.remove(&vote_id);
                }
                VoteStatus::Abort => {
                    self.core.append_log(vote_id, LogEvent::Abort);
                    info!("node {} aborts transaction {}", self.core.id, vote_id);
                    self.core.vote_status.remove(&vote_id);
                }
                VoteStatus::Pending => {
                    let started = *self.core.pending_times.get(&vote_id).unwrap_or(&now);
                    if now > started + timeout {
                        self.request_decision(vote_id);
                    }
                }
            }
        }
    }

    /// Recovery, run before entering the loop if a log file exists. A
    /// log already showing `start` belongs to a coordinator, never a
    /// participant.
    pub fn recover(&mut self) {
        if !self.core.log.exists() {
            return;
        }
        let records = match self.core.log.read_all() {
            Ok(r) => r,
            Err(e) => {
                log::error!("node {}: recovery aborted, log is corrupt: {}", self.core.id, e);
                return;
            }
        };
        if records.iter().any(|r| r.event == LogEvent::Start) {
            log::error!("node {}: log contains 'start' but this node is a participant", self.core.id);
            return;
        }

        let mut has_yes: HashMap<VoteId, bool> = HashMap::new();
        let mut last_status: HashMap<VoteId, LogEvent> = HashMap::new();
        for r in &records {
            match r.event {
                LogEvent::Yes => {
                    has_yes.insert(r.vote_id, true);
                }
                LogEvent::Requested | LogEvent::Commit | LogEvent::Abort => {
                    last_status.insert(r.vote_id, r.event);
                }
                LogEvent::Start => {}
            }
        }

        for (&vote_id, &status) in last_status.iter() {
            if status.is_terminal() {
                continue;
            }
            if *has_yes.get(&vote_id).unwrap_or(&false) {
                info!(
                    "node {}: recovering uncertain transaction {}, running termination protocol",
                    self.core.id, vote_id
                );
                // Restore the in-memory pending state so the eventual
                // Commit/Abort reply from the coordinator is accepted by
                // the normal handlers above, not ignored as out-of-state.
                self.core.vote_status.insert(vote_id, VoteStatus::Pending);
                self.core.pending_times.insert(vote_id, self.core.now());
                self.request_decision(vote_id);
            } else {
                let now = self.core.now();
                self.core.append_log(vote_id, LogEvent::Abort);
                info!("node {} aborts transaction {} (no yes durable)", self.core.id, vote_id);
                self.core.vote_status.remove(&vote_id);
                let delay = self.vote_responses.get(&vote_id).map(|r| r.delay).unwrap_or(0.0);
                if let Some(response) = self.vote_responses.get_mut(&vote_id) {
                    response.vote = 0;
                }
                let msg = Message::Vote { from: self.core.id, vote_id, vote: 0 };
                self.core.message_to_send.insert(vote_id, (msg, now + delay));
            }
        }
    }

    fn exec_task(&mut self, task: Task) {
        match task {
            Task::KillSelf { .. } => {
                info!("node {}: killed", self.core.id);
                self.core.kill();
            }
            Task::ResumeSelf { .. } => {
                info!("node {}: resumed", self.core.id);
                self.core.resume();
                self.recover();
            }
            Task::SendVoteRequest { .. } => {
                debug!("node {}: ignoring coordinator-only task on a participant", self.core.id);
            }
        }
    }

    /// Per-tick event loop: receive, advance, deferred sends, tasks.
    pub fn run(&mut self) {
        trace!("node {}: beginning protocol", self.core.id);
        loop {
            if !self.core.is_killed() {
                let mut inbound = Vec::new();
                self.core.drain_inbound(|m| inbound.push(m));
                for m in inbound {
                    self.dispatch(m);
                }
                self.advance_vote_status();
            }

            self.core.drain_deferred_sends();

            let mut due_tasks = Vec::new();
            self.core.drain_tasks(|t| due_tasks.push(*t));
            for task in due_tasks {
                self.exec_task(task);
            }

            self.core.sleep_tick();
            if self.core.is_stopped() {
                break;
            }
        }
        trace!("node {}: exiting", self.core.id);
    }
}
