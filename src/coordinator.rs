//!
//! coordinator.rs
//! 2PC coordinator: issues VoteRequests, aggregates votes, decides
//! commit/abort, answers the termination protocol, and recovers with a
//! presumed-abort posture after a crash.
//!

use std::collections::HashMap;

use log::{debug, info};

use crate::message::{Message, NodeId, VoteId};
use crate::node::NodeCore;
use crate::oplog::{LogEvent, OpLog};
use crate::task::{Task, VoteResponse};

/// One outstanding transaction's in-flight vote tally. `None` means "not
/// yet heard from that participant"; a map keyed by node id stands in for
/// a fixed `-1`-sentineled vector, since participants are wired in
/// incrementally after the coordinator starts.
struct Ballot {
    votes: HashMap<NodeId, Option<u8>>,
    req_time: f64,
}

pub struct Coordinator {
    pub core: NodeCore,
    pub vote_responses: HashMap<VoteId, VoteResponse>,
    ballots: HashMap<VoteId, Ballot>,
}

impl Coordinator {
    pub fn new(
        log: OpLog,
        vote_responses: HashMap<VoteId, VoteResponse>,
        tasks: Vec<Task>,
        tick: f64,
        timeout: f64,
    ) -> Self {
        let mut core = NodeCore::new(crate::message::COORDINATOR_ID, log, tick, timeout);
        core.tasks = tasks;
        Coordinator { core, vote_responses, ballots: HashMap::new() }
    }

    /// `SendVoteRequest(vote_id)` task fires: log `start`, broadcast, and
    /// seed the ballot with every known peer missing except our own
    /// pre-declared vote.
    fn send_vote_request(&mut self, vote_id: VoteId) {
        self.core.append_log(vote_id, LogEvent::Start);
        self.core.broadcast(|_peer| Message::VoteRequest { vote_id });

        let peers: Vec<NodeId> = self.core.out_edges.lock().unwrap().keys().copied().collect();
        let mut votes: HashMap<NodeId, Option<u8>> = peers.into_iter().map(|p| (p, None)).collect();
        let own = self.vote_responses.get(&vote_id).map(|r| r.vote).unwrap_or(1);
        votes.insert(self.core.id, Some(own));

        self.ballots.insert(vote_id, Ballot { votes, req_time: self.core.now() });
        info!("coordinator issues VoteRequest for transaction {}", vote_id);
    }

    fn on_vote(&mut self, from: NodeId, vote_id: VoteId, vote: u8) {
        match self.ballots.get_mut(&vote_id) {
            Some(ballot) => {
                ballot.votes.insert(from, Some(vote));
                debug!("coordinator records vote {} from node {} for transaction {}", vote, from, vote_id);
            }
            None => {
                debug!("coordinator ignores vote for unknown or already-decided transaction {}", vote_id);
            }
        }
    }

    /// Decision rule, evaluated once per tick per outstanding ballot.
    fn decide(&mut self, vote_id: VoteId) -> Option<bool> {
        let timeout = self.core.timeout;
        let now = self.core.now();
        let ballot = self.ballots.get(&vote_id)?;

        if ballot.votes.values().any(|v| *v == Some(0)) {
            return Some(false);
        }
        if ballot.votes.values().all(|v| v.is_some()) {
            return Some(ballot.votes.values().all(|v| *v == Some(1)));
        }
        if now > ballot.req_time + timeout {
            return Some(false);
        }
        None
    }

    fn broadcast_decision(&mut self, vote_id: VoteId, commit: bool) {
        let event = if commit { LogEvent::Commit } else { LogEvent::Abort };
        self.core.append_log(vote_id, event);
        if commit {
            self.core.broadcast(|_peer| Message::Commit { vote_id });
            info!("coordinator commits transaction {}", vote_id);
        } else {
            self.core.broadcast(|_peer| Message::Abort { vote_id });
            info!("coordinator aborts transaction {}", vote_id);
        }
        self.ballots.remove(&vote_id);
    }

    /// Answers authoritatively only if a terminal decision for `vote_id`
    /// is already durable; otherwise the coordinator will eventually
    /// decide and broadcast on its own.
    fn on_decision_req(&mut self, vote_id: VoteId, from: NodeId) {
        let records = match self.core.log.read_all() {
            Ok(r) => r,
            Err(e) => {
                debug!("coordinator: could not consult log answering DecisionReq({}): {}", vote_id, e);
                return;
            }
        };
        let terminal = records
            .into_iter()
            .filter(|r| r.vote_id == vote_id && r.event.is_terminal())
            .last();
        match terminal {
            Some(r) if r.event == LogEvent::Commit => self.core.send_to(from, Message::Commit { vote_id }),
            Some(r) if r.event == LogEvent::Abort => self.core.send_to(from, Message::Abort { vote_id }),
            _ => debug!("coordinator: no terminal decision yet for {}, ignoring DecisionReq", vote_id),
        }
    }

    fn dispatch(&mut self, msg: Message) {
        match msg {
            Message::Vote { from, vote_id, vote } => self.on_vote(from, vote_id, vote),
            Message::DecisionReq { vote_id, from } => self.on_decision_req(vote_id, from),
            Message::VoteRequest { vote_id } => {
                debug!("coordinator ignores stray VoteRequest for {}", vote_id);
            }
            Message::Commit { vote_id } | Message::Abort { vote_id } => {
                debug!("coordinator ignores stray decision message for {}", vote_id);
            }
        }
    }

    fn advance_ballots(&mut self) {
        let vote_ids: Vec<VoteId> = self.ballots.keys().copied().collect();
        for vote_id in vote_ids {
            if let Some(commit) = self.decide(vote_id) {
                self.broadcast_decision(vote_id, commit);
            }
        }
    }

    /// Recovery as coordinator, presumed-abort posture: any transaction
    /// whose latest record is `start` with no terminal decision is
    /// unilaterally aborted and the abort is broadcast.
    pub fn recover(&mut self) {
        if !self.core.log.exists() {
            return;
        }
        let records = match self.core.log.read_all() {
            Ok(r) => r,
            Err(e) => {
                log::error!("coordinator: recovery aborted, log is corrupt: {}", e);
                return;
            }
        };

        let mut latest: HashMap<VoteId, LogEvent> = HashMap::new();
        for r in &records {
            if matches!(r.event, LogEvent::Start | LogEvent::Commit | LogEvent::Abort) {
                latest.insert(r.vote_id, r.event);
            }
        }

        self.ballots.clear();
        for (&vote_id, &event) in latest.iter() {
            if event == LogEvent::Start {
                info!("coordinator presumes abort for uncommitted transaction {} after restart", vote_id);
                self.core.append_log(vote_id, LogEvent::Abort);
                self.core.broadcast(|_peer| Message::Abort { vote_id });
            }
        }
    }

    fn exec_task(&mut self, task: Task) {
        match task {
            Task::SendVoteRequest { vote_id, .. } => self.send_vote_request(vote_id),
            Task::KillSelf { .. } => {
                info!("coordinator: killed");
                self.core.kill();
            }
            Task::ResumeSelf { .. } => {
                info!("coordinator: resumed");
                self.core.resume();
                self.recover();
            }
        }
    }

    /// Per-tick event loop. The coordinator's decision broadcast is
    /// emitted inline from `advance_ballots`, never deferred through
    /// `message_to_send`, so `drain_deferred_sends` here only ever
    /// flushes entries a future extension might stage that way.
    pub fn run(&mut self) {
        loop {
            if !self.core.is_killed() {
                let mut inbound = Vec::new();
                self.core.drain_inbound(|m| inbound.push(m));
                for m in inbound {
                    self.dispatch(m);
                }
                self.advance_ballots();
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
    }
}
