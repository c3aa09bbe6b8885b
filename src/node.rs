//!
//! node.rs
//! Fields and mechanics common to both coordinator and participant event
//! loops: the per-node clock, durable log handle, channel endpoints,
//! deferred-send slot, task queue, and kill/stop flags.
//!

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::{InEdge, OutEdge};
use crate::clock::Clock;
use crate::message::{Message, NodeId, VoteId, COORDINATOR_ID};
use crate::oplog::{LogEvent, OpLog};
use crate::task::Task;

pub const DEFAULT_TICK_SECS: f64 = 0.001;
pub const DEFAULT_TIMEOUT_SECS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteStatus {
    Requested,
    Pending,
    Commit,
    Abort,
}

pub type OutEdges = Arc<Mutex<HashMap<NodeId, OutEdge>>>;
pub type InEdges = Arc<Mutex<HashMap<NodeId, InEdge>>>;

pub struct NodeCore {
    pub id: NodeId,
    pub clock: Clock,
    pub log: OpLog,
    pub out_edges: OutEdges,
    pub in_edges: InEdges,
    pub vote_status: HashMap<VoteId, VoteStatus>,
    pub message_to_send: HashMap<VoteId, (Message, f64)>,
    pub pending_times: HashMap<VoteId, f64>,
    pub tasks: Vec<Task>,
    pub killed: Arc<AtomicBool>,
    pub stop: Arc<AtomicBool>,
    pub timeout: f64,
    pub tick: f64,
}

impl NodeCore {
    pub fn new(id: NodeId, log: OpLog, tick: f64, timeout: f64) -> Self {
        NodeCore {
            id,
            clock: Clock::new(),
            log,
            out_edges: Arc::new(Mutex::new(HashMap::new())),
            in_edges: Arc::new(Mutex::new(HashMap::new())),
            vote_status: HashMap::new(),
            message_to_send: HashMap::new(),
            pending_times: HashMap::new(),
            tasks: Vec::new(),
            killed: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            timeout,
            tick,
        }
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.killed.store(false, Ordering::SeqCst);
    }

    /// Step 1: drain at most one due message per inbound peer.
    pub fn drain_inbound(&self, mut on_message: impl FnMut(Message)) {
        let now = self.now();
        let edges = self.in_edges.lock().unwrap();
        for edge in edges.values() {
            if let Some(msg) = edge.recv(self.id, now) {
                on_message(msg);
            }
        }
    }

    /// Broadcasts a message, built per-peer, to every outbound edge.
    pub fn broadcast(&self, mut msg_for: impl FnMut(NodeId) -> Message) {
        let now = self.now();
        let edges = self.out_edges.lock().unwrap();
        for (&peer, edge) in edges.iter() {
            edge.send(self.id, now, msg_for(peer));
        }
    }

    pub fn send_to(&self, peer: NodeId, msg: Message) {
        let now = self.now();
        let edges = self.out_edges.lock().unwrap();
        if let Some(edge) = edges.get(&peer) {
            edge.send(self.id, now, msg);
        }
    }

    /// Step 3: emit deferred `message_to_send` entries whose time has
    /// come, always addressed to the coordinator. If killed, every
    /// pending entry is dropped instead, modeling a crash.
    pub fn drain_deferred_sends(&mut self) {
        let now = self.now();
        let killed = self.is_killed();
        let due: Vec<VoteId> = self
            .message_to_send
            .iter()
            .filter(|(_, (_, earliest))| killed || now >= *earliest)
            .map(|(vote_id, _)| *vote_id)
            .collect();
        for vote_id in due {
            if let Some((msg, earliest)) = self.message_to_send.remove(&vote_id) {
                if !killed && now >= earliest {
                    self.send_to(COORDINATOR_ID, msg);
                }
            }
        }
    }

    /// Step 4: fire any tasks whose time has elapsed, first-due-first,
    /// removing each as it fires.
    pub fn drain_tasks(&mut self, mut exec: impl FnMut(&Task)) {
        let now = self.clock.now();
        let mut i = 0;
        while i < self.tasks.len() {
            if now >= self.tasks[i].time_to_execute() {
                let task = self.tasks.remove(i);
                exec(&task);
            } else {
                i += 1;
            }
        }
    }

    /// Best-effort durable write; a failed append is logged, not
    /// propagated; the only log condition treated as fatal is corruption
    /// discovered while *reading* during recovery.
    pub fn append_log(&self, vote_id: VoteId, event: LogEvent) {
        if let Err(e) = self.log.append(self.now(), vote_id, event) {
            log::error!("node {}: failed to append log record: {}", self.id, e);
        }
    }

    pub fn sleep_tick(&self) {
        std::thread::sleep(std::time::Duration::from_secs_f64(self.tick));
    }
}
