//!
//! scenario.rs
//! The driver surface: `create_node`, `link_failure`, `network_partition`,
//! and `stop`. An external collaborator, not part of the core protocol,
//! but still needed to wire and drive it for tests and the built-in demo.
//!

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::channel::{new_edge, FailureWindow};
use crate::coordinator::Coordinator;
use crate::message::{NodeId, VoteId, COORDINATOR_ID};
use crate::node::{InEdges, OutEdges};
use crate::oplog::OpLog;
use crate::participant::Participant;
use crate::task::{Task, VoteResponse};

struct NodeHandle {
    out_edges: OutEdges,
    in_edges: InEdges,
    killed: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

/// Owns the shared edge registries and running threads for one
/// simulation run, and exposes the four driver operations the scenario
/// script calls.
pub struct Simulation {
    log_dir: PathBuf,
    tick: f64,
    timeout: f64,
    nodes: HashMap<NodeId, NodeHandle>,
}

impl Simulation {
    pub fn new<P: Into<PathBuf>>(log_dir: P, tick: f64, timeout: f64) -> Self {
        Simulation { log_dir: log_dir.into(), tick, timeout, nodes: HashMap::new() }
    }

    fn log_path(&self, id: NodeId) -> PathBuf {
        self.log_dir.join(id.to_string())
    }

    /// Wires a fresh pair of directed edges between the new node `id` and
    /// every node already in the registry, inserting into both sides'
    /// shared `Arc<Mutex<_>>` maps even though the existing node's loop
    /// may already be running on its own thread.
    fn wire_new_node(&self, id: NodeId, out_edges: &OutEdges, in_edges: &InEdges) {
        for (&other, handle) in self.nodes.iter() {
            let (out_to_other, in_from_new) = new_edge(id, other);
            let (out_to_new, in_from_other) = new_edge(other, id);

            out_edges.lock().unwrap().insert(other, out_to_other);
            in_edges.lock().unwrap().insert(other, in_from_other);

            handle.out_edges.lock().unwrap().insert(id, out_to_new);
            handle.in_edges.lock().unwrap().insert(id, in_from_new);
        }
    }

    pub fn create_coordinator(
        &mut self,
        vote_responses: HashMap<VoteId, VoteResponse>,
        tasks: Vec<Task>,
    ) {
        let log = OpLog::new(self.log_path(COORDINATOR_ID));
        let mut coordinator = Coordinator::new(log, vote_responses, tasks, self.tick, self.timeout);
        self.wire_new_node(COORDINATOR_ID, &coordinator.core.out_edges, &coordinator.core.in_edges);

        let killed = coordinator.core.killed.clone();
        let stop = coordinator.core.stop.clone();
        let out_edges = coordinator.core.out_edges.clone();
        let in_edges = coordinator.core.in_edges.clone();

        coordinator.recover();
        let join = std::thread::spawn(move || coordinator.run());

        self.nodes.insert(
            COORDINATOR_ID,
            NodeHandle { out_edges, in_edges, killed, stop, join: Some(join) },
        );
    }

    pub fn create_participant(
        &mut self,
        id: NodeId,
        vote_responses: HashMap<VoteId, VoteResponse>,
        tasks: Vec<Task>,
    ) {
        assert!(id != COORDINATOR_ID, "participant id {} collides with the coordinator", id);

        let log = OpLog::new(self.log_path(id));
        let mut participant = Participant::new(id, log, vote_responses, tasks, self.tick, self.timeout);
        self.wire_new_node(id, &participant.core.out_edges, &participant.core.in_edges);

        let killed = participant.core.killed.clone();
        let stop = participant.core.stop.clone();
        let out_edges = participant.core.out_edges.clone();
        let in_edges = participant.core.in_edges.clone();

        participant.recover();
        let join = std::thread::spawn(move || participant.run());

        self.nodes.insert(id, NodeHandle { out_edges, in_edges, killed, stop, join: Some(join) });
    }

    /// Installs one directed failure interval on the producer (`from`'s
    /// out-edge to `to`) and consumer (`to`'s in-edge from `from`) ends.
    pub fn link_failure(&mut self, from: NodeId, to: NodeId, start: f64, end: f64) {
        let window = FailureWindow { start, end };
        if let Some(handle) = self.nodes.get(&from) {
            if let Some(edge) = handle.out_edges.lock().unwrap().get_mut(&to) {
                edge.add_failure(window);
            }
        }
        if let Some(handle) = self.nodes.get(&to) {
            if let Some(edge) = handle.in_edges.lock().unwrap().get_mut(&from) {
                edge.add_failure(window);
            }
        }
    }

    /// A partition between two groups: link failure on every ordered
    /// cross-group pair, in both directions.
    pub fn network_partition(&mut self, group_a: &[NodeId], group_b: &[NodeId], start: f64, end: f64) {
        for &a in group_a {
            for &b in group_b {
                self.link_failure(a, b, start, end);
                self.link_failure(b, a, start, end);
            }
        }
    }

    /// Stops every node's loop at its next tick boundary and joins all
    /// threads before returning.
    pub fn stop(&mut self) {
        for handle in self.nodes.values() {
            handle.stop.store(true, Ordering::SeqCst);
        }
        for (_, mut handle) in self.nodes.drain() {
            if let Some(join) = handle.join.take() {
                let _ = join.join();
            }
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        if !self.nodes.is_empty() {
            self.stop();
        }
    }
}
