//!
//! channel.rs
//! Per-directed-edge FIFO queues with time-windowed failures.
//! Ownership: each queue is producer-only at one endpoint, consumer-only
//! at the other. A thread-safe std::sync::mpsc channel is the SPSC
//! primitive; the failure-interval lists live alongside each endpoint.
//!

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use log::info;

use crate::message::{Message, NodeId};

#[derive(Debug, Clone, Copy)]
pub struct FailureWindow {
    pub start: f64,
    pub end: f64,
}

impl FailureWindow {
    pub fn contains(&self, now: f64) -> bool {
        now >= self.start && now <= self.end
    }
}

/// Producer-only endpoint of a single directed edge.
pub struct OutEdge {
    peer: NodeId,
    sender: Sender<Message>,
    failures: Vec<FailureWindow>,
}

impl OutEdge {
    fn new(peer: NodeId, sender: Sender<Message>) -> Self {
        OutEdge { peer, sender, failures: Vec::new() }
    }

    pub fn add_failure(&mut self, window: FailureWindow) {
        self.failures.push(window);
    }

    /// Enqueues `msg` unless, at `now`, some interval in this edge's
    /// failure list contains it — then the message is dropped silently.
    pub fn send(&self, self_id: NodeId, now: f64, msg: Message) {
        if self.failures.iter().any(|w| w.contains(now)) {
            info!(
                "message lost: {:?} from node {} to {} discarded due to link failure",
                msg, self_id, self.peer
            );
            return;
        }
        // A disconnected receiver just means the peer has already shut
        // down; that is indistinguishable from a link failure here.
        let _ = self.sender.send(msg);
    }
}

/// Consumer-only endpoint of a single directed edge.
pub struct InEdge {
    peer: NodeId,
    receiver: Receiver<Message>,
    failures: Vec<FailureWindow>,
}

impl InEdge {
    fn new(peer: NodeId, receiver: Receiver<Message>) -> Self {
        InEdge { peer, receiver, failures: Vec::new() }
    }

    pub fn add_failure(&mut self, window: FailureWindow) {
        self.failures.push(window);
    }

    /// Non-blocking receive. Inside a failure window every queued message
    /// from this peer is purged and `None` is returned; otherwise at most
    /// one message is dequeued.
    pub fn recv(&self, self_id: NodeId, now: f64) -> Option<Message> {
        if self.failures.iter().any(|w| w.contains(now)) {
            let mut purged = 0u32;
            loop {
                match self.receiver.try_recv() {
                    Ok(_) => purged += 1,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            if purged > 0 {
                info!(
                    "all {} message(s) from node {} to {} lost due to link failure",
                    purged, self.peer, self_id
                );
            }
            return None;
        }
        self.receiver.try_recv().ok()
    }
}

/// Creates a fresh directed edge `from -> to`: the producer endpoint for
/// `from`, and the consumer endpoint for `to`.
pub fn new_edge(from: NodeId, to: NodeId) -> (OutEdge, InEdge) {
    let (tx, rx) = mpsc::channel();
    (OutEdge::new(to, tx), InEdge::new(from, rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_flows_outside_failure_window() {
        let (out_edge, in_edge) = new_edge(0, 1);
        out_edge.send(0, 10.0, Message::VoteRequest { vote_id: 1 });
        assert_eq!(in_edge.recv(1, 10.0), Some(Message::VoteRequest { vote_id: 1 }));
    }

    #[test]
    fn failure_window_purges_queued_messages() {
        let (out_edge, in_edge) = out_in_with_failure();
        out_edge.send(0, 1.0, Message::VoteRequest { vote_id: 1 });
        out_edge.send(0, 1.0, Message::VoteRequest { vote_id: 2 });
        assert_eq!(in_edge.recv(1, 2.5), None);
        assert_eq!(in_edge.recv(1, 2.5), None);
    }

    fn out_in_with_failure() -> (OutEdge, InEdge) {
        let (mut out_edge, mut in_edge) = new_edge(0, 1);
        out_edge.add_failure(FailureWindow { start: 2.0, end: 5.0 });
        in_edge.add_failure(FailureWindow { start: 2.0, end: 5.0 });
        (out_edge, in_edge)
    }
}
