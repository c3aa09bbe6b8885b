//! End-to-end scenario tests. Each node runs on its own thread against a
//! real wall clock, so every scenario scales the original
//! second-denominated timings down by 10x (tick 1ms, timeout 0.2s) to
//! keep the suite fast; the relative ordering of events and the outcomes
//! are unchanged.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use two_phase_commit_sim::message::COORDINATOR_ID;
use two_phase_commit_sim::oplog::{LogEvent, OpLog};
use two_phase_commit_sim::scenario::Simulation;
use two_phase_commit_sim::task::{Task, VoteResponse};

const TICK: f64 = 0.001;
const TIMEOUT: f64 = 0.2;

fn temp_log_dir(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("tpc_scenario_{}_{}", std::process::id(), name))
}

fn last_terminal(log_dir: &std::path::Path, node_id: usize) -> Option<LogEvent> {
    let log = OpLog::new(log_dir.join(node_id.to_string()));
    log.read_all()
        .ok()?
        .into_iter()
        .filter(|r| r.event.is_terminal())
        .last()
        .map(|r| r.event)
}

fn last_terminal_for_vote(log_dir: &std::path::Path, node_id: usize, vote_id: u32) -> Option<LogEvent> {
    let log = OpLog::new(log_dir.join(node_id.to_string()));
    log.read_all()
        .ok()?
        .into_iter()
        .filter(|r| r.vote_id == vote_id && r.event.is_terminal())
        .last()
        .map(|r| r.event)
}

fn votes(vote_id: u32, vote: u8, delay: f64) -> HashMap<u32, VoteResponse> {
    [(vote_id, VoteResponse::new(vote, delay))].into_iter().collect()
}

#[test]
fn s1_happy_commit() {
    let dir = temp_log_dir("s1");
    let _ = std::fs::remove_dir_all(&dir);
    let mut sim = Simulation::new(dir.clone(), TICK, TIMEOUT);

    sim.create_coordinator(votes(0, 1, 0.0), vec![Task::SendVoteRequest { vote_id: 0, time_to_execute: 0.1 }]);
    sim.create_participant(1, votes(0, 1, 0.05), Vec::new());
    sim.create_participant(2, votes(0, 1, 0.05), Vec::new());

    thread::sleep(Duration::from_millis(400));
    sim.stop();

    assert_eq!(last_terminal(&dir, COORDINATOR_ID), Some(LogEvent::Commit));
    assert_eq!(last_terminal(&dir, 1), Some(LogEvent::Commit));
    assert_eq!(last_terminal(&dir, 2), Some(LogEvent::Commit));
}

#[test]
fn s2_one_no_aborts() {
    let dir = temp_log_dir("s2");
    let _ = std::fs::remove_dir_all(&dir);
    let mut sim = Simulation::new(dir.clone(), TICK, TIMEOUT);

    sim.create_coordinator(votes(0, 1, 0.0), vec![Task::SendVoteRequest { vote_id: 0, time_to_execute: 0.1 }]);
    sim.create_participant(1, votes(0, 0, 0.05), Vec::new());
    sim.create_participant(2, votes(0, 1, 0.05), Vec::new());

    thread::sleep(Duration::from_millis(400));
    sim.stop();

    assert_eq!(last_terminal(&dir, COORDINATOR_ID), Some(LogEvent::Abort));
    assert_eq!(last_terminal(&dir, 1), Some(LogEvent::Abort));
    assert_eq!(last_terminal(&dir, 2), Some(LogEvent::Abort));
}

/// Partition hides participant 2's vote until after the coordinator has
/// already timed out and aborted; once the partition heals, participant
/// 2 is left pending and must run the termination protocol to learn the
/// abort. The VoteRequest itself is sent before the partition opens (a
/// timing adjustment noted in DESIGN.md)
/// so participant 2 still receives the request and casts its vote, only
/// to have that vote dropped in flight.
#[test]
fn s3_partition_hides_a_no_then_heals() {
    let dir = temp_log_dir("s3");
    let _ = std::fs::remove_dir_all(&dir);
    let mut sim = Simulation::new(dir.clone(), TICK, TIMEOUT);

    sim.create_coordinator(votes(0, 1, 0.0), vec![Task::SendVoteRequest { vote_id: 0, time_to_execute: 0.05 }]);
    sim.create_participant(1, votes(0, 1, 0.02), Vec::new());
    sim.create_participant(2, votes(0, 1, 0.02), Vec::new());

    sim.network_partition(&[COORDINATOR_ID, 1], &[2], 0.1, 0.5);

    thread::sleep(Duration::from_millis(900));
    sim.stop();

    assert_eq!(last_terminal(&dir, COORDINATOR_ID), Some(LogEvent::Abort));
    assert_eq!(last_terminal(&dir, 1), Some(LogEvent::Abort));
    assert_eq!(last_terminal(&dir, 2), Some(LogEvent::Abort));
}

#[test]
fn s4_crash_and_recover_presumes_abort() {
    let dir = temp_log_dir("s4");
    let _ = std::fs::remove_dir_all(&dir);
    let mut sim = Simulation::new(dir.clone(), TICK, TIMEOUT);

    sim.create_coordinator(
        votes(0, 1, 0.0),
        vec![
            Task::SendVoteRequest { vote_id: 0, time_to_execute: 0.05 },
            Task::KillSelf { time_to_execute: 0.08 },
            Task::ResumeSelf { time_to_execute: 0.3 },
        ],
    );
    sim.create_participant(1, votes(0, 1, 0.02), Vec::new());
    sim.create_participant(2, votes(0, 1, 0.02), Vec::new());

    thread::sleep(Duration::from_millis(700));
    sim.stop();

    let coordinator_log = OpLog::new(dir.join(COORDINATOR_ID.to_string()));
    let records = coordinator_log.read_all().unwrap();
    assert!(records.iter().any(|r| r.event == LogEvent::Start && r.vote_id == 0));

    assert_eq!(last_terminal(&dir, COORDINATOR_ID), Some(LogEvent::Abort));
    assert_eq!(last_terminal(&dir, 1), Some(LogEvent::Abort));
    assert_eq!(last_terminal(&dir, 2), Some(LogEvent::Abort));
}

#[test]
fn s5_uncertain_participant_recovers_commit() {
    let dir = temp_log_dir("s5");
    let _ = std::fs::remove_dir_all(&dir);
    let mut sim = Simulation::new(dir.clone(), TICK, TIMEOUT);

    sim.create_coordinator(votes(0, 1, 0.0), vec![Task::SendVoteRequest { vote_id: 0, time_to_execute: 0.05 }]);
    // Participant 1 votes yes, then is killed shortly after so it never
    // sees the coordinator's decision; it comes back well after the
    // commit is durable and must run the termination protocol.
    sim.create_participant(
        1,
        votes(0, 1, 0.0),
        vec![Task::KillSelf { time_to_execute: 0.08 }, Task::ResumeSelf { time_to_execute: 0.4 }],
    );
    sim.create_participant(2, votes(0, 1, 0.02), Vec::new());

    thread::sleep(Duration::from_millis(900));
    sim.stop();

    let participant1_log = OpLog::new(dir.join("1"));
    let records = participant1_log.read_all().unwrap();
    assert!(records.iter().any(|r| r.event == LogEvent::Yes && r.vote_id == 0));

    assert_eq!(last_terminal(&dir, COORDINATOR_ID), Some(LogEvent::Commit));
    assert_eq!(last_terminal(&dir, 1), Some(LogEvent::Commit));
}

#[test]
fn s6_sequential_transactions_both_commit() {
    let dir = temp_log_dir("s6");
    let _ = std::fs::remove_dir_all(&dir);
    let mut sim = Simulation::new(dir.clone(), TICK, TIMEOUT);

    let mut coordinator_votes = votes(0, 1, 0.0);
    coordinator_votes.extend(votes(1, 1, 0.0));
    sim.create_coordinator(
        coordinator_votes,
        vec![
            Task::SendVoteRequest { vote_id: 0, time_to_execute: 0.05 },
            Task::SendVoteRequest { vote_id: 1, time_to_execute: 0.1 },
        ],
    );

    let mut participant_votes = votes(0, 1, 0.02);
    participant_votes.extend(votes(1, 1, 0.02));
    sim.create_participant(1, participant_votes.clone(), Vec::new());
    sim.create_participant(2, participant_votes, Vec::new());

    thread::sleep(Duration::from_millis(500));
    sim.stop();

    for &vote_id in &[0u32, 1u32] {
        assert_eq!(last_terminal_for_vote(&dir, COORDINATOR_ID, vote_id), Some(LogEvent::Commit));
        assert_eq!(last_terminal_for_vote(&dir, 1, vote_id), Some(LogEvent::Commit));
        assert_eq!(last_terminal_for_vote(&dir, 2, vote_id), Some(LogEvent::Commit));
    }
}
