//!
//! demo.rs
//! Thin built-in scenario for `--mode run`. Scenario scripting lives
//! outside the core protocol; this wires one small happy-path
//! transaction just far enough to exercise the simulator end to end
//! from the CLI.
//!

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::cliopts::TpcOptions;
use crate::scenario::Simulation;
use crate::task::{Task, VoteResponse};

pub fn run(opts: &TpcOptions, running: Arc<AtomicBool>) {
    let _ = std::fs::remove_dir_all(&opts.log_path);

    let mut sim = Simulation::new(opts.log_path.clone(), opts.tick_secs, opts.timeout_secs);

    let coordinator_votes: HashMap<u32, VoteResponse> = [(0, VoteResponse::new(1, 0.0))].into_iter().collect();
    sim.create_coordinator(coordinator_votes, vec![Task::SendVoteRequest { vote_id: 0, time_to_execute: 1.0 }]);

    for id in 1..=opts.num_participants {
        let votes: HashMap<u32, VoteResponse> = [(0, VoteResponse::new(1, 0.2))].into_iter().collect();
        sim.create_participant(id, votes, Vec::new());
    }

    info!("simulation started: {} participant(s), logs under {}", opts.num_participants, opts.log_path);

    let deadline = Duration::from_secs_f64(opts.timeout_secs + 2.0);
    let step = Duration::from_millis(50);
    let mut elapsed = Duration::from_secs(0);
    while elapsed < deadline && running.load(Ordering::SeqCst) {
        std::thread::sleep(step);
        elapsed += step;
    }

    sim.stop();
    info!("simulation stopped");
}
