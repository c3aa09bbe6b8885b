#[macro_use]
extern crate log;
extern crate clap;
extern crate ctrlc;
extern crate stderrlog;

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use two_phase_commit_sim::checker;
use two_phase_commit_sim::cliopts::{Mode, TpcOptions};
use two_phase_commit_sim::demo;

fn main() {
    let opts = TpcOptions::parse();

    stderrlog::new()
        .module(module_path!())
        .verbosity(opts.verbosity + 2)
        .init()
        .unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = running.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received, shutting down");
        running_for_handler.store(false, Ordering::SeqCst);
    })
    .expect("failed to install signal handler");

    match opts.mode {
        Mode::Run => demo::run(&opts, running),
        Mode::Check => {
            let report = match checker::check_last_run(opts.num_participants, opts.log_path.as_ref()) {
                Ok(r) => r,
                Err(e) => {
                    error!("check failed: {}", e);
                    process::exit(2);
                }
            };
            if report.ok {
                info!("all invariants held over {}", opts.log_path);
            } else {
                for msg in &report.messages {
                    error!("{}", msg);
                }
                process::exit(1);
            }
        }
    }
}
