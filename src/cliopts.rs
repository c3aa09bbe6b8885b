//!
//! cliopts.rs
//! Command-line surface for the driver binary: an external collaborator,
//! not part of the core protocol state machines.
//!

use clap::{App, Arg};

#[derive(Debug, Clone)]
pub struct TpcOptions {
    pub mode: Mode,
    pub num_participants: usize,
    pub log_path: String,
    pub verbosity: usize,
    pub tick_secs: f64,
    pub timeout_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Run,
    Check,
}

impl TpcOptions {
    pub fn parse() -> Self {
        let matches = App::new("two_phase_commit_sim")
            .version("0.1.0")
            .about("Single-process two-phase-commit protocol simulator")
            .arg(
                Arg::with_name("mode")
                    .long("mode")
                    .takes_value(true)
                    .possible_values(&["run", "check"])
                    .default_value("run")
                    .help("run a demo scenario, or check the log directory left by a prior run"),
            )
            .arg(
                Arg::with_name("participants")
                    .short("N")
                    .long("participants")
                    .takes_value(true)
                    .default_value("2")
                    .help("number of participant nodes"),
            )
            .arg(
                Arg::with_name("log-path")
                    .short("l")
                    .long("log-path")
                    .takes_value(true)
                    .default_value("logs")
                    .help("directory holding per-node write-ahead logs"),
            )
            .arg(
                Arg::with_name("verbosity")
                    .short("v")
                    .multiple(true)
                    .help("increase log verbosity, may be repeated"),
            )
            .arg(
                Arg::with_name("tick-ms")
                    .long("tick-ms")
                    .takes_value(true)
                    .default_value("1")
                    .help("node tick length in milliseconds"),
            )
            .arg(
                Arg::with_name("timeout-secs")
                    .long("timeout-secs")
                    .takes_value(true)
                    .default_value("2")
                    .help("pending-vote and vote-collection timeout in seconds"),
            )
            .get_matches();

        let mode = match matches.value_of("mode").unwrap() {
            "check" => Mode::Check,
            _ => Mode::Run,
        };
        let num_participants: usize = matches.value_of("participants").unwrap().parse().unwrap_or(2);
        let log_path = matches.value_of("log-path").unwrap().to_string();
        let verbosity = matches.occurrences_of("verbosity") as usize;
        let tick_ms: f64 = matches.value_of("tick-ms").unwrap().parse().unwrap_or(1.0);
        let timeout_secs: f64 = matches.value_of("timeout-secs").unwrap().parse().unwrap_or(2.0);

        TpcOptions {
            mode,
            num_participants,
            log_path,
            verbosity,
            tick_secs: tick_ms / 1000.0,
            timeout_secs,
        }
    }
}
