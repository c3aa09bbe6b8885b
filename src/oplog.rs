//!
//! oplog.rs
//! Append-only per-node write-ahead log. One line per event:
//! `timestamp:vote_id:event`. The only cross-restart state.
//!

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use log::trace;

use crate::error::SimError;
use crate::message::VoteId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogEvent {
    Start,
    Yes,
    Commit,
    Abort,
    Requested,
}

impl LogEvent {
    fn as_str(&self) -> &'static str {
        match self {
            LogEvent::Start => "start",
            LogEvent::Yes => "yes",
            LogEvent::Commit => "commit",
            LogEvent::Abort => "abort",
            LogEvent::Requested => "requested",
        }
    }

    fn parse(s: &str) -> Option<LogEvent> {
        match s {
            "start" => Some(LogEvent::Start),
            "yes" => Some(LogEvent::Yes),
            "commit" => Some(LogEvent::Commit),
            "abort" => Some(LogEvent::Abort),
            "requested" => Some(LogEvent::Requested),
            _ => None,
        }
    }

    /// `commit`/`abort` are the two terminal, mutually exclusive events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LogEvent::Commit | LogEvent::Abort)
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: f64,
    pub vote_id: VoteId,
    pub event: LogEvent,
}

#[derive(Debug)]
pub struct OpLog {
    path: PathBuf,
}

impl OpLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        OpLog { path: path.into() }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Appends one record, creating the file (and its parent directory) on
    /// first write. Errors are non-fatal per the caller's choosing; most
    /// call sites log and continue rather than abort the node.
    pub fn append(&self, timestamp: f64, vote_id: VoteId, event: LogEvent) -> Result<(), SimError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}:{}:{}", timestamp, vote_id, event.as_str())?;
        trace!("{}: appended {}:{}:{}", self.path.display(), timestamp, vote_id, event.as_str());
        Ok(())
    }

    /// Reads and parses the entire log. A malformed line indicates disk
    /// damage and is fatal to the recovery attempt, not just the line.
    pub fn read_all(&self) -> Result<Vec<LogRecord>, SimError> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut parts = line.splitn(3, ':');
            let (ts, vid, ev) = match (parts.next(), parts.next(), parts.next()) {
                (Some(ts), Some(vid), Some(ev)) => (ts, vid, ev),
                _ => {
                    return Err(SimError::LogCorrupt {
                        path: self.path.display().to_string(),
                        detail: format!("line {}: expected 'timestamp:vote_id:event'", lineno + 1),
                    })
                }
            };
            let timestamp: f64 = ts.parse().map_err(|_| SimError::LogCorrupt {
                path: self.path.display().to_string(),
                detail: format!("line {}: bad timestamp {:?}", lineno + 1, ts),
            })?;
            let vote_id: VoteId = vid.parse().map_err(|_| SimError::LogCorrupt {
                path: self.path.display().to_string(),
                detail: format!("line {}: bad vote_id {:?}", lineno + 1, vid),
            })?;
            let event = LogEvent::parse(ev).ok_or_else(|| SimError::LogCorrupt {
                path: self.path.display().to_string(),
                detail: format!("line {}: unknown event {:?}", lineno + 1, ev),
            })?;
            records.push(LogRecord { timestamp, vote_id, event });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tpc_oplog_test_{}_{}", std::process::id(), name))
    }

    #[test]
    fn append_then_read_round_trips() {
        let path = temp_path("roundtrip");
        let log = OpLog::new(path.clone());
        log.append(0.1, 7, LogEvent::Start).unwrap();
        log.append(0.2, 7, LogEvent::Commit).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, LogEvent::Start);
        assert_eq!(records[1].event, LogEvent::Commit);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn corrupt_line_is_fatal() {
        let path = temp_path("corrupt");
        fs::write(&path, "not-a-valid-line\n").unwrap();
        let log = OpLog::new(path.clone());
        assert!(log.read_all().is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_io_error_not_panic() {
        let path = temp_path("missing");
        let log = OpLog::new(path);
        assert!(log.read_all().is_err());
    }
}
