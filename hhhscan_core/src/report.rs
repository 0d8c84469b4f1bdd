//! Line-oriented report stream.
//!
//! Field names and separators are consumed by downstream tooling and must
//! not change.

use crate::constants::V4_BITS;
use crate::types::Prefix;
use std::fmt;
use std::io::{self, Write};

const DEPTHS: usize = V4_BITS as usize + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// A node closed its window at or above threshold.
    Hhh { timestamp: u64, prefix: Prefix, value: u64 },
    /// A stale node was dropped.
    Invalid { timestamp: u64, prefix: Prefix, value: u64 },
    /// A node below threshold merged into its existing parent.
    Collapse { timestamp: u64, prefix: Prefix, value: u64 },
    /// Same as collapse, but no parent node existed.
    Move { timestamp: u64, prefix: Prefix, value: u64 },
    /// One branch alone reached the threshold and moved one level down.
    Expand { timestamp: u64, prefix: Prefix, value: u64 },
    /// Offline window result; `hhh == false` marks a plain heavy hitter.
    Window { timestamp: u64, hhh: bool, prefix: Prefix, value: u64 },
    /// Offline per-leaf counter.
    Leaf { timestamp: u64, prefix: Prefix, value: u64 },
    Occupancy(Occupancy),
    Collisions { count: u64 },
}

impl Report {
    pub fn is_hhh(&self) -> bool {
        matches!(
            self,
            Report::Hhh { .. } | Report::Window { hhh: true, .. }
        )
    }

    pub fn prefix(&self) -> Option<Prefix> {
        match self {
            Report::Hhh { prefix, .. }
            | Report::Invalid { prefix, .. }
            | Report::Collapse { prefix, .. }
            | Report::Move { prefix, .. }
            | Report::Expand { prefix, .. }
            | Report::Window { prefix, .. }
            | Report::Leaf { prefix, .. } => Some(*prefix),
            Report::Occupancy(_) | Report::Collisions { .. } => None,
        }
    }
}

fn event(f: &mut fmt::Formatter<'_>, ts: u64, name: &str, p: &Prefix, v: u64) -> fmt::Result {
    write!(f, "timestamp: {ts}, event: {name}, prefix_found: {p}, value: {v}")
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Hhh { timestamp, prefix, value } => event(f, *timestamp, "hhh", prefix, *value),
            Report::Invalid { timestamp, prefix, value } => {
                event(f, *timestamp, "invalid", prefix, *value)
            }
            Report::Collapse { timestamp, prefix, value } => {
                event(f, *timestamp, "collapse", prefix, *value)
            }
            Report::Move { timestamp, prefix, value } => event(f, *timestamp, "move", prefix, *value),
            Report::Expand { timestamp, prefix, value } => {
                event(f, *timestamp, "expand", prefix, *value)
            }
            Report::Window { timestamp, hhh, prefix, value } => write!(
                f,
                "timestamp: {}, hhh: {}, prefix: {}, value: {}",
                timestamp,
                u8::from(*hhh),
                prefix,
                value
            ),
            Report::Leaf { timestamp, prefix, value } => {
                write!(f, "timestamp,{timestamp},report,prefix,{prefix},value,{value}")
            }
            Report::Occupancy(o) => write!(f, "{o}"),
            Report::Collisions { count } => write!(f, "collisions: {count}"),
        }
    }
}

/// Snapshot of the online tree: node counts per prefix length, with
/// (`incl`) and without (`excl`) stale nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupancy {
    pub incl: [u64; DEPTHS],
    pub excl: [u64; DEPTHS],
}

impl Default for Occupancy {
    fn default() -> Self {
        Self {
            incl: [0; DEPTHS],
            excl: [0; DEPTHS],
        }
    }
}

impl Occupancy {
    pub fn total(&self) -> u64 {
        self.incl.iter().sum()
    }

    pub fn valid(&self) -> u64 {
        self.excl.iter().sum()
    }

    fn depth(hist: &[u64; DEPTHS]) -> usize {
        hist.iter().rposition(|n| *n > 0).unwrap_or(0)
    }
}

impl fmt::Display for Occupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "histogram-incl:")?;
        for (i, n) in self.incl.iter().enumerate() {
            write!(f, " {i}:{n}")?;
        }
        write!(f, "\nhistogram-excl:")?;
        for (i, n) in self.excl.iter().enumerate() {
            write!(f, " {i}:{n}")?;
        }
        write!(f, "\nmemory-occup: {}/{}", self.total(), self.valid())?;
        write!(
            f,
            "\nmemory-depth: {}/{}",
            Self::depth(&self.incl),
            Self::depth(&self.excl)
        )
    }
}

/// Destination of report events.
pub trait ReportSink {
    fn emit(&mut self, report: &Report);
}

impl ReportSink for Vec<Report> {
    fn emit(&mut self, report: &Report) {
        self.push(report.clone());
    }
}

/// Writes one report per line. The first write error is kept and returned
/// by [`LineSink::finish`]; later reports are discarded.
pub struct LineSink<W: Write> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> LineSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    pub fn finish(mut self) -> io::Result<W> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> ReportSink for LineSink<W> {
    fn emit(&mut self, report: &Report) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = writeln!(self.out, "{report}") {
            self.error = Some(e);
        }
    }
}
