//! Exact adaptive-granularity HHH engine backed by an ordered map.
//!
//! Per packet the deepest live node containing the source is located and
//! exactly one transition is applied to it: invalidate, keep (report HHH),
//! collapse to the parent, expand to the child, or a plain update.

use crate::bloom::{Admission, BloomGate};
use crate::config::Config;
use crate::engine::{HhhModel, Step};
use crate::errors::Result;
use crate::report::{Occupancy, Report, ReportSink};
use crate::schedule::Schedule;
use crate::types::{CountMode, Packet, Prefix};
use log::{debug, info, trace};
use metrics::{counter, gauge};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnlineNode {
    /// Start of the current accounting window.
    pub timestamp: u64,
    /// Value attributed to each child branch.
    pub child_vals: [u64; 2],
    /// Value actually counted; differs from the child sum after an expand.
    pub summary: u64,
}

impl OnlineNode {
    fn seeded(now: u64, child: bool, (c, s): (u64, u64)) -> Self {
        let mut node = OnlineNode {
            timestamp: now,
            ..Default::default()
        };
        node.child_vals[child as usize] = c;
        node.summary = s;
        node
    }
}

pub struct OnlineEngine {
    cfg: Config,
    schedule: Schedule,
    gate: Option<BloomGate>,
    tree: BTreeMap<Prefix, OnlineNode>,
    next_occupancy: Option<u64>,
}

impl OnlineEngine {
    /// Fails on an invalid configuration.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let schedule = Schedule::new(&cfg);
        let gate = (cfg.mode == CountMode::Flows).then(|| {
            BloomGate::new(&cfg.bloom, cfg.first_len, cfg.last_len, schedule.uniform_windows())
        });
        Ok(Self {
            cfg,
            schedule,
            gate,
            tree: BTreeMap::new(),
            next_occupancy: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn node(&self, prefix: &Prefix) -> Option<&OnlineNode> {
        self.tree.get(prefix)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&Prefix, &OnlineNode)> {
        self.tree.iter()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    #[inline]
    fn is_stale(&self, node: &OnlineNode, now: u64) -> bool {
        node.timestamp.saturating_add(self.cfg.inactive_timeout) <= now
    }

    /// Deepest node covering the source. In legacy invalidation mode stale
    /// nodes met on the way are dropped silently. Creates an empty root when
    /// nothing is found.
    fn lookup(&mut self, pkt: &Packet) -> Prefix {
        let now = pkt.timestamp;
        for len in (self.cfg.first_len..=self.cfg.last_len).rev() {
            let probe = pkt.src.truncate(len);
            if let Some(node) = self.tree.get(&probe) {
                if self.cfg.new_invalidation || !self.is_stale(node, now) {
                    return probe;
                }
                trace!("dropping stale node {}", probe);
                self.tree.remove(&probe);
            }
        }

        let root = pkt.src.truncate(self.cfg.first_len);
        self.tree.insert(
            root,
            OnlineNode {
                timestamp: now,
                ..Default::default()
            },
        );
        root
    }

    fn admit(&mut self, pkt: &Packet, prefix: &Prefix, child: bool) -> (u64, u64) {
        let increment = self.cfg.mode.increment(pkt);
        let admission = match self.gate.as_mut() {
            Some(gate) => {
                let window = self.schedule.active_timeout(prefix.len());
                gate.admit(pkt.timestamp, window, prefix, &pkt.dst, child)
            }
            None => Admission::ALL,
        };
        admission.apply(increment)
    }

    /// Replace whatever sits at `prefix` with a fresh node holding only
    /// this packet's contribution.
    fn seed(&mut self, pkt: &Packet, prefix: Prefix) {
        let child = pkt.src.bit_at(prefix.len());
        let incs = self.admit(pkt, &prefix, child);
        self.tree.insert(prefix, OnlineNode::seeded(pkt.timestamp, child, incs));
    }

    fn step(&mut self, pkt: &Packet, curr: Prefix, sink: &mut dyn ReportSink) -> Step {
        let now = pkt.timestamp;
        let Some(mut node) = self.tree.get(&curr).copied() else {
            return Step::Retry;
        };
        let len = curr.len();
        let child = pkt.src.bit_at(len);
        let prev = pkt.src.truncate(len.saturating_sub(1).max(self.cfg.first_len));
        let next = pkt.src.truncate((len + 1).min(self.cfg.last_len));

        if self.cfg.new_invalidation && self.is_stale(&node, now) {
            if self.cfg.reports {
                sink.emit(&Report::Invalid { timestamp: now, prefix: curr, value: node.summary });
            }
            counter!("hhhscan_invalid_total").increment(1);
            self.tree.remove(&curr);
            return Step::Retry;
        }

        if node.timestamp.saturating_add(self.schedule.active_timeout(len)) <= now {
            if node.summary >= self.schedule.threshold(len) {
                sink.emit(&Report::Hhh { timestamp: now, prefix: curr, value: node.summary });
                counter!("hhhscan_hhh_total").increment(1);
                self.seed(pkt, curr);
            } else {
                self.tree.remove(&curr);
                if self.cfg.reports {
                    let report = if self.tree.contains_key(&prev) {
                        Report::Collapse { timestamp: now, prefix: curr, value: node.summary }
                    } else {
                        Report::Move { timestamp: now, prefix: curr, value: node.summary }
                    };
                    sink.emit(&report);
                }
                counter!("hhhscan_collapse_total").increment(1);
                if self.cfg.collapse_accumulate {
                    self.seed(pkt, prev);
                }
            }
            return Step::Done;
        }

        if len < self.cfg.last_len && node.child_vals[child as usize] >= self.schedule.threshold(len) {
            if self.cfg.pure_heavy || self.cfg.reports {
                sink.emit(&Report::Expand { timestamp: now, prefix: curr, value: node.summary });
            }
            counter!("hhhscan_expand_total").increment(1);
            node.child_vals[child as usize] = 0;
            node.summary = node.child_vals[!child as usize];
            self.tree.insert(curr, node);
            self.seed(pkt, next);
            return Step::Done;
        }

        let (c, s) = self.admit(pkt, &curr, child);
        node.child_vals[child as usize] += c;
        node.summary += s;
        self.tree.insert(curr, node);
        Step::Done
    }

    /// Node histogram by prefix length, as of `now`.
    pub fn occupancy(&self, now: u64) -> Occupancy {
        let mut occ = Occupancy::default();
        for (prefix, node) in &self.tree {
            occ.incl[prefix.len() as usize] += 1;
            if !self.is_stale(node, now) {
                occ.excl[prefix.len() as usize] += 1;
            }
        }
        occ
    }

    fn report_occupancy(&mut self, now: u64, sink: &mut dyn ReportSink) {
        let period = self.cfg.occupancy_period();
        let due = match self.next_occupancy {
            Some(due) => due,
            None => return,
        };
        if due > now {
            return;
        }
        sink.emit(&Report::Occupancy(self.occupancy(now)));
        let mut next = due + period;
        if next <= now {
            next = now + period;
        }
        self.next_occupancy = Some(next);
    }
}

impl HhhModel for OnlineEngine {
    fn process_packet(&mut self, pkt: &Packet, sink: &mut dyn ReportSink) -> bool {
        if self.next_occupancy.is_none() {
            info!("start: {}", pkt.timestamp);
            self.next_occupancy = Some(pkt.timestamp + self.cfg.occupancy_period());
        }
        counter!("hhhscan_packets_total").increment(1);

        loop {
            let curr = self.lookup(pkt);
            if let Step::Done = self.step(pkt, curr, sink) {
                break;
            }
        }

        if self.cfg.reports {
            self.report_occupancy(pkt.timestamp, sink);
        }
        gauge!("hhhscan_active_nodes").set(self.tree.len() as f64);
        true
    }

    fn flush(&mut self, _sink: &mut dyn ReportSink) {
        info!("online flush: {} nodes in tree", self.tree.len());
    }

    fn clear(&mut self) {
        debug!("clearing {} online nodes", self.tree.len());
        self.tree.clear();
        if let Some(gate) = self.gate.as_mut() {
            gate.clear();
        }
    }
}
