//! Batch HHH engine: counts leaves for a whole window, then aggregates the
//! hierarchy bottom-up at flush.

use crate::config::Config;
use crate::constants::USEC_PER_SEC;
use crate::engine::HhhModel;
use crate::errors::Result;
use crate::helpers::advance_window;
use crate::report::{Report, ReportSink};
use crate::types::{CountMode, Packet, Prefix};
use log::info;
use metrics::counter;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfflineNode {
    pub hh: bool,
    pub hhh: bool,
    /// Everything under this prefix.
    pub hh_value: u64,
    /// Everything under this prefix not already claimed by a descendant HHH.
    pub hhh_value: u64,
    /// Flows mode: distinct destinations under this prefix.
    flows: BTreeSet<Prefix>,
    /// Flows mode: destinations not claimed by a descendant HHH.
    residual: BTreeSet<Prefix>,
}

impl OfflineNode {
    fn absorb(&mut self, child: &OfflineNode, flows: bool) {
        if flows {
            self.flows.extend(child.flows.iter().copied());
            self.hh_value = self.flows.len() as u64;
            if !child.hhh {
                self.residual.extend(child.residual.iter().copied());
                self.hhh_value = self.residual.len() as u64;
            }
        } else {
            self.hh_value += child.hh_value;
            if !child.hhh {
                self.hhh_value += child.hhh_value;
            }
        }
    }
}

/// Per-window totals, used for quotient thresholds and window statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowCounters {
    pub packets: u64,
    pub bytes: u64,
    pub flows: BTreeSet<Prefix>,
}

pub struct OfflineEngine {
    cfg: Config,
    /// Report timestamp of the current window; set by the first packet.
    window_end: Option<u64>,
    counters: WindowCounters,
    leaves: BTreeMap<Prefix, OfflineNode>,
}

impl OfflineEngine {
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            window_end: None,
            counters: WindowCounters::default(),
            leaves: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn counters(&self) -> &WindowCounters {
        &self.counters
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Threshold for the window just collected.
    pub fn window_threshold(&self) -> u64 {
        match self.cfg.quotient {
            Some(q) => {
                let total = match self.cfg.mode {
                    CountMode::Flows => self.counters.flows.len() as u64,
                    CountMode::Bytes => self.counters.bytes,
                    CountMode::Packets => self.counters.packets,
                };
                (q * total as f64) as u64
            }
            None => self.cfg.base_threshold(),
        }
    }

    /// Aggregate the collected leaves into the full hierarchy, longest
    /// prefixes first. An HHH child does not add to its parent's HHH value.
    pub fn build_hierarchy(&self, threshold: u64) -> BTreeMap<Prefix, OfflineNode> {
        let (first, last) = (self.cfg.first_len, self.cfg.last_len);
        let flows = self.cfg.mode == CountMode::Flows;
        let mut levels: Vec<BTreeMap<Prefix, OfflineNode>> = vec![BTreeMap::new(); last as usize + 1];
        levels[last as usize] = self.leaves.clone();

        for len in (first..=last).rev() {
            let mut level = std::mem::take(&mut levels[len as usize]);
            for (prefix, node) in level.iter_mut() {
                node.hh = node.hh_value >= threshold;
                node.hhh = node.hhh_value >= threshold;
                if len > first {
                    levels[len as usize - 1]
                        .entry(prefix.parent())
                        .or_default()
                        .absorb(node, flows);
                }
            }
            levels[len as usize] = level;
        }

        levels.into_iter().flatten().collect()
    }

    /// Drop the window's counters and leaves; the window clock is kept.
    fn reset_window(&mut self) {
        self.counters = WindowCounters::default();
        self.leaves.clear();
    }

    fn log_window(&self, threshold: u64) {
        let c = &self.counters;
        info!("bytes counter: {}", c.bytes);
        info!("packets counter: {}", c.packets);
        info!("flows counter: {}", c.flows.len());
        let secs = self.cfg.active_timeout / USEC_PER_SEC;
        if secs > 0 {
            info!("bytes speed: {}", c.bytes as f64 / secs as f64);
            info!("packets speed: {}", c.packets as f64 / secs as f64);
            info!("flows speed: {}", c.flows.len() as f64 / secs as f64);
        }
        if self.cfg.quotient.is_some() {
            info!("threshold: {}", threshold);
        }
    }
}

impl HhhModel for OfflineEngine {
    fn process_packet(&mut self, pkt: &Packet, sink: &mut dyn ReportSink) -> bool {
        let window = self.cfg.active_timeout;
        match self.window_end {
            None => {
                self.window_end = Some(pkt.timestamp + window);
                info!("start: {}", pkt.timestamp);
            }
            Some(end) if window > 0 && end <= pkt.timestamp => {
                if self.cfg.first_shot {
                    return false;
                }
                self.flush(sink);
                self.reset_window();
                self.window_end = Some(advance_window(end, window, pkt.timestamp) + window);
            }
            Some(_) => {}
        }
        counter!("hhhscan_packets_total").increment(1);

        self.counters.packets += 1;
        self.counters.bytes += pkt.length as u64;
        self.counters.flows.insert(pkt.dst);

        let leaf = self.leaves.entry(pkt.src.truncate(self.cfg.last_len)).or_default();
        match self.cfg.mode {
            CountMode::Flows => {
                leaf.flows.insert(pkt.dst);
                leaf.residual.insert(pkt.dst);
                leaf.hh_value = leaf.flows.len() as u64;
                leaf.hhh_value = leaf.residual.len() as u64;
            }
            mode => {
                let inc = mode.increment(pkt);
                leaf.hh_value += inc;
                leaf.hhh_value += inc;
            }
        }
        true
    }

    fn flush(&mut self, sink: &mut dyn ReportSink) {
        let Some(timestamp) = self.window_end else {
            return;
        };
        let threshold = self.window_threshold();
        let tree = self.build_hierarchy(threshold);

        for (prefix, node) in tree.iter().filter(|(_, n)| n.hhh) {
            sink.emit(&Report::Window { timestamp, hhh: true, prefix: *prefix, value: node.hhh_value });
            counter!("hhhscan_hhh_total").increment(1);
        }
        if self.cfg.pure_heavy {
            for (prefix, node) in tree.iter().filter(|(_, n)| n.hh) {
                sink.emit(&Report::Window { timestamp, hhh: false, prefix: *prefix, value: node.hh_value });
            }
        }
        if self.cfg.reports {
            for (prefix, node) in tree.iter().filter(|(p, _)| p.len() == self.cfg.last_len) {
                sink.emit(&Report::Leaf { timestamp, prefix: *prefix, value: node.hh_value });
            }
        }

        self.log_window(threshold);
    }

    fn clear(&mut self) {
        self.reset_window();
        self.window_end = None;
    }
}
