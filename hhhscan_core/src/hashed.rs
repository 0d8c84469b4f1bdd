//! Adaptive HHH engine over fixed-size per-depth hash tables.
//!
//! Memory is allocated once from the slot budget; nodes live in the slot
//! their prefix hashes to and are overwritten on collision. The collision
//! strategy decides whether a slot holding some other prefix is trusted.

use crate::bloom::{Admission, BloomGate};
use crate::config::{CollisionStrategy, Config};
use crate::engine::{HhhModel, Step};
use crate::errors::Result;
use crate::helpers::slot_index;
use crate::report::{Report, ReportSink};
use crate::schedule::{allocate_slots, Schedule};
use crate::types::{CountMode, Packet, Prefix};
use log::{debug, info};
use metrics::counter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashSlot {
    /// Prefix last written into this slot. Kept across invalidation.
    pub prefix: Prefix,
    pub valid: bool,
    pub timestamp: u64,
    pub child_vals: [u64; 2],
    pub summary: u64,
}

impl HashSlot {
    fn seeded(prefix: Prefix, now: u64, child: bool, (c, s): (u64, u64)) -> Self {
        let mut slot = HashSlot {
            prefix,
            valid: true,
            timestamp: now,
            ..Default::default()
        };
        slot.child_vals[child as usize] = c;
        slot.summary = s;
        slot
    }
}

/// Table coordinates of a slot: layer index (`last_len - len`) and slot.
type Pos = (usize, usize);

pub struct HashedEngine {
    cfg: Config,
    schedule: Schedule,
    gate: Option<BloomGate>,
    tables: Vec<Vec<HashSlot>>,
    collisions: u64,
    started: bool,
}

impl HashedEngine {
    /// Validate `cfg` and allocate every table up front.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let budget = cfg.memory_budget.unwrap_or(0);
        let sizes = allocate_slots(budget, cfg.first_len, cfg.last_len)?;
        for (i, size) in sizes.iter().enumerate() {
            debug!("layer /{}: {} slots", cfg.last_len as usize - i, size);
        }
        let tables = sizes
            .iter()
            .map(|&n| vec![HashSlot::default(); n as usize])
            .collect();
        let schedule = Schedule::new(&cfg);
        let gate = (cfg.mode == CountMode::Flows).then(|| {
            BloomGate::new(&cfg.bloom, cfg.first_len, cfg.last_len, schedule.uniform_windows())
        });
        Ok(Self {
            cfg,
            schedule,
            gate,
            tables,
            collisions: 0,
            started: false,
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Lookups that resolved to a slot owned by a different prefix.
    pub fn collisions(&self) -> u64 {
        self.collisions
    }

    /// Slots per layer, indexed by `last_len - len`.
    pub fn table_sizes(&self) -> Vec<usize> {
        self.tables.iter().map(Vec::len).collect()
    }

    /// The live slot currently owned by `prefix`, if any.
    pub fn slot(&self, prefix: &Prefix) -> Option<&HashSlot> {
        if prefix.len() < self.cfg.first_len || prefix.len() > self.cfg.last_len {
            return None;
        }
        let (layer, idx) = self.pos(prefix);
        let slot = &self.tables[layer][idx];
        (slot.valid && slot.prefix == *prefix).then_some(slot)
    }

    #[inline]
    fn pos(&self, prefix: &Prefix) -> Pos {
        let layer = (self.cfg.last_len - prefix.len()) as usize;
        (layer, slot_index(prefix.value(), prefix.len(), self.tables[layer].len()))
    }

    #[inline]
    fn at(&self, (layer, idx): Pos) -> &HashSlot {
        &self.tables[layer][idx]
    }

    #[inline]
    fn at_mut(&mut self, (layer, idx): Pos) -> &mut HashSlot {
        &mut self.tables[layer][idx]
    }

    #[inline]
    fn is_stale(&self, slot: &HashSlot, now: u64) -> bool {
        slot.timestamp.saturating_add(self.cfg.inactive_timeout) <= now
    }

    fn is_live(&self, slot: &HashSlot, now: u64) -> bool {
        slot.valid && (self.cfg.new_invalidation || !self.is_stale(slot, now))
    }

    /// Whether the live slot found for `probe` may stand for it.
    fn accepts(&self, pkt: &Packet, probe: &Prefix) -> bool {
        match self.cfg.collision_strategy {
            CollisionStrategy::Ignore | CollisionStrategy::Skip => true,
            // every slot on the path must hold its own prefix
            CollisionStrategy::AdaptFull => (self.cfg.first_len..=probe.len()).all(|l| {
                let p = pkt.src.truncate(l);
                self.at(self.pos(&p)).prefix == p
            }),
            // every slot on the path must agree on its selector bit
            CollisionStrategy::AdaptBit => (self.cfg.first_len..=probe.len()).all(|l| {
                let p = pkt.src.truncate(l);
                self.at(self.pos(&p)).prefix.bit_at(l - 1) == p.bit_at(l - 1)
            }),
        }
    }

    /// Deepest accepted live slot for the source; falls back to resetting
    /// the root slot. Returns the probed prefix and its position.
    fn lookup(&mut self, pkt: &Packet) -> (Prefix, Pos) {
        let now = pkt.timestamp;
        for len in (self.cfg.first_len..=self.cfg.last_len).rev() {
            let probe = pkt.src.truncate(len);
            let pos = self.pos(&probe);
            let slot = self.at(pos);
            if self.is_live(slot, now) && self.accepts(pkt, &probe) {
                return (probe, pos);
            }
        }

        let root = pkt.src.truncate(self.cfg.first_len);
        let pos = self.pos(&root);
        *self.at_mut(pos) = HashSlot {
            prefix: root,
            valid: true,
            timestamp: now,
            ..Default::default()
        };
        (root, pos)
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

    fn seed(&mut self, pkt: &Packet, prefix: Prefix) {
        let child = pkt.src.bit_at(prefix.len());
        let incs = self.admit(pkt, &prefix, child);
        let pos = self.pos(&prefix);
        *self.at_mut(pos) = HashSlot::seeded(prefix, pkt.timestamp, child, incs);
    }

    fn step(&mut self, pkt: &Packet, curr: Prefix, pos: Pos, sink: &mut dyn ReportSink) -> Step {
        let now = pkt.timestamp;
        let mut slot = *self.at(pos);

        if slot.prefix != curr {
            self.collisions += 1;
            counter!("hhhscan_collisions_total").increment(1);
            if self.cfg.collision_strategy == CollisionStrategy::Skip {
                return Step::Done;
            }
        }

        let len = curr.len();
        let child = pkt.src.bit_at(len);
        let prev = pkt.src.truncate(len.saturating_sub(1).max(self.cfg.first_len));
        let next = pkt.src.truncate((len + 1).min(self.cfg.last_len));

        if self.cfg.new_invalidation && self.is_stale(&slot, now) {
            if self.cfg.reports {
                sink.emit(&Report::Invalid { timestamp: now, prefix: curr, value: slot.summary });
            }
            counter!("hhhscan_invalid_total").increment(1);
            let stored = self.at_mut(pos);
            stored.valid = false;
            stored.timestamp = 0;
            return Step::Retry;
        }

        if slot.timestamp.saturating_add(self.schedule.active_timeout(len)) <= now {
            if slot.summary >= self.schedule.threshold(len) {
                sink.emit(&Report::Hhh { timestamp: now, prefix: curr, value: slot.summary });
                counter!("hhhscan_hhh_total").increment(1);
                self.seed(pkt, curr);
            } else {
                let stored = self.at_mut(pos);
                stored.valid = false;
                stored.timestamp = 0;
                if self.cfg.reports {
                    let report = if self.slot(&prev).is_some() {
                        Report::Collapse { timestamp: now, prefix: curr, value: slot.summary }
                    } else {
                        Report::Move { timestamp: now, prefix: curr, value: slot.summary }
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

        if len < self.cfg.last_len && slot.child_vals[child as usize] >= self.schedule.threshold(len) {
            if self.cfg.pure_heavy || self.cfg.reports {
                sink.emit(&Report::Expand { timestamp: now, prefix: curr, value: slot.summary });
            }
            counter!("hhhscan_expand_total").increment(1);
            slot.child_vals[child as usize] = 0;
            slot.summary = slot.child_vals[!child as usize];
            *self.at_mut(pos) = slot;
            self.seed(pkt, next);
            return Step::Done;
        }

        let (c, s) = self.admit(pkt, &curr, child);
        slot.child_vals[child as usize] += c;
        slot.summary += s;
        *self.at_mut(pos) = slot;
        Step::Done
    }
}

impl HhhModel for HashedEngine {
    fn process_packet(&mut self, pkt: &Packet, sink: &mut dyn ReportSink) -> bool {
        if !self.started {
            self.started = true;
            info!("start: {}", pkt.timestamp);
        }
        counter!("hhhscan_packets_total").increment(1);

        loop {
            let (curr, pos) = self.lookup(pkt);
            if let Step::Done = self.step(pkt, curr, pos, sink) {
                break;
            }
        }
        true
    }

    fn flush(&mut self, sink: &mut dyn ReportSink) {
        info!("collisions: {}", self.collisions);
        sink.emit(&Report::Collisions { count: self.collisions });
    }

    fn clear(&mut self) {
        for table in &mut self.tables {
            table.iter_mut().for_each(|slot| *slot = HashSlot::default());
        }
        if let Some(gate) = self.gate.as_mut() {
            gate.clear();
        }
        self.collisions = 0;
    }
}
