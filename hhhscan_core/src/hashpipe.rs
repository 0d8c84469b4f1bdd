//! HashPipe: cascading-hash approximate top-K of source addresses by
//! packet count.
//!
//! `stages` tables of `slots / stages` buckets each. A new key always
//! lands in the first stage, evicting whatever was there; evicted items
//! travel down the pipe and displace lighter entries on the way. Whatever
//! is still carried after the last stage is lost.

use crate::errors::{Error, Result};
use crate::types::Packet;
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::net::Ipv4Addr;
use twox_hash::XxHash64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Bucket {
    key: u32,
    /// Zero marks an empty bucket.
    count: u64,
}

#[derive(Debug, Clone)]
pub struct HashPipe {
    stages: usize,
    stage_len: usize,
    buckets: Vec<Bucket>,
}

impl HashPipe {
    pub fn new(stages: usize, slots: usize) -> Result<Self> {
        if stages == 0 || slots < stages {
            return Err(Error::InvalidHashPipe { stages, slots });
        }
        let stage_len = slots / stages;
        Ok(Self {
            stages,
            stage_len,
            buckets: vec![Bucket::default(); stage_len * stages],
        })
    }

    pub fn stages(&self) -> usize {
        self.stages
    }

    pub fn slots(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn index(&self, stage: usize, key: u32) -> usize {
        let mut h = XxHash64::with_seed(stage as u64);
        h.write(&key.to_be_bytes());
        stage * self.stage_len + (h.finish() % self.stage_len as u64) as usize
    }

    pub fn process_packet(&mut self, pkt: &Packet) {
        self.insert(pkt.src.value(), 1);
    }

    pub fn insert(&mut self, key: u32, count: u64) {
        let mut carried = Bucket { key, count };
        for stage in 0..self.stages {
            let idx = self.index(stage, carried.key);
            let bucket = &mut self.buckets[idx];

            if bucket.count == 0 {
                *bucket = carried;
                return;
            }
            if bucket.key == carried.key {
                bucket.count += carried.count;
                return;
            }
            if stage == 0 || bucket.count < carried.count {
                std::mem::swap(bucket, &mut carried);
            }
        }
    }

    /// Fold buckets by key, heaviest first; ties broken by address.
    pub fn get_flows(&self) -> Vec<(Ipv4Addr, u64)> {
        let mut folded: BTreeMap<u32, u64> = BTreeMap::new();
        for bucket in self.buckets.iter().filter(|b| b.count > 0) {
            *folded.entry(bucket.key).or_default() += bucket.count;
        }
        let mut flows: Vec<(Ipv4Addr, u64)> = folded
            .into_iter()
            .map(|(key, count)| (Ipv4Addr::from(key), count))
            .collect();
        flows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        flows
    }

    pub fn reset(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = Bucket::default());
    }
}
