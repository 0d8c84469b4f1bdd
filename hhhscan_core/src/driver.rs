//! Stream driver: feeds trace packets to an engine.
//!
//! Non-IPv4 packets are dropped, an optional start offset is skipped, and a
//! second trace can be injected into the stream at a chosen time with
//! `num`-out-of-`den` sampling. Packets must come in non-decreasing
//! timestamp order; injected packets are rebased to the base trace's clock.

use crate::engine::HhhModel;
use crate::errors::{Error, Result};
use crate::hashpipe::HashPipe;
use crate::report::ReportSink;
use crate::trace::TraceWriter;
use crate::types::Packet;
use log::{debug, info};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectOptions {
    /// Where the first injected packet lands, in microseconds after the
    /// start of the base trace.
    pub time: u64,
    pub num: u32,
    pub den: u32,
}

impl Default for InjectOptions {
    fn default() -> Self {
        Self { time: 0, num: 1, den: 1 }
    }
}

impl InjectOptions {
    pub fn validate(&self) -> Result<()> {
        if self.den == 0 || self.num == 0 || self.num > self.den {
            return Err(Error::InvalidSampling { num: self.num, den: self.den });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverOptions {
    /// Skip packets earlier than the first timestamp plus this, in microseconds.
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Packets handed to the engine, injected ones included.
    pub packets: u64,
    pub bytes: u64,
    pub injected_packets: u64,
    pub injected_bytes: u64,
}

type PacketSource = Box<dyn Iterator<Item = Result<Packet>>>;

struct Injector {
    source: PacketSource,
    opts: InjectOptions,
    /// Timestamp of the first injected packet before rebasing.
    start: u64,
    countdown: u32,
    pending: Option<Packet>,
}

impl Injector {
    /// Prime with the first IPv4 packet; that one is always taken.
    fn new(mut source: PacketSource, opts: InjectOptions) -> Result<Option<Self>> {
        for pkt in source.by_ref() {
            let pkt = pkt?;
            if !pkt.is_v4() {
                continue;
            }
            info!("injstart: {}", pkt.timestamp);
            return Ok(Some(Self {
                source,
                opts,
                start: pkt.timestamp,
                countdown: opts.den,
                pending: Some(pkt),
            }));
        }
        info!("injection trace holds no IPv4 packets");
        Ok(None)
    }

    /// Offset of the pending packet from the base trace start.
    fn due(&self, pkt: &Packet) -> u64 {
        pkt.timestamp.saturating_sub(self.start) + self.opts.time
    }

    fn advance(&mut self) -> Result<()> {
        self.pending = None;
        loop {
            if self.countdown == 0 {
                self.countdown = self.opts.den;
            }
            let Some(pkt) = self.source.next() else {
                debug!("injection trace exhausted");
                return Ok(());
            };
            let pkt = pkt?;
            if !pkt.is_v4() {
                continue;
            }
            self.countdown -= 1;
            if self.countdown >= self.opts.num {
                continue;
            }
            self.pending = Some(pkt);
            return Ok(());
        }
    }
}

pub struct Driver<M: HhhModel> {
    model: M,
    opts: DriverOptions,
    stats: DriverStats,
    start: Option<u64>,
    injector: Option<Injector>,
    stopped: bool,
}

impl<M: HhhModel> Driver<M> {
    pub fn new(model: M, opts: DriverOptions) -> Self {
        Self {
            model,
            opts,
            stats: DriverStats::default(),
            start: None,
            injector: None,
            stopped: false,
        }
    }

    /// Merge `source` into the stream.
    pub fn inject<I>(&mut self, source: I, opts: InjectOptions) -> Result<()>
    where
        I: IntoIterator<Item = Result<Packet>>,
        I::IntoIter: 'static,
    {
        opts.validate()?;
        self.injector = Injector::new(Box::new(source.into_iter()), opts)?;
        Ok(())
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    /// Whether the engine refused further input.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Feed one trace. Several traces may be fed in sequence; the first
    /// packet of the first one sets the stream start. Returns `false` once
    /// the engine has stopped.
    pub fn run<I>(&mut self, packets: I, sink: &mut dyn ReportSink) -> Result<bool>
    where
        I: IntoIterator<Item = Result<Packet>>,
    {
        for pkt in packets {
            if !self.feed(&pkt?, sink)? {
                return Ok(false);
            }
        }
        Ok(!self.stopped)
    }

    pub fn feed(&mut self, pkt: &Packet, sink: &mut dyn ReportSink) -> Result<bool> {
        if self.stopped {
            return Ok(false);
        }
        if !pkt.is_v4() {
            return Ok(true);
        }

        let start = match self.start {
            Some(start) => start,
            None => {
                info!("tracestart: {}", pkt.timestamp);
                info!("offsetstart: {}", pkt.timestamp + self.opts.offset);
                self.start = Some(pkt.timestamp);
                pkt.timestamp
            }
        };
        if start + self.opts.offset > pkt.timestamp {
            return Ok(true);
        }

        if let Some(inj) = self.injector.as_mut() {
            while let Some(mut injected) = inj.pending {
                let due = inj.due(&injected);
                if pkt.timestamp - start < due {
                    break;
                }
                injected.timestamp = start + due;
                self.stats.packets += 1;
                self.stats.bytes += injected.length as u64;
                self.stats.injected_packets += 1;
                self.stats.injected_bytes += injected.length as u64;
                let more = self.model.process_packet(&injected, sink);
                inj.advance()?;
                if !more {
                    self.stopped = true;
                    return Ok(false);
                }
            }
        }

        self.stats.packets += 1;
        self.stats.bytes += pkt.length as u64;
        if !self.model.process_packet(pkt, sink) {
            self.stopped = true;
            return Ok(false);
        }
        Ok(true)
    }

    /// Flush the engine and hand back the model with the final counters.
    pub fn finish(mut self, sink: &mut dyn ReportSink) -> (M, DriverStats) {
        self.model.flush(sink);
        info!("{} packets, {} bytes processed", self.stats.packets, self.stats.bytes);
        if self.stats.injected_packets > 0 {
            info!(
                "{} packets, {} bytes injected",
                self.stats.injected_packets, self.stats.injected_bytes
            );
        }
        (self.model, self.stats)
    }
}

/// The `[first + offset, first + offset + time)` interval of a trace, with
/// `time == 0` meaning open-ended. The first packet of any IP version
/// anchors the interval; only IPv4 packets inside it pass.
struct Interval {
    offset: u64,
    time: u64,
    bounds: Option<(u64, u64)>,
}

impl Interval {
    fn new(offset: u64, time: u64) -> Self {
        Self { offset, time, bounds: None }
    }

    fn admits(&mut self, pkt: &Packet) -> bool {
        let (begin, end) = *self.bounds.get_or_insert_with(|| {
            let begin = pkt.timestamp + self.offset;
            let end = if self.time == 0 { u64::MAX } else { begin + self.time };
            (begin, end)
        });
        pkt.is_v4() && pkt.timestamp >= begin && pkt.timestamp < end
    }
}

/// Copy the IPv4 packets of one time interval into `writer`.
pub fn extract<I, W>(packets: I, writer: &mut TraceWriter<W>, offset: u64, time: u64) -> Result<DriverStats>
where
    I: IntoIterator<Item = Result<Packet>>,
    W: Write,
{
    let mut interval = Interval::new(offset, time);
    let mut stats = DriverStats::default();
    for pkt in packets {
        let pkt = pkt?;
        if !interval.admits(&pkt) {
            continue;
        }
        writer.write_packet(&pkt)?;
        stats.packets += 1;
        stats.bytes += pkt.length as u64;
    }
    info!("{} packets, {} bytes processed", stats.packets, stats.bytes);
    Ok(stats)
}

/// Feed one time interval to a HashPipe sketch of `stages` x `slots`.
pub fn run_hashpipe<I>(packets: I, stages: usize, slots: usize, offset: u64, time: u64) -> Result<(HashPipe, DriverStats)>
where
    I: IntoIterator<Item = Result<Packet>>,
{
    let mut pipe = HashPipe::new(stages, slots)?;
    let mut interval = Interval::new(offset, time);
    let mut stats = DriverStats::default();
    for pkt in packets {
        let pkt = pkt?;
        if !interval.admits(&pkt) {
            continue;
        }
        pipe.process_packet(&pkt);
        stats.packets += 1;
        stats.bytes += pkt.length as u64;
    }
    info!("Processed {} packets, {} bytes.", stats.packets, stats.bytes);
    Ok((pipe, stats))
}
