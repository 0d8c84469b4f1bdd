//! Packet trace files.
//!
//! A trace is a flat sequence of fixed 24-byte little-endian records:
//!
//! ```text
//! 0       8      12   13      16     20     24
//! | ts_us | len  | ver | pad  | src  | dst  |
//! ```
//!
//! Addresses are stored as their numeric value. The CSV flavour written by
//! [`TraceWriter`] carries only the source address.

use crate::constants::RECORD_LEN;
use crate::errors::{Error, Result};
use crate::types::{Packet, Prefix};
use log::{debug, warn};
use metrics::counter;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

pub type Record = [u8; RECORD_LEN];

pub fn encode_record(pkt: &Packet) -> Record {
    let mut rec = [0u8; RECORD_LEN];
    rec[0..8].copy_from_slice(&pkt.timestamp.to_le_bytes());
    rec[8..12].copy_from_slice(&pkt.length.to_le_bytes());
    rec[12] = pkt.ip_version;
    rec[16..20].copy_from_slice(&pkt.src.value().to_le_bytes());
    rec[20..24].copy_from_slice(&pkt.dst.value().to_le_bytes());
    rec
}

/// Decode one record; `index` is only used in the error.
pub fn decode_record(rec: &Record, index: u64) -> Result<Packet> {
    let u32_at = |at: usize| u32::from_le_bytes([rec[at], rec[at + 1], rec[at + 2], rec[at + 3]]);
    let ip_version = rec[12];
    if ip_version != 4 && ip_version != 6 {
        return Err(Error::MalformedRecord {
            index,
            reason: format!("ip version {ip_version}"),
        });
    }
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&rec[0..8]);
    Ok(Packet {
        timestamp: u64::from_le_bytes(ts),
        length: u32_at(8),
        ip_version,
        src: Prefix::host(u32_at(16)),
        dst: Prefix::host(u32_at(20)),
    })
}

/// Iterator over the packets of a binary trace.
///
/// A truncated final record ends the stream with a warning. Records with an
/// unknown IP version are skipped.
pub struct TraceReader<R: Read> {
    inner: R,
    index: u64,
    skipped: u64,
    done: bool,
}

impl TraceReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("opening trace {}", path.display());
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> TraceReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            index: 0,
            skipped: 0,
            done: false,
        }
    }

    /// Records read so far, skipped ones included.
    pub fn records(&self) -> u64 {
        self.index
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Fill `rec` completely. `Ok(false)` on a clean end of stream.
    fn fill(&mut self, rec: &mut Record) -> io::Result<bool> {
        let mut filled = 0;
        while filled < RECORD_LEN {
            match self.inner.read(&mut rec[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if filled == 0 {
            return Ok(false);
        }
        if filled < RECORD_LEN {
            warn!(
                "trace truncated: record {} has {} of {} bytes, ignoring it",
                self.index, filled, RECORD_LEN
            );
            return Ok(false);
        }
        Ok(true)
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut rec = [0u8; RECORD_LEN];
        while !self.done {
            match self.fill(&mut rec) {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
            let index = self.index;
            self.index += 1;
            match decode_record(&rec, index) {
                Ok(pkt) => return Some(Ok(pkt)),
                Err(e) => {
                    warn!("{}, skipping", e);
                    self.skipped += 1;
                    counter!("hhhscan_skipped_records_total").increment(1);
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceFormat {
    #[default]
    Binary,
    /// `src,0.0.0.0,0,0,0` per packet.
    Csv,
}

pub struct TraceWriter<W: Write> {
    out: W,
    format: TraceFormat,
    written: u64,
}

impl TraceWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>, format: TraceFormat) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?), format))
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(out: W, format: TraceFormat) -> Self {
        Self {
            out,
            format,
            written: 0,
        }
    }

    pub fn write_packet(&mut self, pkt: &Packet) -> Result<()> {
        match self.format {
            TraceFormat::Binary => self.out.write_all(&encode_record(pkt))?,
            TraceFormat::Csv => writeln!(self.out, "{},0.0.0.0,0,0,0", pkt.src.addr())?,
        }
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}
