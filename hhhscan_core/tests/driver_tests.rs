use hhhscan_core::driver::{extract, run_hashpipe, Driver, DriverOptions, InjectOptions};
use hhhscan_core::trace::{encode_record, TraceFormat, TraceReader, TraceWriter};
use hhhscan_core::telemetry::{self, MetricValue};
use hhhscan_core::{Config, Engine, Error, HhhModel, LineSink, Packet, ReportSink, Result};
use std::io::Cursor;
use std::net::Ipv4Addr;

/// Records what it is fed; refuses input after `limit` packets.
#[derive(Default)]
struct Tape {
    seen: Vec<(u64, Ipv4Addr)>,
    limit: Option<usize>,
    flushed: bool,
}

impl HhhModel for Tape {
    fn process_packet(&mut self, pkt: &Packet, _sink: &mut dyn ReportSink) -> bool {
        if self.limit.is_some_and(|l| self.seen.len() >= l) {
            return false;
        }
        self.seen.push((pkt.timestamp, pkt.src.addr()));
        true
    }

    fn flush(&mut self, _sink: &mut dyn ReportSink) {
        self.flushed = true;
    }

    fn clear(&mut self) {
        self.seen.clear();
    }
}

fn pkt(ts: u64, last: u8) -> Packet {
    Packet::v4(ts, 100, Ipv4Addr::new(10, 0, 0, last), Ipv4Addr::new(1, 1, 1, 1))
}

fn ok(packets: Vec<Packet>) -> impl Iterator<Item = Result<Packet>> {
    packets.into_iter().map(Ok)
}

fn v6(ts: u64) -> Packet {
    Packet { ip_version: 6, ..pkt(ts, 99) }
}

#[test]
fn drops_non_ipv4_and_skips_offset() {
    let mut driver = Driver::new(Tape::default(), DriverOptions { offset: 1_000 });
    let mut out = Vec::new();
    let stream = vec![v6(0), pkt(500, 1), pkt(999, 2), pkt(1_500, 3), v6(1_600), pkt(2_000, 4)];
    assert!(driver.run(ok(stream), &mut out).unwrap());

    let (tape, stats) = driver.finish(&mut out);
    // the v6 packet does not anchor the stream start
    assert_eq!(tape.seen.iter().map(|s| s.0).collect::<Vec<_>>(), vec![1_500, 2_000]);
    assert!(tape.flushed);
    assert_eq!(stats.packets, 2);
    assert_eq!(stats.bytes, 200);
}

#[test]
fn injected_packets_are_rebased_and_interleaved() {
    let mut driver = Driver::new(Tape::default(), DriverOptions::default());
    let inject = vec![pkt(50_000, 200), pkt(50_400, 201), pkt(60_000, 202)];
    driver
        .inject(ok(inject), InjectOptions { time: 1_500, num: 1, den: 1 })
        .unwrap();

    let mut out = Vec::new();
    let base: Vec<Packet> = (0..5).map(|i| pkt(i * 1_000, i as u8)).collect();
    driver.run(ok(base), &mut out).unwrap();
    let (tape, stats) = driver.finish(&mut out);

    assert_eq!(
        tape.seen,
        vec![
            (0, Ipv4Addr::new(10, 0, 0, 0)),
            (1_000, Ipv4Addr::new(10, 0, 0, 1)),
            (1_500, Ipv4Addr::new(10, 0, 0, 200)),
            (1_900, Ipv4Addr::new(10, 0, 0, 201)),
            (2_000, Ipv4Addr::new(10, 0, 0, 2)),
            (3_000, Ipv4Addr::new(10, 0, 0, 3)),
            (4_000, Ipv4Addr::new(10, 0, 0, 4)),
        ]
    );
    assert_eq!(stats.injected_packets, 2);
    assert_eq!(stats.packets, 7);
}

#[test]
fn injection_sampling_takes_num_of_den() {
    let mut driver = Driver::new(Tape::default(), DriverOptions::default());
    let inject: Vec<Packet> = (0..7).map(|i| pkt(i, 100 + i as u8)).collect();
    driver
        .inject(ok(inject), InjectOptions { time: 0, num: 1, den: 3 })
        .unwrap();
    let mut out = Vec::new();
    driver.run(ok(vec![pkt(0, 1), pkt(100, 2)]), &mut out).unwrap();
    let (tape, stats) = driver.finish(&mut out);

    let injected: Vec<u8> = tape
        .seen
        .iter()
        .map(|(_, a)| a.octets()[3])
        .filter(|o| *o >= 100)
        .collect();
    // the first one always, then every third
    assert_eq!(injected, vec![100, 103, 106]);
    assert_eq!(stats.injected_packets, 3);
}

#[test]
fn bad_sampling_is_rejected() {
    let mut driver = Driver::new(Tape::default(), DriverOptions::default());
    let err = driver
        .inject(ok(vec![]), InjectOptions { time: 0, num: 3, den: 2 })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSampling { num: 3, den: 2 }));
}

#[test]
fn stops_when_engine_refuses() {
    let tape = Tape { limit: Some(2), ..Tape::default() };
    let mut driver = Driver::new(tape, DriverOptions::default());
    let mut out = Vec::new();
    let more = driver.run(ok((0..10).map(|i| pkt(i, 1)).collect()), &mut out).unwrap();
    assert!(!more);
    assert!(driver.stopped());
    assert!(!driver.run(ok(vec![pkt(20, 1)]), &mut out).unwrap());
    let (tape, _) = driver.finish(&mut out);
    assert_eq!(tape.seen.len(), 2);
    assert!(tape.flushed);
}

#[test]
fn trace_file_feeds_engine_end_to_end() {
    hhhscan_core::init();
    let mut bytes = Vec::new();
    for i in 0..999u64 {
        bytes.extend_from_slice(&encode_record(&Packet::v4(
            i * 1_000,
            501,
            Ipv4Addr::new(10, 0, 0, 0),
            Ipv4Addr::from(i as u32),
        )));
    }
    bytes.extend_from_slice(&encode_record(&pkt(1_000_000, 0)));

    let render = || {
        let cfg = Config {
            threshold: Some(500_000),
            active_timeout: 1_000_000,
            ..Config::default()
        };
        let engine = Engine::from_config(cfg).unwrap();
        let mut driver = Driver::new(engine, DriverOptions::default());
        let mut sink = LineSink::new(Vec::new());
        driver.run(TraceReader::new(Cursor::new(bytes.clone())), &mut sink).unwrap();
        let (_, stats) = driver.finish(&mut sink);
        assert_eq!(stats.packets, 1_000);
        String::from_utf8(sink.finish().unwrap()).unwrap()
    };

    let text = render();
    assert_eq!(text, "timestamp: 1000000, event: hhh, prefix_found: 0.0.0.0/1, value: 500499\n");
    assert_eq!(text, render());
}

#[test]
fn extract_copies_one_interval() {
    let stream = vec![v6(100), pkt(150, 1), pkt(300, 2), pkt(400, 3), pkt(600, 4)];
    let mut writer = TraceWriter::new(Vec::new(), TraceFormat::Binary);
    // interval anchored at the first record, v6 included: [200, 500)
    let stats = extract(ok(stream), &mut writer, 100, 300).unwrap();
    assert_eq!(stats.packets, 2);

    let bytes = writer.finish().unwrap();
    let back: Vec<u64> = TraceReader::new(Cursor::new(bytes))
        .map(|p| p.unwrap().timestamp)
        .collect();
    assert_eq!(back, vec![300, 400]);
}

#[test]
fn trace_files_on_disk() {
    let path = std::env::temp_dir().join(format!("hhhscan_trace_{}.pdat", std::process::id()));
    let mut writer = TraceWriter::create(&path, TraceFormat::Binary).unwrap();
    for i in 0..3 {
        writer.write_packet(&pkt(i, i as u8)).unwrap();
    }
    writer.finish().unwrap();

    let packets: Vec<Packet> = TraceReader::open(&path).unwrap().collect::<Result<_>>().unwrap();
    assert_eq!(packets, vec![pkt(0, 0), pkt(1, 1), pkt(2, 2)]);
    let _ = std::fs::remove_file(&path);

    let missing = TraceReader::open(path.with_extension("missing")).err().unwrap();
    assert_eq!(missing.exit_code(), 1);
}

#[test]
fn hashpipe_over_interval() {
    let mut stream: Vec<Packet> = (0..50).map(|i| pkt(i, 7)).collect();
    stream.extend((50..60).map(|i| pkt(i, 8)));
    stream.push(pkt(1_000, 9));
    let (pipe, stats) = run_hashpipe(ok(stream), 2, 16, 0, 100).unwrap();
    assert_eq!(stats.packets, 60);
    let flows = pipe.get_flows();
    assert_eq!(flows[0], (Ipv4Addr::new(10, 0, 0, 7), 50));
    assert!(flows.iter().all(|(a, _)| *a != Ipv4Addr::new(10, 0, 0, 9)));

    assert!(run_hashpipe(ok(vec![]), 0, 16, 0, 0).is_err());
}

fn counter(name: &str) -> u64 {
    match telemetry::value(name) {
        Some(MetricValue::Counter(n)) => n,
        _ => 0,
    }
}

#[test]
fn recorder_counts_packets_and_skipped_records() {
    hhhscan_core::init();
    // other tests in this binary share the recorder, so compare deltas
    let packets_before = counter("hhhscan_packets_total");
    let skipped_before = counter("hhhscan_skipped_records_total");

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&encode_record(&pkt(0, 1)));
    bytes.extend_from_slice(&encode_record(&Packet { ip_version: 5, ..pkt(1, 2) }));
    bytes.extend_from_slice(&encode_record(&pkt(2, 3)));

    let mut engine = Engine::from_config(Config::default()).unwrap();
    let mut reader = TraceReader::new(Cursor::new(bytes));
    let mut out = Vec::new();
    for pkt in reader.by_ref() {
        engine.process_packet(&pkt.unwrap(), &mut out);
    }
    assert_eq!(reader.records(), 3);
    assert_eq!(reader.skipped(), 1);

    assert!(counter("hhhscan_packets_total") >= packets_before + 2);
    assert!(counter("hhhscan_skipped_records_total") > skipped_before);
    assert!(telemetry::snapshot().iter().any(|(name, _)| name == "hhhscan_active_nodes"));
}
