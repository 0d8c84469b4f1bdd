use hhhscan_core::offline::OfflineEngine;
use hhhscan_core::{Config, CountMode, EngineKind, HhhModel, Packet, Prefix, Report};
use proptest::collection::vec as pvec;
use proptest::prelude::*;
use std::net::Ipv4Addr;

fn p(s: &str) -> Prefix {
    s.parse().unwrap()
}

fn offline_cfg(first_len: u8, threshold: u64) -> Config {
    Config {
        engine: EngineKind::Offline,
        first_len,
        threshold: Some(threshold),
        active_timeout: 0,
        mode: CountMode::Packets,
        ..Config::default()
    }
}

/// `(last octet, count)` leaves under 1.0.0.0, all at ts 5.
fn feed(engine: &mut OfflineEngine, leaves: &[(u8, usize)], out: &mut Vec<Report>) {
    for &(octet, count) in leaves {
        for _ in 0..count {
            let pkt = Packet::v4(5, 100, Ipv4Addr::new(1, 0, 0, octet), Ipv4Addr::new(9, 9, 9, 9));
            assert!(engine.process_packet(&pkt, out));
        }
    }
}

const LEAVES: [(u8, usize); 5] = [(0, 10), (1, 4), (2, 3), (3, 3), (4, 2)];

#[test]
fn hhh_children_are_not_counted_twice() {
    let mut engine = OfflineEngine::new(Config { pure_heavy: true, ..offline_cfg(30, 10) }).unwrap();
    let mut out = Vec::new();
    feed(&mut engine, &LEAVES, &mut out);
    assert!(out.is_empty());
    engine.flush(&mut out);

    let window = |hhh: bool, prefix: &str, value: u64| Report::Window { timestamp: 5, hhh, prefix: p(prefix), value };
    assert_eq!(
        out,
        vec![
            // 1.0.0.0/31 gives only its non-HHH half (4), 1.0.0.2/31 all 6
            window(true, "1.0.0.0/30", 10),
            window(true, "1.0.0.0/32", 10),
            window(false, "1.0.0.0/30", 20),
            window(false, "1.0.0.0/31", 14),
            window(false, "1.0.0.0/32", 10),
        ]
    );
}

#[test]
fn hierarchy_values_add_up() {
    let engine = {
        let mut e = OfflineEngine::new(offline_cfg(28, 4)).unwrap();
        feed(&mut e, &LEAVES, &mut Vec::new());
        e
    };
    let tree = engine.build_hierarchy(4);
    for (prefix, node) in &tree {
        if prefix.len() == 32 {
            continue;
        }
        let children: Vec<_> = tree
            .iter()
            .filter(|(c, _)| c.len() == prefix.len() + 1 && c.parent() == *prefix)
            .map(|(_, n)| n)
            .collect();
        assert!(!children.is_empty());
        let hh: u64 = children.iter().map(|c| c.hh_value).sum();
        let hhh: u64 = children.iter().filter(|c| !c.hhh).map(|c| c.hhh_value).sum();
        assert_eq!(node.hh_value, hh, "{prefix}");
        assert_eq!(node.hhh_value, hhh, "{prefix}");
    }
}

#[test]
fn quotient_scales_with_window_total() {
    let cfg = Config {
        threshold: None,
        quotient: Some(0.5),
        ..offline_cfg(30, 0)
    };
    cfg.validate().unwrap();
    let mut engine = OfflineEngine::new(cfg).unwrap();
    let mut out = Vec::new();
    feed(&mut engine, &LEAVES, &mut out);
    assert_eq!(engine.window_threshold(), 11);
    engine.flush(&mut out);
    assert_eq!(
        out,
        vec![Report::Window { timestamp: 5, hhh: true, prefix: p("1.0.0.0/31"), value: 14 }]
    );
}

#[test]
fn windows_roll_over_and_first_shot_stops() {
    let cfg = Config { active_timeout: 100, ..offline_cfg(32, 1) };
    let at = |ts: u64, a: u8| Packet::v4(ts, 1, Ipv4Addr::new(a, a, a, a), Ipv4Addr::new(9, 9, 9, 9));

    let mut engine = OfflineEngine::new(cfg.clone()).unwrap();
    let mut out = Vec::new();
    assert!(engine.process_packet(&at(0, 1), &mut out));
    assert!(engine.process_packet(&at(250, 2), &mut out));
    engine.flush(&mut out);
    assert_eq!(
        out,
        vec![
            Report::Window { timestamp: 100, hhh: true, prefix: p("1.1.1.1/32"), value: 1 },
            Report::Window { timestamp: 300, hhh: true, prefix: p("2.2.2.2/32"), value: 1 },
        ]
    );

    let mut engine = OfflineEngine::new(Config { first_shot: true, ..cfg }).unwrap();
    let mut out = Vec::new();
    assert!(engine.process_packet(&at(0, 1), &mut out));
    assert!(engine.process_packet(&at(50, 1), &mut out));
    assert!(!engine.process_packet(&at(150, 2), &mut out));
    engine.flush(&mut out);
    assert_eq!(
        out,
        vec![Report::Window { timestamp: 100, hhh: true, prefix: p("1.1.1.1/32"), value: 2 }]
    );
}

#[test]
fn clear_restarts_the_window_clock() {
    let cfg = Config { active_timeout: 100, ..offline_cfg(32, 1) };
    let mut engine = OfflineEngine::new(cfg).unwrap();
    let mut out = Vec::new();
    let at = |ts: u64, a: u8| Packet::v4(ts, 1, Ipv4Addr::new(a, a, a, a), Ipv4Addr::new(9, 9, 9, 9));

    engine.process_packet(&at(0, 1), &mut out);
    engine.clear();
    assert_eq!(engine.leaf_count(), 0);

    // a new stream anchors its own window
    engine.process_packet(&at(5_050, 2), &mut out);
    engine.flush(&mut out);
    assert_eq!(
        out,
        vec![Report::Window { timestamp: 5_150, hhh: true, prefix: p("2.2.2.2/32"), value: 1 }]
    );
}

#[test]
fn flows_mode_unions_destinations() {
    let cfg = Config {
        mode: CountMode::Flows,
        pure_heavy: true,
        ..offline_cfg(31, 2)
    };
    let mut engine = OfflineEngine::new(cfg).unwrap();
    let mut out = Vec::new();
    let flow = |s: u8, d: u8| Packet::v4(1, 60, Ipv4Addr::new(1, 0, 0, s), Ipv4Addr::new(2, 0, 0, d));
    for pkt in [flow(0, 1), flow(0, 1), flow(0, 2), flow(1, 2)] {
        engine.process_packet(&pkt, &mut out);
    }
    engine.flush(&mut out);
    assert_eq!(
        out,
        vec![
            Report::Window { timestamp: 1, hhh: true, prefix: p("1.0.0.0/32"), value: 2 },
            Report::Window { timestamp: 1, hhh: false, prefix: p("1.0.0.0/31"), value: 2 },
            Report::Window { timestamp: 1, hhh: false, prefix: p("1.0.0.0/32"), value: 2 },
        ]
    );
}

#[test]
fn leaf_reports_list_every_counter() {
    let mut engine = OfflineEngine::new(Config { reports: true, ..offline_cfg(30, 1_000) }).unwrap();
    let mut out = Vec::new();
    feed(&mut engine, &LEAVES, &mut out);
    engine.flush(&mut out);
    let leaves: Vec<String> = out.iter().map(|r| r.to_string()).collect();
    assert_eq!(leaves.len(), 5);
    assert_eq!(leaves[0], "timestamp,5,report,prefix,1.0.0.0/32,value,10");
    assert_eq!(leaves[4], "timestamp,5,report,prefix,1.0.0.4/32,value,2");
}

fn hhh_count(sources: &[u32], threshold: u64) -> usize {
    let mut engine = OfflineEngine::new(offline_cfg(16, threshold)).unwrap();
    let mut out = Vec::new();
    for (i, src) in sources.iter().enumerate() {
        let pkt = Packet::v4(i as u64, 1, Ipv4Addr::from(0x0A00_0000 | src), Ipv4Addr::new(9, 9, 9, 9));
        engine.process_packet(&pkt, &mut out);
    }
    engine.flush(&mut out);
    out.iter().filter(|r| r.is_hhh()).count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn raising_threshold_never_adds_hhh(
        sources in pvec(0u32..0x400, 1..300),
        low in 1u64..20,
        delta in 0u64..20,
    ) {
        let high = low + delta;
        prop_assert!(hhh_count(&sources, high) <= hhh_count(&sources, low));
    }
}
