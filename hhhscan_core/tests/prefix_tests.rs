use hhhscan_core::helpers::mask;
use hhhscan_core::{Error, Prefix};
use ipnet::Ipv4Net;
use proptest::prelude::*;
use std::net::Ipv4Addr;

#[test]
fn parse_and_display() {
    let p: Prefix = "10.1.2.3/8".parse().unwrap();
    assert_eq!(p.to_string(), "10.0.0.0/8");
    assert_eq!(p.len(), 8);

    let host: Prefix = "192.168.0.1".parse().unwrap();
    assert_eq!(host, Prefix::from(Ipv4Addr::new(192, 168, 0, 1)));
    assert_eq!(host.len(), 32);

    assert!(matches!("300.1.1.1".parse::<Prefix>(), Err(Error::InvalidPrefix(_))));
    assert!(matches!("10.0.0.0/33".parse::<Prefix>(), Err(Error::InvalidPrefix(_))));
}

#[test]
fn ipnet_conversions() {
    let net: Ipv4Net = "172.16.5.0/12".parse().unwrap();
    let p = Prefix::from(net);
    assert_eq!(p.to_string(), "172.16.0.0/12");
    assert_eq!(p.to_net(), "172.16.0.0/12".parse::<Ipv4Net>().unwrap());
}

#[test]
fn parent_and_containment() {
    let p: Prefix = "10.128.0.0/9".parse().unwrap();
    assert_eq!(p.parent().to_string(), "10.0.0.0/8");
    assert!(p.parent().contains(&p));
    assert!(!p.contains(&p.parent()));
    let zero = Prefix::new(0, 0);
    assert_eq!(zero.parent(), zero);
    assert!(zero.contains(&p));
}

#[test]
fn child_selector_bit() {
    let host = Prefix::from(Ipv4Addr::new(10, 128, 0, 1));
    // 10 = 00001010, 128 = 10000000
    assert!(!host.bit_at(0));
    assert!(host.bit_at(4));
    assert!(host.bit_at(8));
    assert!(!host.bit_at(9));
    assert!(host.bit_at(31));
    assert!(!host.bit_at(32));
}

#[test]
fn same_bits_different_length_differ() {
    let a = Prefix::new(0x0A00_0000, 8);
    let b = Prefix::new(0x0A00_0000, 16);
    assert_ne!(a, b);
    assert!(a < b);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn truncation_is_canonical_and_idempotent(value in any::<u32>(), len in 0u8..=32, cut in 0u8..=32) {
        let p = Prefix::new(value, len);
        let l = cut.min(len);
        let t = p.truncate(l);
        prop_assert_eq!(t.truncate(l), t);
        prop_assert_eq!(t.len(), l);
        prop_assert_eq!(t.value() & !mask(l), 0);
        prop_assert!(t.contains(&p));
    }

    #[test]
    fn display_round_trips(value in any::<u32>(), len in 0u8..=32) {
        let p = Prefix::new(value, len);
        let back: Prefix = p.to_string().parse().unwrap();
        prop_assert_eq!(back, p);
    }
}
