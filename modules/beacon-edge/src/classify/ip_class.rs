//! Address-space classification for the `_srv_ipType` token.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Where the client address lives in the IP address space. Geo lookups and
/// datacenter checks only make sense for `Public`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpClass {
    Public,
    Private,
    Loopback,
    Cgnat,
    LinkLocal,
    Multicast,
    Reserved,
    Broadcast,
    Benchmark,
    Documentation,
    Teredo,
    SixToFour,
}

impl IpClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpClass::Public => "Public",
            IpClass::Private => "Private",
            IpClass::Loopback => "Loopback",
            IpClass::Cgnat => "CGNAT",
            IpClass::LinkLocal => "LinkLocal",
            IpClass::Multicast => "Multicast",
            IpClass::Reserved => "Reserved",
            IpClass::Broadcast => "Broadcast",
            IpClass::Benchmark => "Benchmark",
            IpClass::Documentation => "Documentation",
            IpClass::Teredo => "TEREDO",
            IpClass::SixToFour => "6to4",
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, IpClass::Public)
    }
}

pub fn classify(ip: IpAddr) -> IpClass {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    }
}

fn classify_v4(ip: Ipv4Addr) -> IpClass {
    let octets = ip.octets();
    let bits = u32::from(ip);

    if ip.is_broadcast() {
        return IpClass::Broadcast;
    }
    if ip.is_loopback() {
        return IpClass::Loopback;
    }
    if ip.is_private() {
        return IpClass::Private;
    }
    // 100.64.0.0/10 — carrier-grade NAT
    if octets[0] == 100 && (octets[1] & 0xC0) == 64 {
        return IpClass::Cgnat;
    }
    if ip.is_link_local() {
        return IpClass::LinkLocal;
    }
    if ip.is_multicast() {
        return IpClass::Multicast;
    }
    // 198.18.0.0/15 — interconnect benchmarking
    if (bits >> 17) == (0xC612_0000u32 >> 17) {
        return IpClass::Benchmark;
    }
    if ip.is_documentation() {
        return IpClass::Documentation;
    }
    // 0.0.0.0/8, 192.0.0.0/24, 240.0.0.0/4
    if octets[0] == 0 || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0) || octets[0] >= 240
    {
        return IpClass::Reserved;
    }
    IpClass::Public
}

fn classify_v6(ip: Ipv6Addr) -> IpClass {
    let segments = ip.segments();

    if ip.is_loopback() {
        return IpClass::Loopback;
    }
    if ip.is_unspecified() {
        return IpClass::Reserved;
    }
    // 2001::/32 — Teredo tunneling
    if segments[0] == 0x2001 && segments[1] == 0 {
        return IpClass::Teredo;
    }
    // 2002::/16 — 6to4
    if segments[0] == 0x2002 {
        return IpClass::SixToFour;
    }
    // 2001:db8::/32 — documentation
    if segments[0] == 0x2001 && segments[1] == 0x0db8 {
        return IpClass::Documentation;
    }
    // fc00::/7 — unique local
    if (segments[0] & 0xFE00) == 0xFC00 {
        return IpClass::Private;
    }
    // fe80::/10 — link local
    if (segments[0] & 0xFFC0) == 0xFE80 {
        return IpClass::LinkLocal;
    }
    if ip.is_multicast() {
        return IpClass::Multicast;
    }
    IpClass::Public
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(s: &str) -> IpClass {
        classify(s.parse().unwrap())
    }

    #[test]
    fn classifies_v4_special_ranges() {
        assert_eq!(class("8.8.8.8"), IpClass::Public);
        assert_eq!(class("192.168.5.7"), IpClass::Private);
        assert_eq!(class("10.1.2.3"), IpClass::Private);
        assert_eq!(class("172.20.0.1"), IpClass::Private);
        assert_eq!(class("127.0.0.1"), IpClass::Loopback);
        assert_eq!(class("100.72.0.1"), IpClass::Cgnat);
        assert_eq!(class("169.254.1.1"), IpClass::LinkLocal);
        assert_eq!(class("224.0.0.5"), IpClass::Multicast);
        assert_eq!(class("255.255.255.255"), IpClass::Broadcast);
        assert_eq!(class("198.18.0.1"), IpClass::Benchmark);
        assert_eq!(class("198.19.255.1"), IpClass::Benchmark);
        assert_eq!(class("203.0.113.10"), IpClass::Documentation);
        assert_eq!(class("240.0.0.1"), IpClass::Reserved);
        assert_eq!(class("0.1.2.3"), IpClass::Reserved);
    }

    #[test]
    fn classifies_v6_special_ranges() {
        assert_eq!(class("::1"), IpClass::Loopback);
        assert_eq!(class("2001:0:53aa:64c:0:0:0:1"), IpClass::Teredo);
        assert_eq!(class("2002:c058:6301::1"), IpClass::SixToFour);
        assert_eq!(class("2001:db8::1"), IpClass::Documentation);
        assert_eq!(class("fd12:3456::1"), IpClass::Private);
        assert_eq!(class("fe80::1"), IpClass::LinkLocal);
        assert_eq!(class("ff02::1"), IpClass::Multicast);
        assert_eq!(class("2600:1f18::1"), IpClass::Public);
    }

    #[test]
    fn token_values_match_wire_contract() {
        assert_eq!(IpClass::Cgnat.as_str(), "CGNAT");
        assert_eq!(IpClass::Teredo.as_str(), "TEREDO");
        assert_eq!(IpClass::SixToFour.as_str(), "6to4");
    }
}
