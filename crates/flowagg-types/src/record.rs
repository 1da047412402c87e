//! The flow record handed to the aggregator.
//!
//! Records are produced by an external reader. Times are milliseconds since
//! the UNIX epoch; the duration is carried separately so the end time is
//! always `start + elapsed`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

/// One network flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRecord {
    pub sip: IpAddr,
    pub dip: IpAddr,
    pub nhip: IpAddr,
    pub sport: u16,
    pub dport: u16,
    pub proto: u8,
    pub packets: u32,
    pub bytes: u32,
    pub flags: u8,
    pub init_flags: u8,
    pub rest_flags: u8,
    pub tcp_state: u8,
    pub application: u16,
    /// Start time, milliseconds since the epoch.
    pub start_time: i64,
    /// Duration in milliseconds.
    pub elapsed: u32,
    pub sensor: u16,
    pub input: u16,
    pub output: u16,
    pub flowtype_class: u8,
    pub flowtype: u8,
}

impl Default for FlowRecord {
    fn default() -> Self {
        FlowRecord {
            sip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            nhip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            sport: 0,
            dport: 0,
            proto: 0,
            packets: 0,
            bytes: 0,
            flags: 0,
            init_flags: 0,
            rest_flags: 0,
            tcp_state: 0,
            application: 0,
            start_time: 0,
            elapsed: 0,
            sensor: 0,
            input: 0,
            output: 0,
            flowtype_class: 0,
            flowtype: 0,
        }
    }
}

impl FlowRecord {
    pub fn is_ipv6(&self) -> bool {
        self.sip.is_ipv6()
    }

    pub fn is_icmp(&self) -> bool {
        self.proto == IPPROTO_ICMP || (self.proto == IPPROTO_ICMPV6 && self.is_ipv6())
    }

    /// ICMP type, encoded in the high byte of the destination port.
    pub fn icmp_type(&self) -> u8 {
        if self.is_icmp() {
            (self.dport >> 8) as u8
        } else {
            0
        }
    }

    pub fn icmp_code(&self) -> u8 {
        if self.is_icmp() {
            (self.dport & 0xFF) as u8
        } else {
            0
        }
    }

    /// Saturates at `i64::MAX` for start times at the end of the range.
    pub fn end_time(&self) -> i64 {
        self.start_time.saturating_add(i64::from(self.elapsed))
    }

    pub fn start_seconds(&self) -> u32 {
        (self.start_time.div_euclid(1000)) as u32
    }

    pub fn end_seconds(&self) -> u32 {
        (self.end_time().div_euclid(1000)) as u32
    }

    pub fn elapsed_seconds(&self) -> u32 {
        self.elapsed / 1000
    }
}

/// The IPv4 form of an address, if it has one.
///
/// IPv6 addresses narrow only when they are IPv4-mapped (`::ffff:a.b.c.d`).
pub fn to_ipv4(addr: &IpAddr) -> Option<Ipv4Addr> {
    match addr {
        IpAddr::V4(v4) => Some(*v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

/// The IPv6 form of an address; IPv4 widens to `::ffff:a.b.c.d`.
pub fn to_ipv6(addr: &IpAddr) -> Ipv6Addr {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => *v6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_fields() {
        let rec = FlowRecord {
            proto: IPPROTO_ICMP,
            dport: (8 << 8) | 3,
            ..Default::default()
        };
        assert_eq!(rec.icmp_type(), 8);
        assert_eq!(rec.icmp_code(), 3);

        let tcp = FlowRecord {
            proto: IPPROTO_TCP,
            dport: (8 << 8) | 3,
            ..Default::default()
        };
        assert_eq!(tcp.icmp_type(), 0);
        assert_eq!(tcp.icmp_code(), 0);

        // ICMPv6 only counts over IPv6
        let v4_58 = FlowRecord {
            proto: IPPROTO_ICMPV6,
            dport: 0x8000,
            ..Default::default()
        };
        assert_eq!(v4_58.icmp_type(), 0);
    }

    #[test]
    fn test_times() {
        let rec = FlowRecord {
            start_time: 1_500_000_123_456,
            elapsed: 2_500,
            ..Default::default()
        };
        assert_eq!(rec.start_seconds(), 1_500_000_123);
        assert_eq!(rec.end_time(), 1_500_000_125_956);
        assert_eq!(rec.end_seconds(), 1_500_000_125);
        assert_eq!(rec.elapsed_seconds(), 2);
    }

    #[test]
    fn test_end_time_saturates() {
        let rec = FlowRecord {
            start_time: i64::MAX - 10,
            elapsed: 1_000,
            ..Default::default()
        };
        assert_eq!(rec.end_time(), i64::MAX);
    }

    #[test]
    fn test_address_conversion() {
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let widened = to_ipv6(&v4);
        assert_eq!(widened, "::ffff:10.0.0.1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(to_ipv4(&IpAddr::V6(widened)), Some(Ipv4Addr::new(10, 0, 0, 1)));

        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(to_ipv4(&v6), None);
    }
}
