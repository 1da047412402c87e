//! Per-protocol distributions of bytes, packets and bytes per packet.
//!
//! Each metric is counted into ten fixed buckets; a value lands in the
//! first bucket whose upper bound is at least the value. Quartiles are
//! interpolated linearly inside the bucket holding the quartile's
//! cumulative count. The overall group and TCP use one set of bounds;
//! every other protocol uses a set tuned for small datagrams.

use std::collections::BTreeMap;

use flowagg_types::record::{FlowRecord, IPPROTO_TCP};

pub const NUM_INTERVALS: usize = 10;

const TOP: u64 = u32::MAX as u64;

const TCP_BYTES: [u64; NUM_INTERVALS] =
    [40, 60, 100, 150, 256, 1000, 10000, 100000, 1000000, TOP];
const UDP_BYTES: [u64; NUM_INTERVALS] =
    [20, 40, 80, 130, 256, 1000, 10000, 100000, 1000000, TOP];
const PACKETS: [u64; NUM_INTERVALS] = [3, 4, 10, 20, 50, 100, 500, 1000, 10000, TOP];
const TCP_BPP: [u64; NUM_INTERVALS] = [40, 44, 60, 100, 200, 400, 600, 800, 1500, TOP];
const UDP_BPP: [u64; NUM_INTERVALS] = [20, 24, 40, 100, 200, 400, 600, 800, 1500, TOP];

/// One row of a bucket table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalBucket {
    /// Inclusive upper bound.
    pub max: u64,
    pub count: u64,
    pub percent: f64,
    pub cumulative_percent: f64,
}

/// Bucketed distribution of one metric.
#[derive(Debug, Clone)]
pub struct IntervalStats {
    bounds: &'static [u64; NUM_INTERVALS],
    counts: [u64; NUM_INTERVALS],
    min: u64,
    max: u64,
    total: u64,
}

impl IntervalStats {
    fn new(bounds: &'static [u64; NUM_INTERVALS]) -> Self {
        IntervalStats {
            bounds,
            counts: [0; NUM_INTERVALS],
            min: u64::MAX,
            max: 0,
            total: 0,
        }
    }

    pub fn add(&mut self, value: u64) {
        self.total += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let bucket = self
            .bounds
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(NUM_INTERVALS - 1);
        self.counts[bucket] += 1;
    }

    pub fn bounds(&self) -> &[u64; NUM_INTERVALS] {
        self.bounds
    }

    pub fn counts(&self) -> &[u64; NUM_INTERVALS] {
        &self.counts
    }

    /// Number of values added.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn min(&self) -> Option<u64> {
        (self.total > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<u64> {
        (self.total > 0).then_some(self.max)
    }

    fn cumulative(&self) -> [u64; NUM_INTERVALS] {
        let mut cum = self.counts;
        for i in 1..NUM_INTERVALS {
            cum[i] += cum[i - 1];
        }
        cum
    }

    /// Lower quartile, median and upper quartile.
    pub fn quartiles(&self) -> Option<[f64; 3]> {
        if self.total == 0 {
            return None;
        }
        let cum = self.cumulative();
        let quarter = self.total >> 2;
        let targets = [quarter, self.total >> 1, 3 * quarter];
        Some(targets.map(|vq| {
            let i = cum.iter().position(|&c| vq <= c).unwrap_or(NUM_INTERVALS - 1);
            let (blo, vlo) = if i == 0 {
                (0, 0)
            } else {
                (self.bounds[i - 1], cum[i - 1])
            };
            let (bhi, vhi) = (self.bounds[i], cum[i]);
            if vhi == vlo {
                return blo as f64;
            }
            blo as f64 + ((vq - vlo) as f64 / (vhi - vlo) as f64) * (bhi - blo) as f64
        }))
    }

    /// Bucket rows with percentages of `of`, which is normally the record
    /// count of the group.
    pub fn buckets(&self, of: u64) -> Vec<IntervalBucket> {
        let mut cumulative = 0u64;
        self.bounds
            .iter()
            .zip(self.counts.iter())
            .map(|(&max, &count)| {
                cumulative += count;
                let pct = |n: u64| if of == 0 { 0.0 } else { 100.0 * n as f64 / of as f64 };
                IntervalBucket {
                    max,
                    count,
                    percent: pct(count),
                    cumulative_percent: pct(cumulative),
                }
            })
            .collect()
    }
}

/// Statistics for one group of records.
#[derive(Debug, Clone)]
pub struct ProtocolSummary {
    pub records: u64,
    pub bytes: IntervalStats,
    pub packets: IntervalStats,
    pub bytes_per_packet: IntervalStats,
}

impl ProtocolSummary {
    fn new(tcp_tables: bool) -> Self {
        let (bytes, bpp) = if tcp_tables {
            (&TCP_BYTES, &TCP_BPP)
        } else {
            (&UDP_BYTES, &UDP_BPP)
        };
        ProtocolSummary {
            records: 0,
            bytes: IntervalStats::new(bytes),
            packets: IntervalStats::new(&PACKETS),
            bytes_per_packet: IntervalStats::new(bpp),
        }
    }

    fn add(&mut self, record: &FlowRecord) {
        self.records += 1;
        let bytes = u64::from(record.bytes);
        let packets = u64::from(record.packets);
        self.bytes.add(bytes);
        self.packets.add(packets);
        self.bytes_per_packet
            .add(bytes.checked_div(packets).unwrap_or(0));
    }
}

/// Overall statistics plus a breakdown for each requested protocol.
#[derive(Debug, Clone)]
pub struct ProtocolStatistics {
    overall: ProtocolSummary,
    detail: BTreeMap<u8, ProtocolSummary>,
}

impl ProtocolStatistics {
    pub fn new(detail_protocols: &[u8]) -> Self {
        ProtocolStatistics {
            overall: ProtocolSummary::new(true),
            detail: detail_protocols
                .iter()
                .map(|&p| (p, ProtocolSummary::new(p == IPPROTO_TCP)))
                .collect(),
        }
    }

    pub fn add_record(&mut self, record: &FlowRecord) {
        self.overall.add(record);
        if let Some(s) = self.detail.get_mut(&record.proto) {
            s.add(record);
        }
    }

    pub fn overall(&self) -> &ProtocolSummary {
        &self.overall
    }

    pub fn protocol(&self, proto: u8) -> Option<&ProtocolSummary> {
        self.detail.get(&proto)
    }

    /// Requested protocols in ascending order.
    pub fn protocols(&self) -> impl Iterator<Item = (u8, &ProtocolSummary)> {
        self.detail.iter().map(|(&p, s)| (p, s))
    }

    /// True when one requested protocol accounts for every record, making
    /// the overall group a duplicate of it.
    pub fn single_protocol_covers_all(&self) -> bool {
        self.overall.records > 0
            && self
                .detail
                .values()
                .any(|s| s.records == self.overall.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowagg_types::record::IPPROTO_UDP;

    fn rec(proto: u8, bytes: u32, packets: u32) -> FlowRecord {
        FlowRecord {
            proto,
            bytes,
            packets,
            ..Default::default()
        }
    }

    #[test]
    fn test_quartiles_within_one_bucket() {
        let mut s = IntervalStats::new(&TCP_BYTES);
        for _ in 0..4 {
            s.add(50);
        }
        assert_eq!(s.quartiles(), Some([45.0, 50.0, 55.0]));
        assert_eq!(s.min(), Some(50));
        assert_eq!(s.max(), Some(50));
    }

    #[test]
    fn test_quartiles_first_bucket() {
        let mut s = IntervalStats::new(&PACKETS);
        for v in [1, 1, 2, 2] {
            s.add(v);
        }
        // everything is in bucket 0 (<= 3)
        assert_eq!(s.quartiles(), Some([0.75, 1.5, 2.25]));
    }

    #[test]
    fn test_empty_has_no_quartiles() {
        let s = IntervalStats::new(&PACKETS);
        assert_eq!(s.quartiles(), None);
        assert_eq!(s.min(), None);
    }

    #[test]
    fn test_bucket_assignment_and_percent() {
        let mut s = IntervalStats::new(&UDP_BYTES);
        for v in [20, 21, 256, u64::from(u32::MAX)] {
            s.add(v);
        }
        assert_eq!(s.counts(), &[1, 1, 0, 0, 1, 0, 0, 0, 0, 1]);
        let rows = s.buckets(4);
        assert_eq!(rows[0].percent, 25.0);
        assert_eq!(rows[4].cumulative_percent, 75.0);
        assert_eq!(rows[9].cumulative_percent, 100.0);
    }

    #[test]
    fn test_protocol_breakdown() {
        let mut stats = ProtocolStatistics::new(&[IPPROTO_TCP, IPPROTO_UDP]);
        stats.add_record(&rec(6, 4000, 10));
        stats.add_record(&rec(17, 60, 1));
        stats.add_record(&rec(1, 84, 0));

        assert_eq!(stats.overall().records, 3);
        let tcp = stats.protocol(6).unwrap();
        assert_eq!(tcp.records, 1);
        assert_eq!(tcp.bytes_per_packet.max(), Some(400));
        assert_eq!(tcp.bytes.bounds()[0], 40);

        let udp = stats.protocol(17).unwrap();
        assert_eq!(udp.bytes.bounds()[0], 20);
        assert!(stats.protocol(1).is_none());

        // zero packets gives zero bytes per packet
        assert_eq!(stats.overall().bytes_per_packet.min(), Some(0));
        assert!(!stats.single_protocol_covers_all());
        let order: Vec<u8> = stats.protocols().map(|(p, _)| p).collect();
        assert_eq!(order, vec![6, 17]);
    }
}
