//! End-to-end aggregation tests: per-key sums and distinct counts, spill
//! invariance, agreement between the random and presorted drivers, and
//! ranking.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::ops::ControlFlow;
use std::path::Path;

use flowagg_engine::fields::{BinFields, FieldId, FieldList};
use flowagg_engine::presorted::PresortedUnique;
use flowagg_engine::topn::{Direction, LimitMode, PrimaryColumn, RankConfig, TopNRanker};
use flowagg_engine::{MemoryPool, Unique, UniqueConfig};
use flowagg_types::error::ErrorCode;
use flowagg_types::record::FlowRecord;

type Bin = (Vec<u8>, Vec<u8>, Vec<u64>);

fn config(dir: &Path, memory_limit: usize) -> UniqueConfig {
    UniqueConfig {
        temp_dir: Some(dir.to_path_buf()),
        sort_output: true,
        total_distinct: false,
        hash_initial_capacity: 1024,
        memory_limit,
        max_open_files: 8,
        spill_compression: false,
    }
}

fn ip(n: u32) -> IpAddr {
    IpAddr::V4(Ipv4Addr::from(n))
}

/// sip key; sum-bytes and record count; distinct dport.
fn sip_fields() -> BinFields {
    BinFields::new(
        FieldList::from_ids(&[FieldId::SIPv4]).unwrap(),
        FieldList::from_ids(&[FieldId::SumBytes, FieldId::Records]).unwrap(),
        FieldList::from_ids(&[FieldId::DPort]).unwrap(),
    )
    .unwrap()
}

fn u64_at(buf: &[u8], at: usize) -> u64 {
    u64::from_ne_bytes(buf[at..at + 8].try_into().unwrap())
}

/// Deterministic pseudo-random records over `keys` source addresses.
fn generate(n: usize, keys: u32, seed: u64) -> Vec<FlowRecord> {
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as u32
    };
    (0..n)
        .map(|_| FlowRecord {
            sip: ip(0x0a00_0000 + next() % keys),
            dport: (next() % 2000) as u16,
            bytes: next() % 100_000,
            packets: 1 + next() % 50,
            ..Default::default()
        })
        .collect()
}

fn sip_bits(r: &FlowRecord) -> u32 {
    match r.sip {
        IpAddr::V4(v4) => u32::from(v4),
        IpAddr::V6(_) => 0,
    }
}

fn collect(u: &mut Unique) -> Vec<Bin> {
    let mut out = Vec::new();
    u.process(|b| {
        out.push((b.key.to_vec(), b.value.to_vec(), b.distinct_counts.to_vec()));
        ControlFlow::Continue(())
    })
    .unwrap();
    out
}

fn collect_presorted(p: &mut PresortedUnique) -> Vec<Bin> {
    let mut out = Vec::new();
    p.process(|b| {
        out.push((b.key.to_vec(), b.value.to_vec(), b.distinct_counts.to_vec()));
        ControlFlow::Continue(())
    })
    .unwrap();
    out
}

/// (sum bytes, records, distinct dports) per source address.
fn reference(records: &[FlowRecord]) -> BTreeMap<u32, (u64, u64, BTreeSet<u16>)> {
    let mut m: BTreeMap<u32, (u64, u64, BTreeSet<u16>)> = BTreeMap::new();
    for r in records {
        let e = m.entry(sip_bits(r)).or_default();
        e.0 += u64::from(r.bytes);
        e.1 += 1;
        e.2.insert(r.dport);
    }
    m
}

fn check_against_reference(bins: &[Bin], records: &[FlowRecord]) {
    let expected = reference(records);
    assert_eq!(bins.len(), expected.len());
    for ((key, value, counts), (sip, (bytes, n, ports))) in bins.iter().zip(&expected) {
        assert_eq!(key, &sip.to_ne_bytes().to_vec());
        assert_eq!(u64_at(value, 0), *bytes);
        assert_eq!(u64_at(value, 8), *n);
        assert_eq!(counts[0], ports.len() as u64);
    }
}

/// Packet and time aggregates per source address, no distinct fields.
fn time_value_fields() -> BinFields {
    BinFields::new(
        FieldList::from_ids(&[FieldId::SIPv4]).unwrap(),
        FieldList::from_ids(&[
            FieldId::SumPackets,
            FieldId::SumElapsed,
            FieldId::SumElapsedMsec,
            FieldId::MinStartTime,
            FieldId::MaxEndTime,
            FieldId::MinStartTimeMsec,
            FieldId::MaxEndTimeMsec,
        ])
        .unwrap(),
        FieldList::new(),
    )
    .unwrap()
}

/// `generate`, with start times spread over a day and durations up to
/// twenty minutes.
fn generate_timed(n: usize, keys: u32, seed: u64) -> Vec<FlowRecord> {
    let mut state = seed ^ 0x5eed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as u32
    };
    generate(n, keys, seed)
        .into_iter()
        .map(|r| FlowRecord {
            start_time: 1_400_000_000_000 + i64::from(next() % 86_400_000),
            elapsed: next() % 1_200_000,
            ..r
        })
        .collect()
}

fn time_reference(records: &[FlowRecord]) -> BTreeMap<u32, [u64; 7]> {
    let mut m: BTreeMap<u32, [u64; 7]> = BTreeMap::new();
    for r in records {
        let e = m
            .entry(sip_bits(r))
            .or_insert([0, 0, 0, u64::MAX, 0, u64::MAX, 0]);
        e[0] += u64::from(r.packets);
        e[1] += u64::from(r.elapsed_seconds());
        e[2] += u64::from(r.elapsed);
        e[3] = e[3].min(u64::from(r.start_seconds()));
        e[4] = e[4].max(u64::from(r.end_seconds()));
        e[5] = e[5].min(r.start_time as u64);
        e[6] = e[6].max(r.end_time() as u64);
    }
    m
}

#[test]
fn test_time_aggregates_survive_spills() {
    let records = generate_timed(20_000, 700, 11);
    let fields = time_value_fields();
    let run = |memory_limit: usize| {
        let parent = tempfile::tempdir().unwrap();
        let mut u = Unique::new(time_value_fields(), config(parent.path(), memory_limit)).unwrap();
        for r in &records {
            u.add_record(r).unwrap();
        }
        let spills = u.spill_count();
        let on_disk = u
            .temp_dir()
            .map_or(0, |d| std::fs::read_dir(d).unwrap().count());
        (collect(&mut u), spills, on_disk)
    };

    let (large, large_spills, _) = run(256 << 20);
    let (small, small_spills, on_disk) = run(16 << 10);
    assert_eq!(large_spills, 0);
    assert!(small_spills >= 2, "expected several spills, got {}", small_spills);
    // every spill is a main file plus its (empty) companion
    assert_eq!(on_disk, 2 * small_spills);
    assert_eq!(small, large);

    let expected = time_reference(&records);
    assert_eq!(large.len(), expected.len());
    let values = fields.value();
    for ((key, value, _), (sip, want)) in large.iter().zip(&expected) {
        assert_eq!(key, &sip.to_ne_bytes().to_vec());
        let got: Vec<u64> = (0..7).map(|i| values.column_u64(i, value).unwrap()).collect();
        assert_eq!(&got[..], &want[..], "source {:#x}", sip);
    }
}

#[test]
fn test_sum_bytes_by_source() {
    let dir = tempfile::tempdir().unwrap();
    let fields = BinFields::new(
        FieldList::from_ids(&[FieldId::SIPv4]).unwrap(),
        FieldList::from_ids(&[FieldId::SumBytes]).unwrap(),
        FieldList::new(),
    )
    .unwrap();
    let mut u = Unique::new(fields, config(dir.path(), 1 << 20)).unwrap();
    for (sip, bytes) in [(0x0a00_0001, 100), (0x0a00_0002, 50), (0x0a00_0001, 25)] {
        u.add_record(&FlowRecord {
            sip: ip(sip),
            bytes,
            ..Default::default()
        })
        .unwrap();
    }
    let bins = collect(&mut u);
    assert_eq!(bins.len(), 2);
    assert_eq!(bins[0].0, 0x0a00_0001u32.to_ne_bytes().to_vec());
    assert_eq!(u64_at(&bins[0].1, 0), 125);
    assert_eq!(bins[1].0, 0x0a00_0002u32.to_ne_bytes().to_vec());
    assert_eq!(u64_at(&bins[1].1, 0), 50);
}

#[test]
fn test_distinct_ports_per_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let fields = BinFields::new(
        FieldList::from_ids(&[FieldId::Proto]).unwrap(),
        FieldList::new(),
        FieldList::from_ids(&[FieldId::DPort]).unwrap(),
    )
    .unwrap();
    let mut u = Unique::new(fields, config(dir.path(), 1 << 20)).unwrap();
    for (proto, dport) in [(6, 80), (6, 443), (6, 80), (17, 53)] {
        u.add_record(&FlowRecord {
            proto,
            dport,
            ..Default::default()
        })
        .unwrap();
    }
    let bins = collect(&mut u);
    let got: Vec<(u8, u64)> = bins.iter().map(|(k, _, c)| (k[0], c[0])).collect();
    assert_eq!(got, vec![(6, 2), (17, 1)]);
}

#[test]
fn test_spill_invariance_and_cleanup() {
    let records = generate(20_000, 3_000, 7);
    let run = |memory_limit: usize| {
        let parent = tempfile::tempdir().unwrap();
        let mut cfg = config(parent.path(), memory_limit);
        cfg.total_distinct = true;
        let mut u = Unique::new(sip_fields(), cfg).unwrap();
        for r in &records {
            u.add_record(r).unwrap();
        }
        let spills = u.spill_count();
        let total = u.total_distinct_count().unwrap();
        let bins = collect(&mut u);
        drop(u);
        let leftover = std::fs::read_dir(parent.path()).unwrap().count();
        (bins, spills, total, leftover)
    };

    let (large, large_spills, large_total, _) = run(256 << 20);
    let (small, small_spills, small_total, leftover) = run(64 << 10);
    assert_eq!(large_spills, 0);
    assert!(small_spills >= 3, "expected several spills, got {}", small_spills);
    assert_eq!(small, large);
    assert_eq!(leftover, 0);

    check_against_reference(&large, &records);
    let ports: BTreeSet<u16> = records.iter().map(|r| r.dport).collect();
    assert_eq!(large_total, Some(ports.len() as u64));
    assert_eq!(small_total, large_total);
}

#[test]
fn test_compressed_spills_match() {
    let records = generate(5_000, 1_000, 11);
    let parent = tempfile::tempdir().unwrap();
    let mut cfg = config(parent.path(), 32 << 10);
    cfg.spill_compression = true;
    let mut u = Unique::new(sip_fields(), cfg).unwrap();
    for r in &records {
        u.add_record(r).unwrap();
    }
    assert!(u.spill_count() > 0);
    check_against_reference(&collect(&mut u), &records);
}

#[test]
fn test_presorted_matches_random() {
    let records = generate(6_000, 500, 3);
    let dir = tempfile::tempdir().unwrap();

    // every record twice through the random driver
    let mut u = Unique::new(sip_fields(), config(dir.path(), 64 << 20)).unwrap();
    for r in records.iter().chain(records.iter()) {
        u.add_record(r).unwrap();
    }
    let random = collect(&mut u);

    // the same multiset as sorted runs of different sizes
    let mut p = PresortedUnique::new(sip_fields(), config(dir.path(), 64 << 20)).unwrap();
    let (a, b) = records.split_at(1_000);
    for part in [a, b, &records[..]] {
        let mut sorted = part.to_vec();
        sorted.sort_by_key(sip_bits);
        p.add_input(sorted.into_iter());
    }
    let presorted = collect_presorted(&mut p);
    assert_eq!(presorted, random);
    assert_eq!(p.records(), 12_000);
}

#[test]
fn test_presorted_many_inputs_and_total_distinct() {
    let records = generate(3_000, 200, 5);
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), 64 << 20);
    cfg.total_distinct = true;
    cfg.max_open_files = 4;
    let mut p = PresortedUnique::new(sip_fields(), cfg).unwrap();
    for chunk in records.chunks(300) {
        let mut sorted = chunk.to_vec();
        sorted.sort_by_key(sip_bits);
        p.add_input(sorted.into_iter());
    }
    let bins = collect_presorted(&mut p);
    check_against_reference(&bins, &records);
    let ports: BTreeSet<u16> = records.iter().map(|r| r.dport).collect();
    assert_eq!(p.total_distinct_count(), Some(ports.len() as u64));
}

#[test]
fn test_presorted_distinct_union_across_streams() {
    let dir = tempfile::tempdir().unwrap();
    let fields = BinFields::new(
        FieldList::from_ids(&[FieldId::SIPv4]).unwrap(),
        FieldList::from_ids(&[FieldId::Records]).unwrap(),
        FieldList::from_ids(&[FieldId::DIPv4]).unwrap(),
    )
    .unwrap();
    // each stream has 40 destinations per key; they overlap on 20
    let stream = |first_dip: u32| {
        let mut v = Vec::new();
        for key in 0..50u32 {
            for d in 0..40u32 {
                v.push(FlowRecord {
                    sip: ip(0xc0a8_0000 + key),
                    dip: ip(0x0a00_0000 + first_dip + d),
                    ..Default::default()
                });
            }
        }
        v
    };
    let mut p = PresortedUnique::new(fields, config(dir.path(), 64 << 20)).unwrap();
    p.add_input(stream(0).into_iter());
    p.add_input(stream(20).into_iter());
    let bins = collect_presorted(&mut p);
    assert_eq!(bins.len(), 50);
    for (_, value, counts) in &bins {
        assert_eq!(u64_at(value, 0), 80);
        assert_eq!(counts[0], 60);
    }
}

#[test]
fn test_presorted_unsorted_input_code() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = PresortedUnique::new(sip_fields(), config(dir.path(), 1 << 20)).unwrap();
    let mut records = generate(100, 50, 1);
    records.sort_by_key(|r| std::cmp::Reverse(sip_bits(r)));
    p.add_input(records.into_iter());
    let err = p.process(|_| ControlFlow::Continue(())).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InputUnsortedInPresortedMode);
}

fn records_fields() -> BinFields {
    BinFields::new(
        FieldList::from_ids(&[FieldId::SIPv4]).unwrap(),
        FieldList::from_ids(&[FieldId::Records]).unwrap(),
        FieldList::new(),
    )
    .unwrap()
}

fn rank_all(u: &mut Unique, rank: RankConfig, total: Option<u64>) -> Vec<(u32, u64)> {
    let pool = MemoryPool::new(1 << 20);
    let mut ranker = TopNRanker::new(rank, u.fields(), &pool).unwrap();
    if let Some(t) = total {
        ranker.set_total(t);
    }
    u.process(|b| {
        ranker.offer(b).unwrap();
        ControlFlow::Continue(())
    })
    .unwrap();
    ranker
        .finish()
        .bins
        .iter()
        .map(|b| (u32::from_ne_bytes(b.key[..4].try_into().unwrap()), b.primary))
        .collect()
}

#[test]
fn test_top_two_by_records() {
    let dir = tempfile::tempdir().unwrap();
    let mut u = Unique::new(records_fields(), config(dir.path(), 1 << 20)).unwrap();
    for sip in [1, 1, 1, 2, 3] {
        u.add_record(&FlowRecord {
            sip: ip(sip),
            ..Default::default()
        })
        .unwrap();
    }
    let rank = RankConfig {
        mode: LimitMode::Count(2),
        direction: Direction::Top,
        primary: PrimaryColumn::Value(0),
    };
    // 2 and 3 tie; 2 is offered first in key order
    assert_eq!(rank_all(&mut u, rank, None), vec![(1, 3), (2, 1)]);
}

#[test]
fn test_percentage_cutoff() {
    let dir = tempfile::tempdir().unwrap();
    let fields = BinFields::new(
        FieldList::from_ids(&[FieldId::SIPv4]).unwrap(),
        FieldList::from_ids(&[FieldId::SumBytes]).unwrap(),
        FieldList::new(),
    )
    .unwrap();
    let mut u = Unique::new(fields, config(dir.path(), 1 << 20)).unwrap();
    for (sip, bytes) in [(1, 600), (2, 300), (3, 100)] {
        u.add_record(&FlowRecord {
            sip: ip(sip),
            bytes,
            ..Default::default()
        })
        .unwrap();
    }
    let rank = RankConfig {
        mode: LimitMode::Percentage(25.0),
        direction: Direction::Top,
        primary: PrimaryColumn::Value(0),
    };
    assert_eq!(rank_all(&mut u, rank, Some(1000)), vec![(1, 600), (2, 300)]);
}

#[test]
fn test_bottom_n_after_spills() {
    let records = generate(8_000, 1_500, 9);
    let dir = tempfile::tempdir().unwrap();
    let mut u = Unique::new(sip_fields(), config(dir.path(), 48 << 10)).unwrap();
    for r in &records {
        u.add_record(r).unwrap();
    }
    assert!(u.spill_count() > 0);
    let rank = RankConfig {
        mode: LimitMode::Count(5),
        direction: Direction::Bottom,
        primary: PrimaryColumn::Value(0),
    };
    let got = rank_all(&mut u, rank, None);

    let mut expected: Vec<(u32, u64)> = reference(&records)
        .into_iter()
        .map(|(sip, (bytes, _, _))| (sip, bytes))
        .collect();
    // ascending bytes; equal sums keep key order
    expected.sort_by_key(|&(_, bytes)| bytes);
    expected.truncate(5);
    assert_eq!(got, expected);
}
