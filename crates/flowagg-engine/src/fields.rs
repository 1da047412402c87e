//! Field descriptors and field lists.
//!
//! A field list is an ordered schema of fixed-width binary columns. The
//! same machinery describes the key of a bin, its aggregate values, and
//! the columns whose distinct values are counted. Built-in columns are
//! dispatched by tag; caller-defined columns go through [`CallerField`].
//!
//! Integers are stored in host byte order at their natural width and
//! compare numerically. IPv6 addresses are 16 bytes in network order and
//! compare bytewise.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::net::Ipv4Addr;
use std::num::NonZeroU64;
use std::sync::Arc;

use tracing::warn;

use flowagg_types::error::{FlowAggError, Result};
use flowagg_types::record::{to_ipv4, to_ipv6, FlowRecord};
use flowagg_types::serialization::{get_uint, max_uint, put_uint_saturating};

/// Maximum number of descriptors in one list.
pub const MAX_FIELDS: usize = 64;
/// Maximum sum of descriptor widths in one list.
pub const MAX_ROW_WIDTH: usize = 256;

/// Built-in columns. The first group is extracted from a record; the
/// second group are aggregates computed over the records of a bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldId {
    SIPv4 = 0,
    DIPv4,
    SPort,
    DPort,
    Proto,
    Packets,
    Bytes,
    Flags,
    StartTime,
    Elapsed,
    EndTime,
    Sensor,
    Input,
    Output,
    NHIPv4,
    InitFlags,
    RestFlags,
    TcpState,
    Application,
    FtypeClass,
    FtypeType,
    StartTimeMsec,
    EndTimeMsec,
    ElapsedMsec,
    IcmpType,
    IcmpCode,
    SIPv6,
    DIPv6,
    NHIPv6,
    Records,
    SumPackets,
    SumBytes,
    SumElapsed,
    SumElapsedMsec,
    MinStartTime,
    MaxEndTime,
    MinStartTimeMsec,
    MaxEndTimeMsec,
}

impl FieldId {
    pub const ALL: [FieldId; 38] = [
        FieldId::SIPv4,
        FieldId::DIPv4,
        FieldId::SPort,
        FieldId::DPort,
        FieldId::Proto,
        FieldId::Packets,
        FieldId::Bytes,
        FieldId::Flags,
        FieldId::StartTime,
        FieldId::Elapsed,
        FieldId::EndTime,
        FieldId::Sensor,
        FieldId::Input,
        FieldId::Output,
        FieldId::NHIPv4,
        FieldId::InitFlags,
        FieldId::RestFlags,
        FieldId::TcpState,
        FieldId::Application,
        FieldId::FtypeClass,
        FieldId::FtypeType,
        FieldId::StartTimeMsec,
        FieldId::EndTimeMsec,
        FieldId::ElapsedMsec,
        FieldId::IcmpType,
        FieldId::IcmpCode,
        FieldId::SIPv6,
        FieldId::DIPv6,
        FieldId::NHIPv6,
        FieldId::Records,
        FieldId::SumPackets,
        FieldId::SumBytes,
        FieldId::SumElapsed,
        FieldId::SumElapsedMsec,
        FieldId::MinStartTime,
        FieldId::MaxEndTime,
        FieldId::MinStartTimeMsec,
        FieldId::MaxEndTimeMsec,
    ];

    /// Binary width in bytes.
    pub const fn width(self) -> usize {
        use FieldId::*;
        match self {
            Proto | Flags | InitFlags | RestFlags | TcpState | FtypeClass | FtypeType
            | IcmpType | IcmpCode => 1,
            SPort | DPort | Sensor | Input | Output | Application => 2,
            SIPv4 | DIPv4 | NHIPv4 | Packets | Bytes | StartTime | Elapsed | EndTime
            | ElapsedMsec | SumElapsed | MinStartTime | MaxEndTime => 4,
            StartTimeMsec | EndTimeMsec | Records | SumPackets | SumBytes | SumElapsedMsec
            | MinStartTimeMsec | MaxEndTimeMsec => 8,
            SIPv6 | DIPv6 | NHIPv6 => 16,
        }
    }

    /// True for columns computed over a bin rather than read from a record.
    pub const fn is_aggregate(self) -> bool {
        (self as u8) >= (FieldId::Records as u8)
    }

    /// True for the start and end time columns that can be binned.
    pub const fn is_timestamp(self) -> bool {
        matches!(
            self,
            FieldId::StartTime | FieldId::EndTime | FieldId::StartTimeMsec | FieldId::EndTimeMsec
        )
    }

    const fn starts_at_max(self) -> bool {
        matches!(self, FieldId::MinStartTime | FieldId::MinStartTimeMsec)
    }

    pub fn name(self) -> &'static str {
        use FieldId::*;
        match self {
            SIPv4 => "sIPv4",
            DIPv4 => "dIPv4",
            SPort => "sPort",
            DPort => "dPort",
            Proto => "protocol",
            Packets => "packets",
            Bytes => "bytes",
            Flags => "flags",
            StartTime => "sTime",
            Elapsed => "duration",
            EndTime => "eTime",
            Sensor => "sensor",
            Input => "in",
            Output => "out",
            NHIPv4 => "nhIPv4",
            InitFlags => "initialFlags",
            RestFlags => "sessionFlags",
            TcpState => "attributes",
            Application => "application",
            FtypeClass => "class",
            FtypeType => "type",
            StartTimeMsec => "sTime+msec",
            EndTimeMsec => "eTime+msec",
            ElapsedMsec => "duration+msec",
            IcmpType => "iType",
            IcmpCode => "iCode",
            SIPv6 => "sIPv6",
            DIPv6 => "dIPv6",
            NHIPv6 => "nhIPv6",
            Records => "Records",
            SumPackets => "Packets",
            SumBytes => "Bytes",
            SumElapsed => "Duration",
            SumElapsedMsec => "Duration+msec",
            MinStartTime => "sTime-Earliest",
            MaxEndTime => "eTime-Latest",
            MinStartTimeMsec => "sTime+msec-Earliest",
            MaxEndTimeMsec => "eTime+msec-Latest",
        }
    }
}

impl TryFrom<u8> for FieldId {
    type Error = FlowAggError;

    fn try_from(v: u8) -> Result<Self> {
        FieldId::ALL
            .get(v as usize)
            .copied()
            .ok_or_else(|| FlowAggError::Config(format!("Unknown field identifier {}", v)))
    }
}

/// A column supplied by the caller.
///
/// Implementations used as aggregate values must make `merge` commutative
/// and associative, and `initial_value` an identity for it: partial
/// aggregates from spill files are combined in unspecified order.
pub trait CallerField: Send + Sync {
    fn name(&self) -> &str;

    /// Binary width in bytes.
    fn width(&self) -> usize;

    /// Write this column's bytes for `record` (key and distinct use).
    fn record_to_bin(&self, _record: &FlowRecord, _out: &mut [u8]) {}

    /// Fold `record` into a running aggregate (value use).
    fn add_record(&self, _record: &FlowRecord, _acc: &mut [u8]) {}

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    /// `acc <- merge(acc, other)`.
    fn merge(&self, _acc: &mut [u8], _other: &[u8]) {}

    /// Starting value of an aggregate; all zeros when `None`.
    fn initial_value(&self) -> Option<&[u8]> {
        None
    }
}

#[derive(Clone)]
pub enum FieldKind {
    Builtin(FieldId),
    Caller(Arc<dyn CallerField>),
}

/// Opaque caller data attached to a descriptor.
pub type FieldContext = Arc<dyn Any + Send + Sync>;

/// Width of the time bins a start or end time key is floored to.
///
/// Attached to a timestamp field as its context, either through
/// [`FieldList::add_time_bin`] or [`FieldList::add_known_with_context`].
/// Records whose times fall in the same bin share a key. Second-resolution
/// fields floor the binned millisecond time to whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBin {
    millis: NonZeroU64,
}

impl TimeBin {
    pub fn from_seconds(seconds: u32) -> Result<Self> {
        Self::from_millis(u64::from(seconds) * 1000)
    }

    pub fn from_millis(millis: u64) -> Result<Self> {
        NonZeroU64::new(millis)
            .filter(|m| m.get() <= i64::MAX as u64)
            .map(|millis| TimeBin { millis })
            .ok_or_else(|| FlowAggError::Config(format!("Invalid time bin size {}ms", millis)))
    }

    pub fn millis(&self) -> u64 {
        self.millis.get()
    }

    /// True when the bin size is not a whole number of seconds.
    pub fn uses_millis(&self) -> bool {
        self.millis.get() % 1000 != 0
    }

    /// Floor a millisecond time to the start of its bin.
    pub fn floor(&self, time: i64) -> i64 {
        let size = self.millis.get() as i64;
        time - time.rem_euclid(size)
    }
}

/// One column of a field list.
#[derive(Clone)]
pub struct FieldDescriptor {
    kind: FieldKind,
    width: usize,
    offset: usize,
    context: Option<FieldContext>,
    time_bin: Option<TimeBin>,
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name())
            .field("width", &self.width)
            .field("offset", &self.offset)
            .finish()
    }
}

impl FieldDescriptor {
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// The built-in identifier, or `None` for caller fields.
    pub fn id(&self) -> Option<FieldId> {
        match self.kind {
            FieldKind::Builtin(id) => Some(id),
            FieldKind::Caller(_) => None,
        }
    }

    pub fn is_caller(&self) -> bool {
        matches!(self.kind, FieldKind::Caller(_))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Byte offset of this column inside a row of its list.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn context(&self) -> Option<&FieldContext> {
        self.context.as_ref()
    }

    /// The bin size when this is a binned timestamp.
    pub fn time_bin(&self) -> Option<TimeBin> {
        self.time_bin
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            FieldKind::Builtin(id) => id.name(),
            FieldKind::Caller(c) => c.name(),
        }
    }

    /// True if both descriptors describe the same column.
    pub fn same_column(&self, other: &FieldDescriptor) -> bool {
        match (&self.kind, &other.kind) {
            (FieldKind::Builtin(a), FieldKind::Builtin(b)) => a == b,
            (FieldKind::Caller(a), FieldKind::Caller(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn extract(&self, rec: &FlowRecord, out: &mut [u8]) {
        let id = match &self.kind {
            FieldKind::Builtin(id) => *id,
            FieldKind::Caller(c) => return c.record_to_bin(rec, out),
        };
        use FieldId::*;
        match id {
            SIPv4 => out.copy_from_slice(&ipv4_bits(&rec.sip).to_ne_bytes()),
            DIPv4 => out.copy_from_slice(&ipv4_bits(&rec.dip).to_ne_bytes()),
            NHIPv4 => out.copy_from_slice(&ipv4_bits(&rec.nhip).to_ne_bytes()),
            SIPv6 => out.copy_from_slice(&to_ipv6(&rec.sip).octets()),
            DIPv6 => out.copy_from_slice(&to_ipv6(&rec.dip).octets()),
            NHIPv6 => out.copy_from_slice(&to_ipv6(&rec.nhip).octets()),
            SPort => out.copy_from_slice(&rec.sport.to_ne_bytes()),
            DPort => out.copy_from_slice(&rec.dport.to_ne_bytes()),
            Sensor => out.copy_from_slice(&rec.sensor.to_ne_bytes()),
            Input => out.copy_from_slice(&rec.input.to_ne_bytes()),
            Output => out.copy_from_slice(&rec.output.to_ne_bytes()),
            Application => out.copy_from_slice(&rec.application.to_ne_bytes()),
            Proto => out[0] = rec.proto,
            Flags => out[0] = rec.flags,
            InitFlags => out[0] = rec.init_flags,
            RestFlags => out[0] = rec.rest_flags,
            TcpState => out[0] = rec.tcp_state,
            FtypeClass => out[0] = rec.flowtype_class,
            FtypeType => out[0] = rec.flowtype,
            IcmpType => out[0] = rec.icmp_type(),
            IcmpCode => out[0] = rec.icmp_code(),
            Packets => out.copy_from_slice(&rec.packets.to_ne_bytes()),
            Bytes => out.copy_from_slice(&rec.bytes.to_ne_bytes()),
            StartTime => out.copy_from_slice(&self.binned_seconds(rec.start_time).to_ne_bytes()),
            Elapsed => out.copy_from_slice(&rec.elapsed_seconds().to_ne_bytes()),
            EndTime => out.copy_from_slice(&self.binned_seconds(rec.end_time()).to_ne_bytes()),
            StartTimeMsec => out.copy_from_slice(&self.binned_millis(rec.start_time).to_ne_bytes()),
            EndTimeMsec => out.copy_from_slice(&self.binned_millis(rec.end_time()).to_ne_bytes()),
            ElapsedMsec => out.copy_from_slice(&rec.elapsed.to_ne_bytes()),
            Records | SumPackets | SumBytes | SumElapsed | SumElapsedMsec | MinStartTime
            | MaxEndTime | MinStartTimeMsec | MaxEndTimeMsec => out.fill(0),
        }
    }

    fn binned_millis(&self, time: i64) -> u64 {
        match self.time_bin {
            Some(bin) => bin.floor(time) as u64,
            None => time as u64,
        }
    }

    fn binned_seconds(&self, time: i64) -> u32 {
        let time = self.time_bin.map_or(time, |bin| bin.floor(time));
        time.div_euclid(1000) as u32
    }

    fn accumulate(&self, rec: &FlowRecord, acc: &mut [u8]) {
        let id = match &self.kind {
            FieldKind::Builtin(id) => *id,
            FieldKind::Caller(c) => return c.add_record(rec, acc),
        };
        use FieldId::*;
        match id {
            Records => add_saturating(acc, 1, id),
            SumPackets => add_saturating(acc, u64::from(rec.packets), id),
            SumBytes => add_saturating(acc, u64::from(rec.bytes), id),
            SumElapsed => add_saturating(acc, u64::from(rec.elapsed_seconds()), id),
            SumElapsedMsec => add_saturating(acc, u64::from(rec.elapsed), id),
            MinStartTime => keep_min(acc, u64::from(rec.start_seconds())),
            MaxEndTime => keep_max(acc, u64::from(rec.end_seconds())),
            MinStartTimeMsec => keep_min(acc, rec.start_time as u64),
            MaxEndTimeMsec => keep_max(acc, rec.end_time() as u64),
            _ => {}
        }
    }

    fn merge(&self, acc: &mut [u8], other: &[u8]) {
        let id = match &self.kind {
            FieldKind::Builtin(id) => *id,
            FieldKind::Caller(c) => return c.merge(acc, other),
        };
        use FieldId::*;
        match id {
            Records | SumPackets | SumBytes | SumElapsed | SumElapsedMsec => {
                add_saturating(acc, get_uint(other), id)
            }
            MinStartTime | MinStartTimeMsec => keep_min(acc, get_uint(other)),
            MaxEndTime | MaxEndTimeMsec => keep_max(acc, get_uint(other)),
            _ => {}
        }
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match &self.kind {
            FieldKind::Caller(c) => c.compare(a, b),
            FieldKind::Builtin(_) => match self.width {
                1 | 2 | 4 | 8 => get_uint(a).cmp(&get_uint(b)),
                _ => a.cmp(b),
            },
        }
    }

    fn initialize(&self, out: &mut [u8]) {
        match &self.kind {
            FieldKind::Builtin(id) if id.starts_at_max() => out.fill(0xFF),
            FieldKind::Caller(c) => {
                if let Some(init) = c.initial_value() {
                    let n = init.len().min(out.len());
                    out[..n].copy_from_slice(&init[..n]);
                }
            }
            _ => {}
        }
    }
}

fn ipv4_bits(addr: &std::net::IpAddr) -> u32 {
    u32::from(to_ipv4(addr).unwrap_or(Ipv4Addr::UNSPECIFIED))
}

fn add_saturating(acc: &mut [u8], delta: u64, id: FieldId) {
    let current = get_uint(acc);
    let max = max_uint(acc.len());
    match current.checked_add(delta).filter(|&sum| sum <= max) {
        Some(sum) => put_uint_saturating(acc, sum),
        None => {
            warn!(field = id.name(), "aggregate overflow; value saturated");
            put_uint_saturating(acc, max);
        }
    }
}

fn keep_min(acc: &mut [u8], v: u64) {
    if v < get_uint(acc) {
        put_uint_saturating(acc, v);
    }
}

fn keep_max(acc: &mut [u8], v: u64) {
    if v > get_uint(acc) {
        put_uint_saturating(acc, v);
    }
}

/// Ordered collection of descriptors forming one binary row.
#[derive(Clone, Default, Debug)]
pub struct FieldList {
    fields: Vec<FieldDescriptor>,
    row_width: usize,
}

impl FieldList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list of built-in fields.
    pub fn from_ids(ids: &[FieldId]) -> Result<Self> {
        let mut list = FieldList::new();
        for &id in ids {
            list.add_known(id)?;
        }
        Ok(list)
    }

    pub fn add_known(&mut self, id: FieldId) -> Result<&FieldDescriptor> {
        self.push(FieldKind::Builtin(id), id.width(), None)
    }

    /// Add a built-in field carrying `context`. A [`TimeBin`] context is
    /// only accepted on a timestamp field.
    pub fn add_known_with_context(
        &mut self,
        id: FieldId,
        context: FieldContext,
    ) -> Result<&FieldDescriptor> {
        self.push(FieldKind::Builtin(id), id.width(), Some(context))
    }

    /// Add a start or end time field floored to `bin`.
    pub fn add_time_bin(&mut self, id: FieldId, bin: TimeBin) -> Result<&FieldDescriptor> {
        self.add_known_with_context(id, Arc::new(bin))
    }

    pub fn add_caller(&mut self, field: Arc<dyn CallerField>) -> Result<&FieldDescriptor> {
        let width = field.width();
        self.push(FieldKind::Caller(field), width, None)
    }

    pub fn add_caller_with_context(
        &mut self,
        field: Arc<dyn CallerField>,
        context: FieldContext,
    ) -> Result<&FieldDescriptor> {
        let width = field.width();
        self.push(FieldKind::Caller(field), width, Some(context))
    }

    fn push(
        &mut self,
        kind: FieldKind,
        width: usize,
        context: Option<FieldContext>,
    ) -> Result<&FieldDescriptor> {
        if self.fields.len() >= MAX_FIELDS {
            return Err(FlowAggError::Config(format!(
                "Field list is full ({} fields)",
                MAX_FIELDS
            )));
        }
        if width == 0 || self.row_width + width > MAX_ROW_WIDTH {
            return Err(FlowAggError::Config(format!(
                "Field of width {} does not fit in a {}-byte row holding {} bytes",
                width, MAX_ROW_WIDTH, self.row_width
            )));
        }
        let time_bin = context
            .as_ref()
            .and_then(|c| c.downcast_ref::<TimeBin>())
            .copied();
        if time_bin.is_some() && !matches!(&kind, FieldKind::Builtin(id) if id.is_timestamp()) {
            return Err(FlowAggError::Config(
                "Time binning applies only to start and end time fields".into(),
            ));
        }
        let offset = self.row_width;
        self.row_width += width;
        self.fields.push(FieldDescriptor {
            kind,
            width,
            offset,
            context,
            time_bin,
        });
        Ok(&self.fields[self.fields.len() - 1])
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sum of descriptor widths.
    pub fn row_width(&self) -> usize {
        self.row_width
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldDescriptor> {
        self.fields.iter()
    }

    pub fn get(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    pub fn position(&self, id: FieldId) -> Option<usize> {
        self.fields.iter().position(|f| f.id() == Some(id))
    }

    pub fn contains(&self, field: &FieldDescriptor) -> bool {
        self.fields.iter().any(|f| f.same_column(field))
    }

    /// The bytes of column `index` within `row`.
    pub fn column<'a>(&self, index: usize, row: &'a [u8]) -> &'a [u8] {
        let f = &self.fields[index];
        &row[f.offset..f.offset + f.width]
    }

    /// Column `index` of `row` as an integer, for columns of at most 8 bytes.
    pub fn column_u64(&self, index: usize, row: &[u8]) -> Option<u64> {
        let f = self.fields.get(index)?;
        (f.width <= 8).then(|| get_uint(&row[f.offset..f.offset + f.width]))
    }

    /// Concatenate every column's bytes for `record` into `out`.
    pub fn record_to_binary(&self, record: &FlowRecord, out: &mut [u8]) {
        for f in &self.fields {
            f.extract(record, &mut out[f.offset..f.offset + f.width]);
        }
    }

    /// Fold `record` into the running aggregates held in `row`.
    pub fn add_record_to_buffer(&self, record: &FlowRecord, row: &mut [u8]) {
        for f in &self.fields {
            f.accumulate(record, &mut row[f.offset..f.offset + f.width]);
        }
    }

    /// `a <- merge(a, b)` column by column.
    pub fn merge_buffers(&self, a: &mut [u8], b: &[u8]) {
        for f in &self.fields {
            let range = f.offset..f.offset + f.width;
            f.merge(&mut a[range.clone()], &b[range]);
        }
    }

    /// Lexicographic comparison, column by column.
    pub fn compare_buffers(&self, a: &[u8], b: &[u8]) -> Ordering {
        for f in &self.fields {
            let range = f.offset..f.offset + f.width;
            match f.compare(&a[range.clone()], &b[range]) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Compare only column `index` of two rows.
    pub fn compare_column(&self, index: usize, a: &[u8], b: &[u8]) -> Ordering {
        let f = &self.fields[index];
        let range = f.offset..f.offset + f.width;
        f.compare(&a[range.clone()], &b[range])
    }

    /// Zero `out`, then apply each column's starting value.
    pub fn initialize_buffer(&self, out: &mut [u8]) {
        out[..self.row_width].fill(0);
        for f in &self.fields {
            f.initialize(&mut out[f.offset..f.offset + f.width]);
        }
    }
}

/// The three field lists that shape a bin, validated together.
#[derive(Clone, Debug)]
pub struct BinFields {
    key: FieldList,
    value: FieldList,
    distinct: FieldList,
}

impl BinFields {
    pub fn new(key: FieldList, value: FieldList, distinct: FieldList) -> Result<Self> {
        if key.is_empty() {
            return Err(FlowAggError::Config("No key fields specified".into()));
        }
        if value.is_empty() && distinct.is_empty() {
            return Err(FlowAggError::Config(
                "Must specify at least one value or distinct field".into(),
            ));
        }
        for (list, role) in [(&key, "key"), (&distinct, "distinct")] {
            if let Some(f) = list.iter().find(|f| f.id().is_some_and(FieldId::is_aggregate)) {
                return Err(FlowAggError::Config(format!(
                    "Aggregate field {} cannot be used as a {} field",
                    f.name(),
                    role
                )));
            }
        }
        if let Some(f) = value
            .iter()
            .find(|f| f.id().is_some_and(|id| !id.is_aggregate()))
        {
            return Err(FlowAggError::Config(format!(
                "Field {} is not an aggregate value",
                f.name()
            )));
        }
        if let Some(f) = distinct.iter().find(|f| key.contains(f)) {
            return Err(FlowAggError::Config(format!(
                "Cannot count distinct {} values when it is part of the key",
                f.name()
            )));
        }
        Ok(BinFields {
            key,
            value,
            distinct,
        })
    }

    pub fn key(&self) -> &FieldList {
        &self.key
    }

    pub fn value(&self) -> &FieldList {
        &self.value
    }

    pub fn distinct(&self) -> &FieldList {
        &self.distinct
    }

    pub fn key_width(&self) -> usize {
        self.key.row_width()
    }

    pub fn value_width(&self) -> usize {
        self.value.row_width()
    }

    pub fn distinct_width(&self) -> usize {
        self.distinct.row_width()
    }

    pub fn num_distinct(&self) -> usize {
        self.distinct.len()
    }
}
