//! Feeding runners from asynchronous record streams.

use futures::{pin_mut, Stream, StreamExt};
use tracing::debug;

use flowagg_engine::Unique;
use flowagg_types::error::{FlowAggError, Result};
use flowagg_types::record::FlowRecord;

use crate::runner::{StatsRunner, UniqRunner};

/// Anything that takes records one at a time.
pub trait RecordSink {
    fn add_record(&mut self, record: &FlowRecord) -> Result<()>;
}

impl RecordSink for Unique {
    fn add_record(&mut self, record: &FlowRecord) -> Result<()> {
        Unique::add_record(self, record)
    }
}

impl RecordSink for UniqRunner {
    fn add_record(&mut self, record: &FlowRecord) -> Result<()> {
        UniqRunner::add_record(self, record)
    }
}

impl RecordSink for StatsRunner {
    fn add_record(&mut self, record: &FlowRecord) -> Result<()> {
        StatsRunner::add_record(self, record)
    }
}

/// Add every record of `stream` to `sink`. Stops at the first error, from
/// the stream or the sink. Returns the number of records added.
pub async fn ingest_stream<K, S>(sink: &mut K, stream: S) -> Result<u64>
where
    K: RecordSink + ?Sized,
    S: Stream<Item = Result<FlowRecord>>,
{
    pin_mut!(stream);
    let mut n = 0u64;
    while let Some(record) = stream.next().await {
        sink.add_record(&record?)?;
        n += 1;
    }
    debug!(records = n, "stream ingested");
    Ok(n)
}

/// [`ingest_stream`] on a current-thread runtime, for synchronous callers.
pub fn ingest_blocking<K, S>(sink: &mut K, stream: S) -> Result<u64>
where
    K: RecordSink + ?Sized,
    S: Stream<Item = Result<FlowRecord>>,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| FlowAggError::Config(format!("Runtime error: {}", e)))?;
    rt.block_on(ingest_stream(sink, stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::InputOrder;
    use flowagg_engine::fields::{FieldId, FieldList};
    use flowagg_engine::{BinFields, UniqueConfig};

    fn runner(dir: &std::path::Path) -> UniqRunner {
        let fields = BinFields::new(
            FieldList::from_ids(&[FieldId::SPort]).unwrap(),
            FieldList::from_ids(&[FieldId::Records]).unwrap(),
            FieldList::new(),
        )
        .unwrap();
        let config = UniqueConfig {
            temp_dir: Some(dir.to_path_buf()),
            sort_output: true,
            ..Default::default()
        };
        UniqRunner::new(InputOrder::Random, fields, config).unwrap()
    }

    fn rec(sport: u16) -> Result<FlowRecord> {
        Ok(FlowRecord {
            sport,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_ingest_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = runner(dir.path());
        let stream = futures::stream::iter(vec![rec(80), rec(22), rec(80)]);
        assert_eq!(ingest_stream(&mut r, stream).await.unwrap(), 3);
        let (bins, _) = r.collect().unwrap();
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[1].key, 80u16.to_ne_bytes().to_vec());
        assert_eq!(bins[1].value, 2u64.to_ne_bytes().to_vec());
    }

    #[tokio::test]
    async fn test_stream_error_stops_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = runner(dir.path());
        let stream = futures::stream::iter(vec![
            rec(1),
            Err(FlowAggError::InputRead("bad header".into())),
            rec(2),
        ]);
        let err = ingest_stream(&mut r, stream).await.unwrap_err();
        assert!(matches!(err, FlowAggError::InputRead(_)));
    }

    #[test]
    fn test_ingest_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = runner(dir.path());
        let stream = futures::stream::iter((0..100u16).map(rec));
        assert_eq!(ingest_blocking(&mut r, stream).unwrap(), 100);
        let (_, summary) = r.collect().unwrap();
        assert_eq!(summary.bins, 100);
    }
}
