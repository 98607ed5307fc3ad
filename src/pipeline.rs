use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::api::PriceSource;
use crate::config::Config;
use crate::error::Result;
use crate::events::{EventSink, PipelineEvent};
use crate::flips::filter_opportunities;
use crate::loader::Reconciler;
use crate::model::{Catalog, FilterOutcome, HourlySnapshot, SkipTally, TradeRecord};
use crate::stats::{aggregate_chunk, initial_candidates, sort_snapshots};

/// Sorts the window by hour, aggregates it chunk by chunk and filters the
/// combined medians.
pub fn analyze(
    catalog: &Catalog,
    mut snapshots: Vec<HourlySnapshot>,
    cfg: &Config,
    sink: &mut dyn EventSink,
) -> FilterOutcome {
    if snapshots.is_empty() {
        sink.emit(PipelineEvent::NoData);
        return FilterOutcome::default();
    }
    sort_snapshots(&mut snapshots);

    let mut candidates = initial_candidates(&snapshots);
    let mut results = Vec::new();

    for (index, chunk) in snapshots.chunks(cfg.chunk_size).enumerate() {
        let outcome = aggregate_chunk(catalog, chunk, &candidates);

        let low_volume = outcome.low_volume.len();
        for (id, reason) in outcome.low_volume {
            sink.emit(PipelineEvent::Rejected { id, reason });
        }
        emit_skips(sink, format!("chunk {}", index), outcome.skipped);
        sink.emit(PipelineEvent::ChunkProcessed {
            index,
            hours: chunk.len(),
            priced: outcome.prices.len(),
            low_volume,
            candidates_left: outcome.surviving.len(),
        });

        candidates = outcome.surviving;
        results.push(outcome.prices);
    }

    let outcome = filter_opportunities(catalog, &results, cfg);
    for (id, reason) in &outcome.rejections {
        sink.emit(PipelineEvent::Rejected { id: id.clone(), reason: *reason });
    }
    emit_skips(sink, "filter".to_string(), outcome.skipped.clone());
    outcome
}

fn emit_skips(sink: &mut dyn EventSink, stage: String, tally: SkipTally) {
    if !tally.is_empty() {
        sink.emit(PipelineEvent::Skipped { stage, tally });
    }
}

pub fn write_output(path: &Path, records: &BTreeMap<String, TradeRecord>) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(records)?)?;
    Ok(())
}

/// One full run: reconcile the cache, analyze the window, write the outfile.
/// `source` is `None` for offline runs.
pub fn run(
    cfg: &Config,
    source: Option<&mut dyn PriceSource>,
    now: DateTime<Utc>,
    sink: &mut dyn EventSink,
) -> Result<FilterOutcome> {
    let reconciled = Reconciler::new(source, &cfg.map_file, &cfg.data_file)
        .reconcile(cfg.window_hours()?, now)?;
    sink.emit(PipelineEvent::DataUpdated {
        snapshots: reconciled.snapshots.len(),
        stats: reconciled.stats,
    });

    let outcome = analyze(&reconciled.catalog, reconciled.snapshots, cfg, sink);

    sink.emit(PipelineEvent::WritingOutput {
        path: cfg.out_file.clone(),
        records: outcome.records.len(),
    });
    write_output(&cfg.out_file, &outcome.records)?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::RecordingSink;
    use crate::loader::tests::FakeSource;
    use crate::model::{Item, Rejection};
    use chrono::TimeZone;
    use serde_json::{json, Map, Value};
    use tempfile::tempdir;

    fn catalog() -> Catalog {
        let mut c = Catalog::new();
        c.insert("7".into(), Item { id: 7, limit: 10_000, name: None, details: Map::new() });
        c
    }

    fn hour(ts: i64, high: i64) -> HourlySnapshot {
        let rec = json!({"avgHighPrice": high, "avgLowPrice": high - 10, "highPriceVolume": 5000, "lowPriceVolume": 5000});
        HourlySnapshot { timestamp: ts, data: [("7".to_string(), rec)].into_iter().collect() }
    }

    #[test]
    fn snapshots_are_ordered_before_chunking() {
        let cfg = Config { chunk_size: 2, ..Config::default() };
        let unordered = vec![hour(3 * 3600, 130), hour(3600, 100), hour(2 * 3600, 100)];

        // Chunks [100, 100] and [130]: best high 130, median low 115, margin 14.
        let mut sink = RecordingSink::default();
        let out = analyze(&catalog(), unordered, &cfg, &mut sink);

        let rec = &out.records["7"];
        assert_eq!(rec.high, 130.0);
        assert_eq!(rec.low, 115.0);
        assert_eq!(rec.margin, 14);
        assert_eq!(rec.profit, 420_000);

        let chunks = sink
            .events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::ChunkProcessed { .. }))
            .count();
        assert_eq!(chunks, 2);
    }

    #[test]
    fn thin_hour_is_reported_with_its_volume() {
        let mut thin = hour(2 * 3600, 100);
        thin.data.insert(
            "7".into(),
            json!({"avgHighPrice": 100, "avgLowPrice": 90, "highPriceVolume": 5000, "lowPriceVolume": 1200}),
        );
        let snaps = vec![hour(3600, 100), thin, hour(3 * 3600, 100)];

        let mut sink = RecordingSink::default();
        let out = analyze(&catalog(), snaps, &Config::default(), &mut sink);
        assert!(out.records.is_empty());

        let reported: Vec<_> = sink
            .events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Rejected { id, reason: Rejection::LowVolume { threshold, volume } } => {
                    Some((id.as_str(), *threshold, *volume))
                }
                _ => None,
            })
            .collect();
        assert_eq!(reported, vec![("7", 2500.0, 1200.0)]);
        assert!(sink.events.iter().any(|e| matches!(
            e,
            PipelineEvent::ChunkProcessed { low_volume: 1, candidates_left: 0, .. }
        )));
    }

    #[test]
    fn empty_window_reports_no_data() {
        let mut sink = RecordingSink::default();
        let out = analyze(&catalog(), Vec::new(), &Config::default(), &mut sink);
        assert!(out.records.is_empty());
        assert_eq!(sink.events, vec![PipelineEvent::NoData]);
    }

    #[test]
    fn full_run_writes_outfile_and_reports() {
        let dir = tempdir().unwrap();
        let cfg = Config {
            days_saved: 1,
            map_file: dir.path().join("map.json"),
            data_file: dir.path().join("data.json"),
            out_file: dir.path().join("out.json"),
            ..Config::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap();

        let mut source = FakeSource::default();
        let mut sink = RecordingSink::default();
        let out = run(&cfg, Some(&mut source), now, &mut sink).unwrap();

        assert_eq!(source.hour_calls.len(), 8);
        assert!(out.records.is_empty());

        // Flat 200 highs give a negative margin once taxed.
        assert!(sink.events.iter().any(|e| matches!(
            e,
            PipelineEvent::Rejected { id, reason: Rejection::LowRoi(_) } if id == "1"
        )));
        assert!(matches!(
            sink.events.first(),
            Some(PipelineEvent::DataUpdated { snapshots: 8, .. })
        ));
        assert!(matches!(
            sink.events.last(),
            Some(PipelineEvent::WritingOutput { records: 0, .. })
        ));

        let written: Value = serde_json::from_str(&fs::read_to_string(&cfg.out_file).unwrap()).unwrap();
        assert_eq!(written, json!({}));

        // Second run in the same hour is served from cache.
        let mut again = FakeSource::default();
        run(&cfg, Some(&mut again), now, &mut RecordingSink::default()).unwrap();
        assert!(again.hour_calls.is_empty());
    }

    #[test]
    fn outfile_is_keyed_by_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.json");
        let cfg = Config { chunk_size: 2, ..Config::default() };

        let out = analyze(
            &catalog(),
            vec![hour(3600, 100), hour(7200, 100), hour(10800, 130)],
            &cfg,
            &mut RecordingSink::default(),
        );
        write_output(&path, &out.records).unwrap();

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["7"]["margin"], json!(14));
        assert_eq!(written["7"]["intervalLimit"], json!(30_000));
    }
}
