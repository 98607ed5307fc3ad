use rayon::prelude::*;
use statrs::statistics::{Data, Median};
use std::collections::BTreeSet;

use crate::model::{
    Catalog, ChunkOutcome, ChunkPrice, HourRecord, HourlySnapshot, Rejection, SkipReason,
};

pub fn median(values: &[f64]) -> f64 {
    Data::new(values.to_vec()).median()
}

/// Orders the snapshots by hour so fixed-size slices are contiguous in time.
pub fn sort_snapshots(snapshots: &mut [HourlySnapshot]) {
    snapshots.sort_by_key(|s| s.timestamp);
}

/// Ids present in the earliest snapshot; the starting candidate set.
pub fn initial_candidates(snapshots: &[HourlySnapshot]) -> BTreeSet<String> {
    snapshots
        .first()
        .map(|s| s.data.keys().cloned().collect())
        .unwrap_or_default()
}

enum ItemOutcome {
    Priced(ChunkPrice),
    LowVolume(Rejection),
    Skipped(SkipReason),
}

// Volume fields are only needed for the floor; the price series is only the
// high one (see below), so a null avgLowPrice never excludes an item.
fn price_item(catalog: &Catalog, chunk: &[HourlySnapshot], id: &str) -> ItemOutcome {
    let records: Vec<HourRecord> = match chunk.iter().map(|s| s.record(id)).collect::<Result<Vec<_>, _>>() {
        Ok(r) => r,
        Err(reason) => return ItemOutcome::Skipped(reason),
    };

    let limit = match catalog.get(id) {
        Some(item) => item.limit,
        None => return ItemOutcome::Skipped(SkipReason::UnknownItem),
    };
    let thresh = f64::from(limit) / 4.0;

    let mut highs = Vec::with_capacity(records.len());
    let mut thin = None;
    for rec in &records {
        match (rec.avg_high_price, rec.high_price_volume, rec.low_price_volume) {
            (Some(h), Some(hv), Some(lv)) => {
                highs.push(h);
                // Every hour must trade strictly above a quarter of the buy limit, both sides.
                if thin.is_none() {
                    thin = [hv as f64, lv as f64].into_iter().find(|&v| v <= thresh);
                }
            }
            _ => return ItemOutcome::Skipped(SkipReason::MissingField),
        }
    }

    if let Some(volume) = thin {
        return ItemOutcome::LowVolume(Rejection::LowVolume { threshold: thresh, volume });
    }

    // NOTE: the low median is taken over avgHighPrice, not avgLowPrice. Output
    // has always been computed this way and flips.rs margins depend on it, even
    // though it is almost certainly a bug. Do not "fix" without a flag.
    let lows = highs.clone();

    let high = median(&highs);
    let low = median(&lows);
    if !high.is_finite() || !low.is_finite() {
        return ItemOutcome::Skipped(SkipReason::NonFinite);
    }
    ItemOutcome::Priced(ChunkPrice { high, low })
}

/// Medians for every candidate that clears the volume floor in each hour of
/// `chunk`. Low-volume ids are dropped from the returned candidate set;
/// ids skipped for bad data stay candidates.
pub fn aggregate_chunk(
    catalog: &Catalog,
    chunk: &[HourlySnapshot],
    candidates: &BTreeSet<String>,
) -> ChunkOutcome {
    let outcomes: Vec<(&String, ItemOutcome)> = candidates
        .par_iter()
        .map(|id| (id, price_item(catalog, chunk, id)))
        .collect();

    let mut out = ChunkOutcome::default();
    for (id, outcome) in outcomes {
        match outcome {
            ItemOutcome::Priced(price) => {
                out.prices.insert(id.clone(), price);
            }
            ItemOutcome::LowVolume(rejection) => out.low_volume.push((id.clone(), rejection)),
            ItemOutcome::Skipped(reason) => *out.skipped.entry(reason).or_default() += 1,
        }
    }

    let gone: BTreeSet<&String> = out.low_volume.iter().map(|(id, _)| id).collect();
    out.surviving = candidates.iter().filter(|id| !gone.contains(id)).cloned().collect();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Item;
    use serde_json::{json, Map, Value};

    fn catalog(limit: u32) -> Catalog {
        let mut c = Catalog::new();
        c.insert("1".into(), Item { id: 1, limit, name: None, details: Map::new() });
        c
    }

    fn snap(ts: i64, rec: Value) -> HourlySnapshot {
        HourlySnapshot { timestamp: ts, data: [("1".to_string(), rec)].into_iter().collect() }
    }

    fn hour(high: i64, low: i64, hv: u64, lv: u64) -> Value {
        json!({"avgHighPrice": high, "avgLowPrice": low, "highPriceVolume": hv, "lowPriceVolume": lv})
    }

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[200.0, 205.0]), 202.5);
    }

    #[test]
    fn four_passing_hours() {
        let chunk: Vec<_> = (0..4).map(|i| snap(i * 3600, hour(200, 150, 30, 30))).collect();
        let out = aggregate_chunk(&catalog(100), &chunk, &ids(&["1"]));

        // Low comes from the high series, so it is 200 rather than 150.
        assert_eq!(out.prices["1"], ChunkPrice { high: 200.0, low: 200.0 });
        assert_eq!(out.surviving, ids(&["1"]));
        assert!(out.low_volume.is_empty());
    }

    #[test]
    fn one_thin_hour_excludes_for_good() {
        let mut chunk: Vec<_> = (0..4).map(|i| snap(i * 3600, hour(200, 150, 30, 30))).collect();
        chunk[2] = snap(7200, hour(200, 150, 20, 30));
        let out = aggregate_chunk(&catalog(100), &chunk, &ids(&["1"]));

        assert!(out.prices.is_empty());
        assert!(out.surviving.is_empty());
        assert_eq!(
            out.low_volume,
            vec![("1".to_string(), Rejection::LowVolume { threshold: 25.0, volume: 20.0 })]
        );
    }

    #[test]
    fn volume_equal_to_threshold_is_excluded() {
        let chunk: Vec<_> = (0..4)
            .map(|i| snap(i * 3600, hour(200, 150, if i == 1 { 25 } else { 30 }, 30)))
            .collect();
        let out = aggregate_chunk(&catalog(100), &chunk, &ids(&["1"]));
        assert!(out.prices.is_empty());
        assert!(!out.surviving.contains("1"));
    }

    #[test]
    fn low_side_volume_also_gates() {
        let chunk = vec![snap(0, hour(200, 150, 30, 30)), snap(3600, hour(200, 150, 30, 10))];
        let out = aggregate_chunk(&catalog(100), &chunk, &ids(&["1"]));
        assert!(out.surviving.is_empty());
    }

    #[test]
    fn missing_hour_skips_but_keeps_candidate() {
        let chunk = vec![
            snap(0, hour(200, 150, 30, 30)),
            HourlySnapshot { timestamp: 3600, data: Default::default() },
        ];
        let out = aggregate_chunk(&catalog(100), &chunk, &ids(&["1"]));

        assert!(out.prices.is_empty());
        assert_eq!(out.surviving, ids(&["1"]));
        assert_eq!(out.skipped.get(&SkipReason::MissingHour), Some(&1));
    }

    #[test]
    fn null_fields_and_unknown_items_are_skipped() {
        let chunk = vec![snap(0, json!({"avgHighPrice": null, "avgLowPrice": 1, "highPriceVolume": 99, "lowPriceVolume": 99}))];
        let out = aggregate_chunk(&catalog(100), &chunk, &ids(&["1"]));
        assert_eq!(out.skipped.get(&SkipReason::MissingField), Some(&1));

        let chunk = vec![snap(0, hour(200, 150, 30, 30))];
        let out = aggregate_chunk(&Catalog::new(), &chunk, &ids(&["1"]));
        assert_eq!(out.skipped.get(&SkipReason::UnknownItem), Some(&1));
        assert_eq!(out.surviving, ids(&["1"]));
    }

    #[test]
    fn null_low_price_is_tolerated() {
        let chunk = vec![snap(0, json!({"avgHighPrice": 300, "avgLowPrice": null, "highPriceVolume": 99, "lowPriceVolume": 99}))];
        let out = aggregate_chunk(&catalog(100), &chunk, &ids(&["1"]));
        assert_eq!(out.prices["1"], ChunkPrice { high: 300.0, low: 300.0 });
    }

    #[test]
    fn short_final_chunk() {
        let chunk = vec![snap(0, hour(100, 90, 30, 30)), snap(3600, hour(110, 90, 30, 30))];
        let out = aggregate_chunk(&catalog(100), &chunk, &ids(&["1"]));
        assert_eq!(out.prices["1"].high, 105.0);
    }

    #[test]
    fn candidates_only_shrink() {
        let mut candidates = ids(&["1", "2"]);
        let mut cat = catalog(100);
        cat.insert("2".into(), Item { id: 2, limit: 4, name: None, details: Map::new() });

        let volumes = [[30u64, 30], [30, 10], [30, 30]];
        for (k, v) in volumes.iter().enumerate() {
            let s = HourlySnapshot {
                timestamp: k as i64 * 3600,
                data: [
                    ("1".to_string(), hour(200, 150, v[0], v[1])),
                    ("2".to_string(), hour(50, 40, 9, 9)),
                ]
                .into_iter()
                .collect(),
            };
            let out = aggregate_chunk(&cat, std::slice::from_ref(&s), &candidates);
            assert!(out.surviving.is_subset(&candidates));
            candidates = out.surviving;
        }
        assert_eq!(candidates, ids(&["2"]));
    }

    #[test]
    fn sorting_and_initial_candidates() {
        let mut snaps = vec![
            HourlySnapshot { timestamp: 7200, data: [("9".to_string(), json!({}))].into_iter().collect() },
            HourlySnapshot { timestamp: 3600, data: [("1".to_string(), json!({}))].into_iter().collect() },
        ];
        sort_snapshots(&mut snaps);
        assert_eq!(snaps[0].timestamp, 3600);
        assert_eq!(initial_candidates(&snaps), ids(&["1"]));
        assert!(initial_candidates(&[]).is_empty());
    }
}
