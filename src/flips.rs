use std::collections::BTreeMap;

use crate::config::Config;
use crate::model::{Catalog, ChunkPrice, FilterOutcome, Rejection, SkipReason, TradeRecord};
use crate::stats::median;

#[derive(Debug, Default)]
struct Evaluation {
    record: Option<TradeRecord>,
    rejections: Vec<Rejection>,
}

impl Evaluation {
    fn rejected(rejection: Rejection) -> Self {
        Self { record: None, rejections: vec![rejection] }
    }
}

fn evaluate(
    catalog: &Catalog,
    cfg: &Config,
    id: &str,
    chunks: &[BTreeMap<String, ChunkPrice>],
) -> Result<Evaluation, SkipReason> {
    let (highs, lows): (Vec<f64>, Vec<f64>) = chunks
        .iter()
        .filter_map(|chunk| chunk.get(id))
        .map(|p| (p.high, p.low))
        .unzip();
    if highs.is_empty() {
        return Err(SkipReason::NoChunkData);
    }

    let best_high = highs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let median_low = median(&lows);
    if !best_high.is_finite() || !median_low.is_finite() {
        return Err(SkipReason::NonFinite);
    }
    if median_low == 0.0 {
        return Err(SkipReason::ZeroPrice);
    }

    // Tax comes off the sell (high) side only.
    let margin = (best_high * (1.0 - cfg.tax) - median_low).ceil() as i64;
    let roi = (median_low + margin as f64) / median_low;
    if roi < cfg.min_roi {
        return Ok(Evaluation::rejected(Rejection::LowRoi(roi)));
    }

    let limit = catalog.get(id).ok_or(SkipReason::UnknownItem)?.limit;
    let interval_limit = u64::from(limit) * u64::from(cfg.trade_interval);
    let required_capital = median_low * interval_limit as f64;

    let mut eval = Evaluation::default();

    // Advisory by default: reported, but the record is not dropped for it.
    if required_capital > cfg.max_required_capital {
        eval.rejections.push(Rejection::HighCapital(required_capital));
        if cfg.enforce_capital_cap {
            return Ok(eval);
        }
    }

    let profit = margin.saturating_mul(interval_limit as i64);
    if profit < cfg.min_profit {
        eval.rejections.push(Rejection::LowProfit(profit));
        return Ok(eval);
    }

    eval.record = Some(TradeRecord {
        high: best_high,
        low: median_low,
        margin,
        roi,
        limit,
        interval_limit,
        required_capital,
        profit,
    });
    Ok(eval)
}

/// Combines per-chunk medians into trade records and applies the economic
/// thresholds.
///
/// Only ids priced in the first chunk are considered. For those, the best
/// high across chunks and the median of the chunk lows are used.
pub fn filter_opportunities(
    catalog: &Catalog,
    chunks: &[BTreeMap<String, ChunkPrice>],
    cfg: &Config,
) -> FilterOutcome {
    let mut out = FilterOutcome::default();
    let Some(first) = chunks.first() else {
        return out;
    };

    for id in first.keys() {
        match evaluate(catalog, cfg, id, chunks) {
            Ok(eval) => {
                out.rejections
                    .extend(eval.rejections.into_iter().map(|r| (id.clone(), r)));
                if let Some(record) = eval.record {
                    out.records.insert(id.clone(), record);
                }
            }
            Err(reason) => *out.skipped.entry(reason).or_default() += 1,
        }
    }

    out
}
