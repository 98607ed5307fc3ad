use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Catalog entry from the `/mapping` endpoint. Only `id` and `limit` matter to
/// the pipeline; everything else is carried through to the persisted file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: u32,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Item id (as a string, the way the price API keys it) → catalog entry.
pub type Catalog = HashMap<String, Item>;

/// One item's trades within one hour. Any field may be null upstream.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HourRecord {
    pub avg_high_price: Option<f64>,
    pub avg_low_price: Option<f64>,
    pub high_price_volume: Option<u64>,
    pub low_price_volume: Option<u64>,
}

/// One hour's aggregated trade statistics for all items, as served by `/1h`.
///
/// Per-item payloads stay raw JSON until an aggregator asks for them, so one
/// malformed item can't poison the whole hour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HourlySnapshot {
    pub timestamp: i64,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl HourlySnapshot {
    pub fn record(&self, id: &str) -> Result<HourRecord, SkipReason> {
        let raw = self.data.get(id).ok_or(SkipReason::MissingHour)?;
        HourRecord::deserialize(raw).map_err(|_| SkipReason::MissingField)
    }
}

/// Median prices of one item over one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkPrice {
    pub high: f64,
    /// Median of the avgHighPrice series, NOT avgLowPrice (see stats.rs).
    pub low: f64,
}

/// Why an item was left out of a stage without that being an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipReason {
    /// Absent from at least one hour of the chunk.
    MissingHour,
    /// Present but a required field is null or has the wrong type.
    MissingField,
    /// No catalog entry, so no trade limit.
    UnknownItem,
    /// Median low price of zero, ROI is undefined.
    ZeroPrice,
    /// Never priced in any chunk.
    NoChunkData,
    /// Arithmetic produced NaN or infinity.
    NonFinite,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingHour => "missing hour",
            SkipReason::MissingField => "missing field",
            SkipReason::UnknownItem => "unknown item",
            SkipReason::ZeroPrice => "zero price",
            SkipReason::NoChunkData => "no chunk data",
            SkipReason::NonFinite => "non-finite value",
        }
    }
}

pub type SkipTally = BTreeMap<SkipReason, usize>;

/// Threshold outcome for an item. Not an error: normal filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// `volume` is the first hourly volume (either side) at or below `threshold`.
    LowVolume { threshold: f64, volume: f64 },
    LowRoi(f64),
    HighCapital(f64),
    LowProfit(i64),
}

impl Rejection {
    pub fn describe(&self) -> String {
        match self {
            Rejection::LowVolume { threshold, volume } => {
                format!("low volume of {} (needs > {} every hour)", volume, threshold)
            }
            Rejection::LowRoi(roi) => format!("low roi of {}", roi),
            Rejection::HighCapital(cap) => format!("high reqCap of {}", cap),
            Rejection::LowProfit(profit) => format!("low profit of {}", profit),
        }
    }
}

/// Result of aggregating one chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkOutcome {
    pub prices: BTreeMap<String, ChunkPrice>,
    /// Candidates carried into the next chunk (input minus `low_volume`).
    pub surviving: BTreeSet<String>,
    pub low_volume: Vec<(String, Rejection)>,
    pub skipped: SkipTally,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub high: f64,
    pub low: f64,
    pub margin: i64,
    pub roi: f64,
    pub limit: u32,
    pub interval_limit: u64,
    pub required_capital: f64,
    pub profit: i64,
}

#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub records: BTreeMap<String, TradeRecord>,
    /// Every threshold hit, including advisory capital hits on kept records.
    pub rejections: Vec<(String, Rejection)>,
    pub skipped: SkipTally,
}
