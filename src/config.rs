use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

pub const DEFAULT_BASE_URL: &str = "http://prices.runescape.wiki/api/v1/osrs";

/// Every tunable of a run. Built once in `main` and handed to each stage by
/// reference.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Trade calculation ──────────────────────────────────────────
    /// Buy-limit cycles assumed between each trade.
    pub trade_interval: u32,

    // ── Trade evaluation ───────────────────────────────────────────
    /// Minimum raw profit per trade, assuming the interval limit is reached.
    pub min_profit: i64,
    /// Minimum (low + margin) / low ratio.
    pub min_roi: f64,
    /// Money needed to buy up to the interval limit.
    pub max_required_capital: f64,
    /// Drop records over `max_required_capital` instead of only reporting them.
    pub enforce_capital_cap: bool,
    /// Sell tax, applied to the high price only.
    pub tax: f64,

    // ── Window ─────────────────────────────────────────────────────
    /// Hours per aggregation chunk (one buy-limit window).
    pub chunk_size: usize,
    pub days_saved: u32,
    /// Hours kept per saved "day". Historically 8, not 24.
    pub hours_per_day: u32,

    // ── Remote ─────────────────────────────────────────────────────
    pub base_url: String,
    pub user_agent: String,
    pub contact: String,
    pub throttle: Duration,
    pub offline: bool,

    // ── Files ──────────────────────────────────────────────────────
    pub map_file: PathBuf,
    pub data_file: PathBuf,
    pub out_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trade_interval: 3,
            min_profit: 300_000,
            min_roi: 1.1,
            max_required_capital: 5_000_000.0,
            enforce_capital_cap: false,
            tax: 0.01,
            chunk_size: 4,
            days_saved: 3,
            hours_per_day: 8,
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: "The Marginator".to_string(),
            contact: "PracticalPotato on Discord".to_string(),
            throttle: Duration::from_secs(1),
            offline: false,
            map_file: PathBuf::from("mapfile.json"),
            data_file: PathBuf::from("datafile.json"),
            out_file: PathBuf::from("outfile.json"),
        }
    }
}

fn env_str(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_str(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{} has an invalid value: '{}'", name, raw))),
        None => Ok(None),
    }
}

fn env_bool(name: &str) -> bool {
    matches!(
        env_str(name).as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

impl Config {
    /// Defaults overlaid with `MARGINATOR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = env_parse("MARGINATOR_TRADE_INTERVAL")? {
            cfg.trade_interval = v;
        }
        if let Some(v) = env_parse("MARGINATOR_MIN_PROFIT")? {
            cfg.min_profit = v;
        }
        if let Some(v) = env_parse("MARGINATOR_MIN_ROI")? {
            cfg.min_roi = v;
        }
        if let Some(v) = env_parse("MARGINATOR_MAX_REQ_CAP")? {
            cfg.max_required_capital = v;
        }
        if let Some(v) = env_parse("MARGINATOR_TAX")? {
            cfg.tax = v;
        }
        if let Some(v) = env_parse("MARGINATOR_CHUNK_SIZE")? {
            cfg.chunk_size = v;
        }
        if let Some(v) = env_parse("MARGINATOR_DAYS_SAVED")? {
            cfg.days_saved = v;
        }
        if let Some(v) = env_parse::<u64>("MARGINATOR_THROTTLE_MS")? {
            cfg.throttle = Duration::from_millis(v);
        }
        if let Some(v) = env_str("MARGINATOR_BASE_URL") {
            cfg.base_url = v;
        }
        if let Some(v) = env_str("MARGINATOR_USER_AGENT") {
            cfg.user_agent = v;
        }
        if let Some(v) = env_str("MARGINATOR_CONTACT") {
            cfg.contact = v;
        }
        cfg.enforce_capital_cap |= env_bool("MARGINATOR_ENFORCE_CAPITAL_CAP");
        cfg.offline |= env_bool("MARGINATOR_OFFLINE");

        Ok(cfg)
    }

    /// Number of trailing hourly slots to keep.
    pub fn window_hours(&self) -> Result<u32> {
        self.days_saved.checked_mul(self.hours_per_day).ok_or_else(|| {
            AppError::Config(format!(
                "window of {} days x {} hours does not fit in u32",
                self.days_saved, self.hours_per_day
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(AppError::Config("chunk_size must be at least 1".into()));
        }
        if self.window_hours()? == 0 {
            return Err(AppError::Config("window must cover at least one hour".into()));
        }
        if !(0.0..1.0).contains(&self.tax) {
            return Err(AppError::Config(format!("tax must be in [0, 1), got {}", self.tax)));
        }
        if !(self.min_roi > 0.0) {
            return Err(AppError::Config(format!("min_roi must be positive, got {}", self.min_roi)));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(AppError::Config(format!(
                "Invalid base_url: must start with http:// or https://, got: '{}'",
                self.base_url
            )));
        }
        Ok(())
    }
}
