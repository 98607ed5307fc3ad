//! Client for the OSRS wiki real-time prices API.
//!
//! Two endpoints are used:
//! - `GET /mapping` for the item catalog
//! - `GET /1h?timestamp=<unix>` for one hour of averaged trades
//!
//! The provider asks for an identifying User-Agent and a gentle request rate,
//! so every call goes through a single throttled client.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, FROM, USER_AGENT};
use serde_json::Value;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::model::{Catalog, HourlySnapshot, Item};

const MAP_ENDPOINT: &str = "/mapping";
const HOUR_ENDPOINT: &str = "/1h";

/// The remote collaborator of the reconciler.
pub trait PriceSource {
    fn fetch_catalog(&mut self) -> Result<Catalog>;
    fn fetch_hour(&mut self, timestamp: i64) -> Result<HourlySnapshot>;
}

/// Keeps at least `interval` between the starts of consecutive calls.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

pub struct WikiClient {
    base_url: String,
    client: Client,
    throttle: Throttle,
}

impl WikiClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let base_url = cfg.base_url.trim().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&cfg.user_agent)
                .map_err(|e| AppError::Config(format!("Invalid user agent: {}", e)))?,
        );
        headers.insert(
            FROM,
            HeaderValue::from_str(&cfg.contact)
                .map_err(|e| AppError::Config(format!("Invalid contact header: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Network(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Created WikiClient: base_url='{}'", base_url);

        Ok(Self {
            base_url,
            client,
            throttle: Throttle::new(cfg.throttle),
        })
    }

    fn get(&mut self, endpoint: &str, query: &[(&str, String)]) -> Result<Value> {
        self.throttle.wait();

        if query.is_empty() {
            info!("Requesting: {}", endpoint);
        } else {
            info!("Requesting: {} {:?}", endpoint, query);
        }

        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.client.get(&url).query(query).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Http { status: status.as_u16(), url });
        }

        let body = response.text()?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::Parse(format!("Failed to parse {} response: {}", endpoint, e)))
    }
}

impl PriceSource for WikiClient {
    fn fetch_catalog(&mut self) -> Result<Catalog> {
        let raw = self.get(MAP_ENDPOINT, &[])?;
        catalog_from_mapping(raw)
    }

    fn fetch_hour(&mut self, timestamp: i64) -> Result<HourlySnapshot> {
        let raw = self.get(HOUR_ENDPOINT, &[("timestamp", timestamp.to_string())])?;
        let snapshot: HourlySnapshot = serde_json::from_value(raw)
            .map_err(|e| AppError::Parse(format!("Malformed /1h payload for {}: {}", timestamp, e)))?;
        Ok(snapshot)
    }
}

/// Keeps only mapping entries that carry a trade limit.
pub fn catalog_from_mapping(raw: Value) -> Result<Catalog> {
    let entries = match raw {
        Value::Array(entries) => entries,
        other => {
            return Err(AppError::Parse(format!(
                "Expected an array from {}, got {}",
                MAP_ENDPOINT,
                type_name(&other)
            )))
        }
    };

    let mut catalog = Catalog::new();
    let mut dropped = 0usize;
    for entry in entries {
        if entry.get("limit").map_or(true, Value::is_null) {
            dropped += 1;
            continue;
        }
        match serde_json::from_value::<Item>(entry) {
            Ok(item) => {
                catalog.insert(item.id.to_string(), item);
            }
            Err(e) => {
                warn!("Ignoring malformed mapping entry: {}", e);
                dropped += 1;
            }
        }
    }

    debug!("Catalog: {} items kept, {} without a limit", catalog.len(), dropped);
    Ok(catalog)
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
