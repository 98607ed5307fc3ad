use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::api::PriceSource;
use crate::error::{AppError, Result};
use crate::model::{Catalog, HourlySnapshot};

/// Reads the persisted catalog. `None` when the file is missing or unreadable.
pub fn load_catalog(path: &Path) -> Option<Catalog> {
    let data = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&data) {
        Ok(catalog) => Some(catalog),
        Err(e) => {
            warn!("Catalog at {} is corrupt, ignoring it: {}", path.display(), e);
            None
        }
    }
}

pub fn save_catalog(path: &Path, catalog: &Catalog) -> Result<()> {
    fs::write(path, serde_json::to_string(catalog)?)?;
    Ok(())
}

/// Reads the snapshot cache. Missing or corrupt files are an empty cache.
pub fn load_snapshots(path: &Path) -> Vec<HourlySnapshot> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(_) => return Vec::new(),
    };
    serde_json::from_str(&data).unwrap_or_else(|e| {
        warn!("Snapshot cache at {} is corrupt, starting empty: {}", path.display(), e);
        Vec::new()
    })
}

pub fn save_snapshots(path: &Path, snapshots: &[HourlySnapshot]) -> Result<()> {
    fs::write(path, serde_json::to_string(snapshots)?)?;
    Ok(())
}

/// Unix timestamps of the `hours` whole hours before the hour containing
/// `now`, oldest first. The current hour is never included.
pub fn desired_slots(now: DateTime<Utc>, hours: u32) -> Vec<i64> {
    let this_hour = now
        .duration_trunc(TimeDelta::hours(1))
        .unwrap_or(now);
    (0..hours)
        .map(|i| (this_hour - TimeDelta::hours(i64::from(hours - i))).timestamp())
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub reused: usize,
    pub fetched: usize,
    pub pruned: usize,
    /// Slots left empty because the run is offline.
    pub missing: usize,
}

pub struct Reconciled {
    pub catalog: Catalog,
    /// Cache order first, then newly fetched hours. Not sorted.
    pub snapshots: Vec<HourlySnapshot>,
    pub stats: ReconcileStats,
}

/// Brings the local catalog and snapshot cache up to date with the desired
/// window. With no source (offline) nothing is fetched.
pub struct Reconciler<'a, 's> {
    source: Option<&'s mut dyn PriceSource>,
    map_file: &'a Path,
    data_file: &'a Path,
}

impl<'a, 's> Reconciler<'a, 's> {
    pub fn new(source: Option<&'s mut dyn PriceSource>, map_file: &'a Path, data_file: &'a Path) -> Self {
        Self { source, map_file, data_file }
    }

    pub fn catalog(&mut self) -> Result<Catalog> {
        if let Some(catalog) = load_catalog(self.map_file) {
            return Ok(catalog);
        }
        let source = self.source.as_deref_mut().ok_or_else(|| {
            AppError::Config(format!(
                "no catalog at {} and remote fetching is disabled",
                self.map_file.display()
            ))
        })?;
        let catalog = source.fetch_catalog()?;
        save_catalog(self.map_file, &catalog)?;
        Ok(catalog)
    }

    pub fn reconcile(&mut self, hours: u32, now: DateTime<Utc>) -> Result<Reconciled> {
        let catalog = self.catalog()?;

        let slots = desired_slots(now, hours);
        let mut missing: BTreeSet<i64> = slots.iter().copied().collect();

        let cached = load_snapshots(self.data_file);
        let cached_len = cached.len();
        let mut snapshots: Vec<HourlySnapshot> = cached
            .into_iter()
            .filter(|snap| missing.remove(&snap.timestamp))
            .collect();

        let mut stats = ReconcileStats {
            reused: snapshots.len(),
            pruned: cached_len - snapshots.len(),
            ..Default::default()
        };

        match self.source.as_deref_mut() {
            Some(source) => {
                for slot in missing {
                    let mut snap = match source.fetch_hour(slot) {
                        Ok(snap) => snap,
                        Err(e) => {
                            // Keep what was fetched so the next run resumes from here.
                            if let Err(save_err) = save_snapshots(self.data_file, &snapshots) {
                                warn!("Could not save partial cache: {}", save_err);
                            }
                            return Err(e);
                        }
                    };
                    if snap.timestamp != slot {
                        warn!("Requested hour {} but API answered {}, keeping it as {}", slot, snap.timestamp, slot);
                        snap.timestamp = slot;
                    }
                    snapshots.push(snap);
                    stats.fetched += 1;
                }
            }
            None => {
                stats.missing = missing.len();
                if !missing.is_empty() {
                    warn!("Offline: {} hours of the window are not cached", missing.len());
                }
            }
        }

        save_snapshots(self.data_file, &snapshots)?;
        debug!(?stats, "Snapshot cache reconciled");

        Ok(Reconciled { catalog, snapshots, stats })
    }
}
