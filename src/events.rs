//! Pipeline progress as data.
//!
//! Stages return plain results; the pipeline turns them into events and hands
//! them to whichever [`EventSink`] the caller supplied for that run.

use std::path::PathBuf;
use tracing::{info, warn};

use crate::loader::ReconcileStats;
use crate::model::{Rejection, SkipTally};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    DataUpdated {
        snapshots: usize,
        stats: ReconcileStats,
    },
    ChunkProcessed {
        index: usize,
        hours: usize,
        priced: usize,
        low_volume: usize,
        candidates_left: usize,
    },
    Rejected {
        id: String,
        reason: Rejection,
    },
    Skipped {
        stage: String,
        tally: SkipTally,
    },
    NoData,
    WritingOutput {
        path: PathBuf,
        records: usize,
    },
}

pub trait EventSink {
    fn emit(&mut self, event: PipelineEvent);
}

/// Renders events as `tracing` log lines.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::DataUpdated { snapshots, stats } => info!(
                "Data Updated: {} hours ({} cached, {} fetched, {} pruned, {} missing)",
                snapshots, stats.reused, stats.fetched, stats.pruned, stats.missing
            ),
            PipelineEvent::ChunkProcessed { index, hours, priced, low_volume, candidates_left } => {
                info!(
                    "Processed chunk {} ({}h): {} priced, {} candidates left",
                    index, hours, priced, candidates_left
                );
                if low_volume > 0 {
                    info!("#{} IDs discarded for low volume", low_volume);
                }
            }
            PipelineEvent::Rejected { id, reason } => {
                info!("{} discarded for {}", id, reason.describe())
            }
            PipelineEvent::Skipped { stage, tally } => {
                let summary: Vec<String> = tally
                    .iter()
                    .map(|(reason, n)| format!("{} {}", n, reason.as_str()))
                    .collect();
                info!("{}: skipped {}", stage, summary.join(", "));
            }
            PipelineEvent::NoData => warn!("No snapshots in the window, nothing to analyze"),
            PipelineEvent::WritingOutput { path, records } => {
                info!("Writing Outfile {} ({} items)", path.display(), records)
            }
        }
    }
}
