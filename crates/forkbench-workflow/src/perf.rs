use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the `<name>_perf.csv` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfRecord {
    /// Source labels joined with `,`; empty for base generation.
    pub src: String,
    pub dst: String,
    /// Operation names joined with `+`, or `generate` / `load`.
    pub op: String,
    pub start_time: String,
    pub end_time: String,
    /// Seconds.
    pub elapsed_time: f64,
}

/// Collects timing rows for a workflow.
#[derive(Debug, Default)]
pub struct PerfLog {
    records: Vec<PerfRecord>,
}

/// A running timer started by [`PerfLog::start`].
#[derive(Debug)]
pub struct PerfTimer {
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl PerfLog {
    pub fn start() -> PerfTimer {
        PerfTimer {
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    /// Close `timer` and record the row. Returns the elapsed time.
    pub fn finish(&mut self, timer: PerfTimer, src: &[&str], dst: &str, op: &str) -> Duration {
        let elapsed = timer.clock.elapsed();
        let ended_at = timer.started_at
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.records.push(PerfRecord {
            src: src.join(","),
            dst: dst.to_string(),
            op: op.to_string(),
            start_time: timer.started_at.to_rfc3339(),
            end_time: ended_at.to_rfc3339(),
            elapsed_time: elapsed.as_secs_f64(),
        });
        elapsed
    }

    pub fn records(&self) -> &[PerfRecord] {
        &self.records
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path)?));
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
