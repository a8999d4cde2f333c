//! Harvest stages and the context they share.
//!
//! - `run_schools`: basic listing + per-school detail + enhanced listing, merged
//! - `run_majors`: major listing (several payload shapes per page)
//! - `run_scores`: per school × year score lines
//! - `run_school_scores`: per-province minimum scores from static school info
//! - `run_plans`: per school × year × province admission plans
//!
//! Every stage writes its snapshot even when it fails, then reports the
//! failure as an error.

pub mod majors;
pub mod merge;
pub mod normalize;
pub mod plans;
pub mod school_scores;
pub mod schools;
pub mod scores;
pub mod summary;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, FetchError, Result};
use crate::models::{Config, EntityId, Record};
use crate::services::{RequestEngine, RetryPolicy, Signer, Transport};
use crate::storage::SnapshotStorage;

pub use majors::run_majors;
pub use merge::{MergeOutcome, MergeReport, SourceBatch, SourceReport, merge};
pub use normalize::{EntityType, FieldSpec, normalize, raw_id};
pub use plans::run_plans;
pub use school_scores::run_school_scores;
pub use schools::run_schools;
pub use scores::run_scores;
pub use summary::RunSummary;

/// Snapshot file names.
pub const SCHOOLS_FILE: &str = "schools.json";
pub const MAJORS_FILE: &str = "majors.json";
pub const SCORES_FILE: &str = "scores.json";
pub const SCHOOL_SCORES_FILE: &str = "school_scores.json";
pub const PLANS_FILE: &str = "plans.json";

/// Everything a stage needs: configuration, the shared request engine
/// and the snapshot store.
pub struct Harvest {
    config: Config,
    engine: Arc<RequestEngine>,
    storage: Arc<dyn SnapshotStorage>,
    signer: Option<Signer>,
}

impl Harvest {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn SnapshotStorage>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let signer = Signer::from_config(&config.signature)?;
        let engine = RequestEngine::new(transport, &config).with_cancellation(cancel);
        Ok(Self {
            config,
            engine: Arc::new(engine),
            storage,
            signer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<RequestEngine> {
        &self.engine
    }

    pub fn storage(&self) -> &dyn SnapshotStorage {
        self.storage.as_ref()
    }

    pub fn signer(&self) -> Option<&Signer> {
        self.signer.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.engine.cancellation().is_cancelled()
    }

    /// Retry policy with the configured base delay.
    pub fn policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, self.config.retry.base_delay())
    }

    /// Parallel per-entity requests, clamped to 1..=4.
    pub fn concurrency(&self) -> usize {
        self.config.harvest.concurrency.clamp(1, 4)
    }

    /// School ids from the schools snapshot, capped by `sample_schools`.
    ///
    /// `None` (with a warning) when the snapshot is missing, unreadable or
    /// carries no ids; the calling stage is then skipped.
    pub async fn school_ids(&self, stage: &str) -> Option<Vec<EntityId>> {
        let ids = self
            .storage
            .entity_ids(
                SCHOOLS_FILE,
                EntityType::School.id_field(),
                self.config.harvest.sample_schools,
            )
            .await;
        let ids = match ids {
            Ok(ids) => ids,
            Err(e) => {
                log::warn!("{stage}: {SCHOOLS_FILE} is unreadable ({e}), skipping");
                return None;
            }
        };
        match ids {
            None => {
                log::warn!("{stage}: {SCHOOLS_FILE} not found, run the schools stage first");
                None
            }
            Some(ids) if ids.is_empty() => {
                log::warn!("{stage}: {SCHOOLS_FILE} holds no school ids");
                None
            }
            Some(ids) => {
                log::info!("{stage}: read {} school ids from {SCHOOLS_FILE}", ids.len());
                Some(ids)
            }
        }
    }

    /// Write the stage snapshot, then turn the tally into the stage result.
    async fn finish(
        &self,
        stage: &'static str,
        file: &'static str,
        started: DateTime<Utc>,
        records: Vec<Record>,
        tally: Tally,
    ) -> Result<StageReport> {
        let meta = self.storage.write_snapshot(file, &records).await?;
        RunSummary::from_records(&records).log(stage);

        let report = StageReport {
            stage,
            file,
            records: meta.count,
            requests: tally.requests,
            failures: tally.failures,
            skipped: false,
            started,
            finished: Utc::now(),
        };
        log::info!(
            "{}: {} records, {} requests, {} failed ({:.1}s)",
            stage,
            report.records,
            report.requests,
            report.failures,
            report.elapsed().as_secs_f64()
        );

        match tally.fatal {
            Some(reason) => Err(AppError::stage(stage, reason)),
            None => Ok(report),
        }
    }
}

/// Outcome of one stage run.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: &'static str,
    pub file: &'static str,
    pub records: usize,
    pub requests: usize,
    pub failures: usize,
    /// Stage did not run (missing input snapshot)
    pub skipped: bool,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

impl StageReport {
    fn skipped(stage: &'static str, file: &'static str) -> Self {
        let now = Utc::now();
        Self {
            stage,
            file,
            records: 0,
            requests: 0,
            failures: 0,
            skipped: true,
            started: now,
            finished: now,
        }
    }

    pub fn elapsed(&self) -> Duration {
        (self.finished - self.started).to_std().unwrap_or_default()
    }
}

/// Per-entity request bookkeeping of a stage.
#[derive(Debug, Default)]
struct Tally {
    requests: usize,
    failures: usize,
    /// Reason the stage as a whole failed, if it did
    fatal: Option<String>,
}

impl Tally {
    fn record(&mut self, result: &std::result::Result<(), FetchError>) {
        self.requests += 1;
        match result {
            Ok(()) | Err(FetchError::NotFound) => {}
            Err(FetchError::Cancelled) => {
                self.failures += 1;
                self.fatal.get_or_insert_with(|| "cancelled".to_string());
            }
            Err(_) => self.failures += 1,
        }
    }

    fn absorb(&mut self, other: Tally) {
        self.requests += other.requests;
        self.failures += other.failures;
        if self.fatal.is_none() {
            self.fatal = other.fatal;
        }
    }

    fn fail(&mut self, reason: impl Into<String>) {
        self.fatal.get_or_insert_with(|| reason.into());
    }

    /// A stage where every request failed produced nothing trustworthy.
    fn close(mut self) -> Self {
        if self.fatal.is_none() && self.requests > 0 && self.failures == self.requests {
            self.fatal = Some(format!("all {} requests failed", self.requests));
        }
        self
    }
}

/// Copy `raw` and stamp `fields` over it before normalization.
fn with_context(raw: &serde_json::Value, fields: &[(&str, serde_json::Value)]) -> serde_json::Value {
    let mut object = raw.as_object().cloned().unwrap_or_default();
    for (key, value) in fields {
        object.insert((*key).to_string(), value.clone());
    }
    serde_json::Value::Object(object)
}
