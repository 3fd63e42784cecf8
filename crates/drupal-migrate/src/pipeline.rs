//! Batch runner: drives one migration job from count to the last page.
//!
//! `Init -> Counting -> Paging(offset) -> Done`. Pages are fetched one at a
//! time and items are processed one at a time. A failed source query aborts
//! the run; everything that goes wrong for a single item is logged, counted
//! and skipped. Cancellation is only observed between pages.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connectors::RowSource;
use crate::error::{Error, Result};
use crate::job::{EntityKind, MigrationJob, RunMode};
use crate::parser;
use crate::progress::{NoProgress, ProgressSink};
use crate::record::{EntityRecord, RawRow};
use crate::sink::{RecordSink, SinkOutcome};
use crate::store::{DeferGuard, Deferrals, TargetStore};
use crate::transform::{AuthorCache, ExtensionPoint, TransformContext, TransformRegistry};
use crate::validator::{self, PostsValidator, ValidationOutcome, ValidatorRules};

/// Process exit status when the job matched no rows.
pub const EXIT_NO_ROWS: u8 = 2;

/// Process exit status when the run was interrupted.
pub const EXIT_CANCELLED: u8 = 130;

/// Migration statistics.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MigrationStats {
    /// Rows the job covers, after the import limit.
    pub total: u64,
    /// Rows returned by the source.
    pub fetched: u64,
    /// Items written (or, when validating, scanned without error).
    pub succeeded: u64,
    /// Rows the parser rejected.
    pub skipped: u64,
    /// Rows whose origin id was already migrated.
    pub already_migrated: u64,
    /// Posts rewritten by the validator.
    pub updated: u64,
    /// Items the target store rejected.
    pub failed: u64,
    /// Pages fetched.
    pub pages: u64,
    /// The run stopped at a page boundary because it was cancelled.
    pub cancelled: bool,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl MigrationStats {
    /// Calculate throughput (items per second).
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.succeeded as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    /// Process exit status for this run.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        if self.total == 0 {
            EXIT_NO_ROWS
        } else if self.cancelled {
            EXIT_CANCELLED
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RunState {
    Init,
    Counting,
    Paging(u64),
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Counting => f.write_str("counting"),
            Self::Paging(offset) => write!(f, "paging({offset})"),
            Self::Done => f.write_str("done"),
        }
    }
}

enum ItemOutcome {
    Skipped,
    Written,
    AlreadyMigrated,
    Rewritten,
}

/// What a run hands each item to.
enum Handoff {
    Import(RecordSink),
    Validate(PostsValidator),
}

/// Migration pipeline.
pub struct Pipeline {
    source: Arc<dyn RowSource>,
    store: Arc<dyn TargetStore>,
    transforms: Arc<TransformRegistry>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    authors: AuthorCache,
    skip_migrated: bool,
    rules: Option<ValidatorRules>,
}

impl Pipeline {
    /// Creates a pipeline reading from `source` and writing to `store`.
    #[must_use]
    pub fn new(
        source: Arc<dyn RowSource>,
        store: Arc<dyn TargetStore>,
        transforms: Arc<TransformRegistry>,
    ) -> Self {
        Self {
            source,
            store,
            transforms,
            progress: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
            authors: AuthorCache::new(),
            skip_migrated: true,
            rules: None,
        }
    }

    /// Reports per-item progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Stops the run at the next page boundary once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Whether already-migrated origin ids are skipped (default `true`).
    #[must_use]
    pub fn skip_migrated(mut self, skip: bool) -> Self {
        self.skip_migrated = skip;
        self
    }

    /// Rules used when the job runs in [`RunMode::Validate`].
    #[must_use]
    pub fn with_validator(mut self, rules: ValidatorRules) -> Self {
        self.rules = Some(rules);
        self
    }

    /// The author table, once a post import has loaded it.
    #[must_use]
    pub fn authors(&self) -> &AuthorCache {
        &self.authors
    }

    /// Runs `job` to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be counted or a page cannot be
    /// fetched, or if a validation run has no validator rules. Per-item
    /// failures are counted in the returned stats instead.
    pub async fn run(&self, job: &mut MigrationJob) -> Result<MigrationStats> {
        let start = Instant::now();
        let mut stats = MigrationStats::default();
        let kind = job.kind;

        let mut state = RunState::Init;
        debug!("{} {} job: {}", kind, job.mode, state);
        let handoff = self.handoff(job)?;
        let _deferral = (job.mode == RunMode::Import)
            .then(|| DeferGuard::begin(self.store.clone(), Deferrals::ALL));

        state = RunState::Counting;
        debug!("{} {} job: {}", kind, job.mode, state);
        let count = self.source.count(job).await.map_err(|e| {
            error!("Counting {} failed: {}", kind.plural(), e);
            e
        })?;
        stats.total = job.set_total(count);
        if stats.total == 0 {
            warn!("No {} found to {}", kind.plural(), job.mode);
            stats.duration_secs = start.elapsed().as_secs_f64();
            return Ok(stats);
        }
        info!(
            "Starting {} of {} {} from {} ({} per page)",
            job.mode,
            stats.total,
            kind.plural(),
            self.source.name(),
            job.page_size
        );
        self.progress.start(stats.total);

        while !job.is_exhausted() {
            if self.cancel.is_cancelled() {
                warn!("Cancelled at offset {} of {}", job.offset, stats.total);
                stats.cancelled = true;
                break;
            }

            state = RunState::Paging(job.offset);
            let limit = job.next_limit();
            let page = self
                .source
                .fetch_page(job, job.offset, limit)
                .await
                .map_err(|e| {
                    error!("Fetching {} at {} failed: {}", kind.plural(), state, e);
                    e
                })?;
            stats.pages += 1;
            stats.fetched += page.len() as u64;
            debug!("{}: {} of {} rows", state, page.len(), limit);

            let short = page.len() < limit;
            for row in page {
                match self.process_item(job, &handoff, row).await {
                    Ok(ItemOutcome::Skipped) => stats.skipped += 1,
                    Ok(outcome) => {
                        match outcome {
                            ItemOutcome::AlreadyMigrated => stats.already_migrated += 1,
                            ItemOutcome::Rewritten => {
                                stats.updated += 1;
                                stats.succeeded += 1;
                            }
                            _ => stats.succeeded += 1,
                        }
                        self.progress.tick();
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(_) => stats.failed += 1,
                }
            }

            job.offset += limit as u64;
            if short {
                debug!("Source ran out of {} before the counted total", kind.plural());
                break;
            }
        }

        state = RunState::Done;
        debug!("{} {} job: {}", kind, job.mode, state);
        if job.mode == RunMode::Import {
            if let Err(e) = self.store.finish_import().await {
                warn!("Post-import recalculation failed: {}", e);
            }
        }

        stats.duration_secs = start.elapsed().as_secs_f64();
        self.progress.finish(if stats.cancelled {
            "Migration cancelled"
        } else {
            "Migration complete"
        });

        info!(
            "{} {} done: {} succeeded, {} already migrated, {} skipped, {} failed in {:.2}s ({:.0} items/sec)",
            kind,
            job.mode,
            stats.succeeded,
            stats.already_migrated,
            stats.skipped,
            stats.failed,
            stats.duration_secs,
            stats.throughput()
        );

        Ok(stats)
    }

    fn handoff(&self, job: &MigrationJob) -> Result<Handoff> {
        match job.mode {
            RunMode::Import => Ok(Handoff::Import(RecordSink::new(
                self.store.clone(),
                self.skip_migrated,
            ))),
            RunMode::Validate => {
                if job.kind != EntityKind::Post {
                    return Err(Error::Config(format!(
                        "only posts can be validated, not {}",
                        job.kind.plural()
                    )));
                }
                let rules = self
                    .rules
                    .clone()
                    .ok_or_else(|| Error::Config("validator rules are not configured".into()))?;
                Ok(Handoff::Validate(PostsValidator::new(
                    rules,
                    RecordSink::new(self.store.clone(), false),
                )))
            }
        }
    }

    async fn process_item(
        &self,
        job: &MigrationJob,
        handoff: &Handoff,
        row: RawRow,
    ) -> Result<ItemOutcome> {
        let kind = job.kind;
        match handoff {
            Handoff::Import(sink) => {
                let Some(record) = parser::parse_item(kind, row) else {
                    debug!("Skipping empty {} row", kind);
                    return Ok(ItemOutcome::Skipped);
                };
                let label = record_origin(kind, Some(&record));
                let record = self.transform(kind, record).await.map_err(|e| {
                    warn!("Could not prepare {} {}: {}", kind, label, e);
                    e
                })?;
                match sink.insert(kind, &record).await {
                    Ok(SinkOutcome::AlreadyMigrated(_)) => Ok(ItemOutcome::AlreadyMigrated),
                    Ok(_) => Ok(ItemOutcome::Written),
                    Err(e) => {
                        warn!(item = ?record, "Failed to import {} {}: {}", kind, record_origin(kind, Some(&record)), e);
                        Err(e)
                    }
                }
            }
            Handoff::Validate(validator) => {
                let Some(record) = validator::parse_row(row) else {
                    debug!("Skipping post row without an ID");
                    return Ok(ItemOutcome::Skipped);
                };
                match validator.process(record.clone()).await {
                    Ok(ValidationOutcome::Unchanged) => Ok(ItemOutcome::Written),
                    Ok(ValidationOutcome::Updated { .. }) => Ok(ItemOutcome::Rewritten),
                    Err(e) => {
                        warn!(item = ?record, "Failed to validate post {:?}: {}", record.target_id, e);
                        Err(e)
                    }
                }
            }
        }
    }

    async fn transform(&self, kind: EntityKind, record: EntityRecord) -> Result<EntityRecord> {
        let authors = if kind == EntityKind::Post {
            Some(self.authors.get_or_load(self.store.as_ref()).await?)
        } else {
            None
        };
        let ctx = TransformContext { authors };
        Ok(self
            .transforms
            .apply(ExtensionPoint::for_kind(kind), record, &ctx))
    }
}

/// `<origin key>=<id>` of a record, for log lines.
fn record_origin(kind: EntityKind, record: Option<&EntityRecord>) -> String {
    let id = record
        .and_then(|r| r.origin_id(kind.origin_key()))
        .map_or_else(|| "?".to_string(), |id| id.to_string());
    format!("{}={}", kind.origin_key(), id)
}
