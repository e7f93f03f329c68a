//! # Reduction scheduler
//!
//! Drives one reduction step over a list of nights: selects the step's frames, groups them into
//! batches, and for each batch either skips it (artifact already on disk), or invalidates the
//! records it supersedes, combines it and commits a new [`ArtifactRecord`].
//!
//! ## Batch life cycle
//! -----------------
//! ```text
//! Pending ─► Grouped ─┬─► Skipped
//!                     └─► Building ─► ConflictCheck ─┬─► Invalidating ─┐
//!                                                   └─────────────────┴─► Committed | Failed
//! ```
//!
//! The prior records are invalidated **before** the combiner writes anything, so deleting their
//! files can never remove a freshly written replacement sharing the same name.
//!
//! ## Failure model
//! -----------------
//! * Planning errors ([`RedcalError::MissingKeyword`], [`RedcalError::SignatureDrift`],
//!   [`RedcalError::NoFrames`]) are raised for every requested step and night before any batch
//!   is built, so a fatal input problem leaves the database file untouched.
//! * A combine failure only fails its batch: partial outputs are removed, no record is inserted,
//!   and the failure is reported in the [`RunSummary`].
//! * A batch whose key is held by a record with disjoint members fails with
//!   [`RedcalError::DuplicateKey`] before anything is invalidated or written.
//! * An existing artifact is only skipped when no record ties its path to another member set.
//! * The database is saved after each night that changed it.
//!
//! ## Example
//! -----------------
//! ```rust,no_run
//! use camino::Utf8Path;
//! use redcal::config::InstrumentConfig;
//! use redcal::database::ArtifactDatabase;
//! use redcal::frames::{FrameIndex, JsonFrameIndex};
//! use redcal::scheduler::{CombineOutput, CombineRequest, ReductionScheduler, SchedulerOptions};
//! use redcal::redcal_errors::RedcalError;
//!
//! let config = InstrumentConfig::load(Utf8Path::new("t120.json")).unwrap();
//! let index = JsonFrameIndex::load(Utf8Path::new("frames.json")).unwrap();
//! let options = SchedulerOptions::new("/data/calib", "/data/calib/calib.json");
//! let mut db = ArtifactDatabase::load(&options.database_path).unwrap();
//!
//! let mut combine = |req: &CombineRequest<'_>| -> Result<CombineOutput, RedcalError> {
//!     // read req.inputs, write req.artifact_path ...
//!     Ok(CombineOutput::default())
//! };
//! let mut scheduler = ReductionScheduler::new(&index, &mut combine, options);
//! let summary = scheduler.run(&mut db, &config.steps, &index.nights()).unwrap();
//! println!("{summary}");
//! ```
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, error, info, warn};

use crate::batching::{partition_night, Batch};
use crate::config::StepConfig;
use crate::constants::{Night, NAXIS1, NAXIS2};
use crate::database::{ArtifactDatabase, ArtifactKey, ArtifactRecord, TimestampKey};
use crate::frames::FrameIndex;
use crate::redcal_errors::RedcalError;
use crate::signature::KeywordValue;

pub mod combiner;
pub mod summary;

pub use combiner::{summarize, CombineOutput, CombineRequest, Combiner};
pub use summary::{BatchFailure, RunSummary};

/// Life-cycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Grouped,
    Skipped,
    Building,
    ConflictCheck,
    Invalidating,
    Committed,
    Failed,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Pending => "PENDING",
            BatchState::Grouped => "GROUPED",
            BatchState::Skipped => "SKIPPED",
            BatchState::Building => "BUILDING",
            BatchState::ConflictCheck => "CONFLICT_CHECK",
            BatchState::Invalidating => "INVALIDATING",
            BatchState::Committed => "COMMITTED",
            BatchState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Run-wide settings of the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerOptions {
    /// Rebuild batches whose artifact already exists
    pub force: bool,
    /// Artifacts land in `<output_root>/<night>/`
    pub output_root: Utf8PathBuf,
    pub database_path: Utf8PathBuf,
}

impl SchedulerOptions {
    pub fn new(output_root: impl Into<Utf8PathBuf>, database_path: impl Into<Utf8PathBuf>) -> Self {
        SchedulerOptions {
            force: false,
            output_root: output_root.into(),
            database_path: database_path.into(),
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Deterministic file locations of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub artifact: Utf8PathBuf,
    pub mask: Option<Utf8PathBuf>,
    pub log: Utf8PathBuf,
}

impl OutputPaths {
    /// Paths of `batch` under `output_root` for `step`.
    ///
    /// The names derive from the lexically smallest member basename, stripped of its
    /// extension: identical member sets always map to identical paths.
    pub fn for_batch(output_root: &Utf8Path, step: &StepConfig, batch: &Batch) -> Self {
        let first = Utf8Path::new(batch.first_basename());
        let stem = first.file_stem().unwrap_or(first.as_str());
        let dir = output_root.join(&batch.night);

        let artifact_name = format!("{stem}{}", step.artifact_suffix);
        OutputPaths {
            log: dir.join(format!("{artifact_name}{}", step.log_suffix)),
            mask: step
                .mask_suffix
                .as_ref()
                .map(|suffix| dir.join(format!("{stem}{suffix}"))),
            artifact: dir.join(artifact_name),
        }
    }
}

/// Orchestrates batching, conflict invalidation and combining for reduction steps.
pub struct ReductionScheduler<'a, I: FrameIndex, C: Combiner> {
    index: &'a I,
    combiner: &'a mut C,
    options: SchedulerOptions,
}

impl<'a, I: FrameIndex, C: Combiner> ReductionScheduler<'a, I, C> {
    pub fn new(index: &'a I, combiner: &'a mut C, options: SchedulerOptions) -> Self {
        ReductionScheduler {
            index,
            combiner,
            options,
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Run several steps in order over the same nights.
    ///
    /// Every step is checked and planned before the first batch is built, so a fatal input
    /// error in any step leaves the database file untouched. Steps then execute one after the
    /// other: a flat step listed after the bias step sees the bias records committed by this
    /// very run.
    pub fn run(
        &mut self,
        db: &mut ArtifactDatabase,
        steps: &[StepConfig],
        nights: &[Night],
    ) -> Result<RunSummary, RedcalError> {
        let mut plans = Vec::with_capacity(steps.len());
        for step in steps {
            info!(
                "step '{}': {} night(s), force={}",
                step.redustep,
                nights.len(),
                self.options.force
            );
            db.record_signature_keywords(&step.redustep, &step.signature_keywords)?;
            plans.push((step, self.plan(step, nights)?));
        }

        let mut summary = RunSummary::default();
        for (step, plan) in plans {
            summary.merge(self.execute(db, step, plan)?);
        }
        Ok(summary)
    }

    /// Reduce one step over `nights`.
    ///
    /// Arguments
    /// -----------------
    /// * `db`: the artifact database, saved to [`SchedulerOptions::database_path`] after each
    ///   night that changed it.
    /// * `step`: the step configuration.
    /// * `nights`: nights to reduce; each must provide at least one frame for the step.
    ///
    /// Return
    /// ----------
    /// * The [`RunSummary`] of the step, or the first fatal error. Fatal input errors are
    ///   detected for all nights before anything is built.
    ///
    /// See also
    /// ------------
    /// * [`ReductionScheduler::run`] for several steps at once.
    pub fn run_step(
        &mut self,
        db: &mut ArtifactDatabase,
        step: &StepConfig,
        nights: &[Night],
    ) -> Result<RunSummary, RedcalError> {
        self.run(db, std::slice::from_ref(step), nights)
    }

    fn execute(
        &mut self,
        db: &mut ArtifactDatabase,
        step: &StepConfig,
        plan: Vec<(Night, Vec<Batch>)>,
    ) -> Result<RunSummary, RedcalError> {
        let mut summary = RunSummary::default();
        for (night, batches) in plan {
            let mut dirty = false;
            for batch in &batches {
                dirty |= self.process_batch(db, step, batch, &mut summary)?;
            }
            if dirty {
                db.save(&self.options.database_path)?;
            }
            info!("step '{}' night {night}: {} batch(es)", step.redustep, batches.len());
        }
        info!("step '{}' done: {summary}", step.redustep);
        Ok(summary)
    }

    /// Group the frames of every night; fails on the first fatal input problem.
    fn plan(
        &self,
        step: &StepConfig,
        nights: &[Night],
    ) -> Result<Vec<(Night, Vec<Batch>)>, RedcalError> {
        let mut plan = Vec::with_capacity(nights.len());
        for night in nights {
            let frames: Vec<_> = self
                .index
                .frames(night)
                .into_iter()
                .filter(|frame| frame.matches(&step.selection))
                .collect();
            if frames.is_empty() {
                return Err(RedcalError::NoFrames {
                    redustep: step.redustep.clone(),
                    night: night.clone(),
                });
            }
            debug!(
                "{}/{night}: {} frame(s) {}",
                step.redustep,
                frames.len(),
                BatchState::Pending
            );

            let batches = partition_night(
                night,
                &frames,
                &step.signature_keywords,
                step.max_timespan_hours,
            )?;
            debug!(
                "{}/{night}: {} batch(es) {}",
                step.redustep,
                batches.len(),
                BatchState::Grouped
            );
            plan.push((night.clone(), batches));
        }
        Ok(plan)
    }

    /// Take one batch to a final state.
    ///
    /// Return
    /// ----------
    /// * Whether the database was modified.
    fn process_batch(
        &mut self,
        db: &mut ArtifactDatabase,
        step: &StepConfig,
        batch: &Batch,
        summary: &mut RunSummary,
    ) -> Result<bool, RedcalError> {
        let key = ArtifactKey {
            redustep: step.redustep.clone(),
            signature_key: batch.signature_key(),
            timestamp: TimestampKey::from_mjd(batch.mean_timestamp),
        };
        let paths = OutputPaths::for_batch(&self.options.output_root, step, batch);
        let originf = batch.originf();

        // records owning this artifact path for another member set
        let stale: Vec<TimestampKey> = db
            .lookup_key(&key.redustep, &key.signature_key)
            .iter()
            .filter(|(_, record)| {
                record.artifact_path == paths.artifact && record.originf != originf
            })
            .map(|(timestamp, _)| *timestamp)
            .collect();

        if paths.artifact.exists() && !self.options.force {
            if stale.is_empty() {
                debug!("{key}: {}", BatchState::Skipped);
                summary.skipped += 1;
                if db.get(&key).is_none() {
                    warn!(
                        "{} exists but {key} has no record, leaving it untouched",
                        paths.artifact
                    );
                    summary.orphans += 1;
                }
                return Ok(false);
            }
            info!(
                "{} belongs to another member set, rebuilding it for {key}",
                paths.artifact
            );
        }

        debug!("{key}: {}", BatchState::Building);
        debug!("{key}: {}", BatchState::ConflictCheck);
        let mut conflicts = db.find_conflicts(&key.redustep, &key.signature_key, &originf);
        conflicts.extend(stale);
        conflicts.sort();
        conflicts.dedup();

        if db.get(&key).is_some() && !conflicts.contains(&key.timestamp) {
            let err = RedcalError::DuplicateKey {
                redustep: key.redustep.clone(),
                signature: key.signature_key.clone(),
                timestamp: key.timestamp.to_string(),
            };
            fail_batch(&key, batch, &paths, err, summary);
            return Ok(false);
        }

        let mut dirty = false;
        if !conflicts.is_empty() {
            debug!(
                "{key}: {} {} prior record(s)",
                BatchState::Invalidating,
                conflicts.len()
            );
            for timestamp in conflicts {
                if db
                    .invalidate(&key.redustep, &key.signature_key, timestamp)?
                    .is_some()
                {
                    summary.invalidated += 1;
                    dirty = true;
                }
            }
        }

        if let Some(dir) = paths.artifact.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let request = CombineRequest {
            redustep: &step.redustep,
            batch,
            inputs: batch
                .members
                .iter()
                .map(|frame| self.index.frame_path(frame))
                .collect(),
            artifact_path: &paths.artifact,
            mask_path: paths.mask.as_deref(),
        };

        match self.combiner.combine(&request) {
            Ok(output) => {
                let record = commit_record(batch, &paths, output);
                db.insert(&key.redustep, &key.signature_key, key.timestamp, record)?;
                log_batch(&paths.log, &key, batch, BatchState::Committed, None);
                debug!("{key}: {}", BatchState::Committed);
                summary.built += 1;
                Ok(true)
            }
            Err(err) => {
                let err = match err {
                    err @ RedcalError::CombineFailed { .. } => err,
                    other => RedcalError::CombineFailed {
                        basename: batch.first_basename().to_string(),
                        reason: other.to_string(),
                    },
                };
                discard_partial(&paths.artifact);
                if let Some(mask) = &paths.mask {
                    discard_partial(mask);
                }
                fail_batch(&key, batch, &paths, err, summary);
                Ok(dirty)
            }
        }
    }
}

/// Report a batch-level failure: error log, batch log, run summary.
fn fail_batch(
    key: &ArtifactKey,
    batch: &Batch,
    paths: &OutputPaths,
    err: RedcalError,
    summary: &mut RunSummary,
) {
    error!("{key}: {}: {err}", BatchState::Failed);
    log_batch(&paths.log, key, batch, BatchState::Failed, Some(&err));
    summary.failures.push(BatchFailure {
        redustep: key.redustep.clone(),
        night: batch.night.clone(),
        signature_key: key.signature_key.clone(),
        originf: batch.originf(),
        error: err,
    });
}

fn commit_record(batch: &Batch, paths: &OutputPaths, output: CombineOutput) -> ArtifactRecord {
    let mask = paths.mask.clone().filter(|_| output.mask_written);
    let mut record = ArtifactRecord::for_batch(batch, paths.artifact.clone(), mask, paths.log.clone());

    let (naxis1, naxis2) = output.naxis;
    record.master_keywords = output.keywords;
    record
        .master_keywords
        .insert(NAXIS1.to_string(), KeywordValue::Int(naxis1));
    record
        .master_keywords
        .insert(NAXIS2.to_string(), KeywordValue::Int(naxis2));
    record.stat_summary = output.stats;
    record.diagnostics = output.diagnostics;
    record
}

/// Remove whatever a failed combine left behind.
fn discard_partial(path: &Utf8Path) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed partial output {path}"),
        Err(err) => warn!("could not remove partial output {path}: {err}"),
    }
}

/// Write the batch log; a failure to do so never fails the batch.
fn log_batch(
    path: &Utf8Path,
    key: &ArtifactKey,
    batch: &Batch,
    state: BatchState,
    err: Option<&RedcalError>,
) {
    if let Some(dir) = path.parent() {
        if let Err(io) = std::fs::create_dir_all(dir) {
            warn!("could not create {dir} for the batch log: {io}");
            return;
        }
    }
    if let Err(io) = std::fs::write(path, batch_log_text(key, batch, state, err)) {
        warn!("could not write batch log {path}: {io}");
    }
}

fn batch_log_text(
    key: &ArtifactKey,
    batch: &Batch,
    state: BatchState,
    err: Option<&RedcalError>,
) -> String {
    let mut lines = vec![
        format!("step: {}", key.redustep),
        format!("night: {}", batch.night),
        format!("signature: {}", key.signature_key),
        format!("timestamp: {}", key.timestamp),
        format!("status: {state}"),
        format!("inputs: {}", batch.len()),
    ];
    lines.extend(batch.originf().into_iter().map(|name| format!("  {name}")));
    if let Some(err) = err {
        lines.push(format!("error: {err}"));
    }
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod scheduler_test {
    use super::*;
    use crate::constants::KeywordMap;
    use crate::frames::RawFrame;
    use crate::signature::Signature;

    fn step() -> StepConfig {
        StepConfig::builder("flat")
            .signature_keywords(["FILTER"])
            .max_timespan_hours(6.0)
            .mask_suffix("_mask.fits")
            .build()
            .unwrap()
    }

    fn batch(names: &[&str]) -> Batch {
        let frames = names
            .iter()
            .map(|name| RawFrame {
                basename: name.to_string(),
                night: "2023-03-01".into(),
                timestamp: 60004.5,
                signature_values: KeywordMap::new(),
                exposure_meta: KeywordMap::new(),
            })
            .collect();
        Batch::new(
            "2023-03-01".into(),
            Signature::from_pairs([("FILTER", "R")]),
            frames,
        )
        .unwrap()
    }

    #[test]
    fn test_output_paths() {
        let paths = OutputPaths::for_batch(
            Utf8Path::new("/calib"),
            &step(),
            &batch(&["r0012.fits", "r0010.fits"]),
        );
        assert_eq!(paths.artifact, "/calib/2023-03-01/r0010_master.fits");
        assert_eq!(
            paths.mask.as_deref(),
            Some(Utf8Path::new("/calib/2023-03-01/r0010_mask.fits"))
        );
        assert_eq!(paths.log, "/calib/2023-03-01/r0010_master.fits.log");
    }

    #[test]
    fn test_commit_record_adds_dimensions() {
        let b = batch(&["a.fits", "b.fits"]);
        let paths = OutputPaths::for_batch(Utf8Path::new("out"), &step(), &b);
        let output = CombineOutput {
            naxis: (2048, 1024),
            keywords: KeywordMap::from([("EXPTIME".to_string(), KeywordValue::from(5.0))]),
            mask_written: false,
            ..Default::default()
        };
        let record = commit_record(&b, &paths, output);
        assert_eq!(record.naxis(), Some((2048, 1024)));
        assert_eq!(record.mask_path, None);
        assert_eq!(record.originf, ["a.fits", "b.fits"]);
        assert_eq!(record.origin_count, 2);
        assert!(record.master_keywords.contains_key("EXPTIME"));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(BatchState::ConflictCheck.to_string(), "CONFLICT_CHECK");
        assert_eq!(BatchState::Committed.to_string(), "COMMITTED");
    }
}
