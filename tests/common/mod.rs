#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::SystemTime;

use ahash::{HashSet, HashSetExt};
use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::DMatrix;

use redcal::config::StepConfig;
use redcal::constants::{KeywordMap, Night, MJD};
use redcal::database::ArtifactDatabase;
use redcal::frames::{FrameIndex, JsonFrameIndex, RawFrame};
use redcal::redcal_errors::RedcalError;
use redcal::scheduler::{
    summarize, CombineOutput, CombineRequest, Combiner, ReductionScheduler, RunSummary,
    SchedulerOptions,
};
use redcal::signature::KeywordValue;

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Temporary directory, kept alive by the returned guard.
pub fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, path)
}

pub fn flat(basename: &str, night: &str, timestamp: MJD, filter: &str) -> RawFrame {
    RawFrame {
        basename: basename.into(),
        night: night.into(),
        timestamp,
        signature_values: KeywordMap::from([
            ("FILTER".to_string(), KeywordValue::from(filter)),
            ("BINX".to_string(), KeywordValue::Int(1)),
        ]),
        exposure_meta: KeywordMap::from([("IMAGETYP".to_string(), KeywordValue::from("flat"))]),
    }
}

pub fn bias(basename: &str, night: &str, timestamp: MJD) -> RawFrame {
    RawFrame {
        basename: basename.into(),
        night: night.into(),
        timestamp,
        signature_values: KeywordMap::from([("BINX".to_string(), KeywordValue::Int(1))]),
        exposure_meta: KeywordMap::from([("IMAGETYP".to_string(), KeywordValue::from("bias"))]),
    }
}

pub fn index(frames: Vec<RawFrame>) -> JsonFrameIndex {
    JsonFrameIndex::from_frames("/data/raw", frames).unwrap()
}

/// Flat step: FILTER + BINX signature, 6 h window, with a mask.
pub fn flat_step() -> StepConfig {
    StepConfig::builder("flat")
        .signature_keywords(["FILTER", "BINX"])
        .max_timespan_hours(6.0)
        .mask_suffix("_mask.fits")
        .select("IMAGETYP", "flat")
        .build()
        .unwrap()
}

pub fn bias_step() -> StepConfig {
    StepConfig::builder("bias")
        .signature_keywords(["BINX"])
        .max_timespan_hours(12.0)
        .select("IMAGETYP", "bias")
        .build()
        .unwrap()
}

pub fn options(root: &Utf8PathBuf) -> SchedulerOptions {
    SchedulerOptions::new(root.join("calib"), root.join("calib").join("calib.json"))
}

/// Combiner writing small text files, failing on demand.
pub struct ScriptedCombiner {
    pub naxis: (i64, i64),
    /// First basenames of the batches to fail
    pub fail_on: HashSet<String>,
    /// Member basenames of every batch combined, in call order
    pub calls: Vec<Vec<String>>,
}

impl ScriptedCombiner {
    pub fn new() -> Self {
        ScriptedCombiner {
            naxis: (4, 3),
            fail_on: HashSet::new(),
            calls: Vec::new(),
        }
    }

    pub fn failing_on(mut self, basename: &str) -> Self {
        self.fail_on.insert(basename.to_string());
        self
    }
}

impl Combiner for ScriptedCombiner {
    fn combine(&mut self, request: &CombineRequest<'_>) -> Result<CombineOutput, RedcalError> {
        let originf = request.batch.originf();
        self.calls.push(originf.clone());

        // a failing combine still leaves a partial file behind
        std::fs::write(request.artifact_path, originf.join("\n"))?;
        if let Some(mask) = request.mask_path {
            std::fs::write(mask, "mask")?;
        }
        if self.fail_on.contains(request.batch.first_basename()) {
            return Err(RedcalError::CombineFailed {
                basename: request.batch.first_basename().to_string(),
                reason: "stack rejected".into(),
            });
        }

        let (n1, n2) = self.naxis;
        let level = 1000.0 * originf.len() as f64;
        let data = DMatrix::from_element(n2 as usize, n1 as usize, level);
        Ok(CombineOutput {
            naxis: self.naxis,
            keywords: KeywordMap::from([(
                "NCOMBINE".to_string(),
                KeywordValue::Int(originf.len() as i64),
            )]),
            stats: summarize(&data),
            mask_written: request.mask_path.is_some(),
            diagnostics: BTreeMap::from([(
                "inputs".to_string(),
                serde_json::json!(request.inputs),
            )]),
        })
    }
}

pub fn nights(index: &JsonFrameIndex) -> Vec<Night> {
    index.nights()
}

/// Run `step` over `nights` with a fresh scheduler.
pub fn run(
    index: &JsonFrameIndex,
    combiner: &mut ScriptedCombiner,
    options: SchedulerOptions,
    db: &mut ArtifactDatabase,
    step: &StepConfig,
    nights: &[Night],
) -> Result<RunSummary, RedcalError> {
    let mut scheduler = ReductionScheduler::new(index, combiner, options);
    scheduler.run_step(db, step, nights)
}

/// Every file under `dir` with its modification time.
pub fn snapshot(dir: &Utf8Path) -> BTreeMap<Utf8PathBuf, SystemTime> {
    let mut files = BTreeMap::new();
    for entry in dir.read_dir_utf8().unwrap() {
        let entry = entry.unwrap();
        let meta = entry.metadata().unwrap();
        if meta.is_dir() {
            files.extend(snapshot(entry.path()));
        } else {
            files.insert(entry.path().to_path_buf(), meta.modified().unwrap());
        }
    }
    files
}
