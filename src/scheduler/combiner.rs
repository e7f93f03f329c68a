//! # Combiner seam
//!
//! The scheduler never touches pixels. For every batch it hands a [`CombineRequest`] to a
//! [`Combiner`], which reads the member frames, writes the combined artifact (and optionally a
//! mask) at the requested paths, and reports what it produced in a [`CombineOutput`].
//!
//! [`summarize`] computes the usual statistical summary of a combined image and is available to
//! any implementation.
use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::DMatrix;

use crate::batching::Batch;
use crate::constants::{KeywordMap, StatMap};
use crate::redcal_errors::RedcalError;

/// Everything a combiner needs to build one artifact.
#[derive(Debug, Clone)]
pub struct CombineRequest<'a> {
    pub redustep: &'a str,
    pub batch: &'a Batch,
    /// Raw file of each member, in member order
    pub inputs: Vec<Utf8PathBuf>,
    pub artifact_path: &'a Utf8Path,
    /// Where to write a mask, if the step produces one
    pub mask_path: Option<&'a Utf8Path>,
}

/// What a successful combine produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombineOutput {
    /// Dimensions of the artifact, `(NAXIS1, NAXIS2)`
    pub naxis: (i64, i64),
    /// Header snapshot propagated to the record
    pub keywords: KeywordMap,
    pub stats: StatMap,
    /// Whether a mask was written at the requested mask path
    pub mask_written: bool,
    pub diagnostics: BTreeMap<String, serde_json::Value>,
}

/// Builds calibration artifacts from batches.
pub trait Combiner {
    /// Combine the members of `request.batch`.
    ///
    /// Any error is treated as a failure of this batch only; the scheduler removes whatever
    /// was written at the requested paths and goes on with the next batch.
    fn combine(&mut self, request: &CombineRequest<'_>) -> Result<CombineOutput, RedcalError>;
}

impl<F> Combiner for F
where
    F: FnMut(&CombineRequest<'_>) -> Result<CombineOutput, RedcalError>,
{
    fn combine(&mut self, request: &CombineRequest<'_>) -> Result<CombineOutput, RedcalError> {
        self(request)
    }
}

/// Mean, median, standard deviation, min and max of `data`.
///
/// Return
/// ----------
/// * A [`StatMap`] with keys `mean`, `median`, `std`, `min`, `max`; empty for an empty matrix.
pub fn summarize(data: &DMatrix<f64>) -> StatMap {
    if data.is_empty() {
        return StatMap::new();
    }
    let n = data.len() as f64;
    let mean = data.mean();
    let variance = data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let mut sorted: Vec<f64> = data.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    StatMap::from([
        ("mean".to_string(), mean),
        ("median".to_string(), median),
        ("std".to_string(), variance.sqrt()),
        ("min".to_string(), data.min()),
        ("max".to_string(), data.max()),
    ])
}
