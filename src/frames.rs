//! # Raw frames and the frame index
//!
//! The scheduler never opens an image. It only needs, per night, the list of raw frame
//! descriptors ([`RawFrame`]) with their resolved keyword values and timestamps. Anything able to
//! enumerate nights and frames can feed it by implementing [`FrameIndex`].
//!
//! [`JsonFrameIndex`] is the stock implementation: a JSON document written by the header
//! scanner, or an in-memory list of frames.
//!
//! ## JSON layout
//! -----------------
//! ```json
//! {
//!   "raw_root": "/data/raw",
//!   "nights": {
//!     "2023-03-01": [
//!       { "basename": "r0001.fits", "date_obs": "2023-03-01T18:02:11",
//!         "signature": { "CCDSEC": "[1:2048,1:2048]", "BINX": 1 },
//!         "meta": { "IMAGETYP": "bias", "EXPTIME": 0.0 } }
//!     ]
//!   }
//! }
//! ```
//!
//! Each frame gives its epoch as exactly one of `mjd`, `jd`, or `date_obs` (ISO, UTC);
//! when several are present the first one in that order wins.
//!
//! ## Invariants
//! -----------------
//! * Night labels are `YYYY-MM-DD` (validated by [`night_to_mjd`]).
//! * A basename appears at most once per night.
//! * Frames keep the order of the source document; batching relies on it.
use std::collections::BTreeMap;

use ahash::{HashSet, HashSetExt};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::constants::{KeywordMap, Night, MJD};
use crate::redcal_errors::RedcalError;
use crate::time::{date_to_mjd, jd_to_mjd, night_to_mjd};

/// A raw calibration or science exposure, as described by the frame index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    /// File name, unique within a night
    pub basename: String,
    pub night: Night,
    /// Mid-exposure epoch (MJD, UTC)
    pub timestamp: MJD,
    /// Instrument/optical setup descriptors (filter, CCD section, binning…)
    pub signature_values: KeywordMap,
    /// Other keywords needed downstream, opaque to the scheduler
    pub exposure_meta: KeywordMap,
}

impl RawFrame {
    /// Whether every `keyword = value` pair of `selection` holds for this frame.
    ///
    /// Keywords are searched in the exposure metadata, then in the signature values.
    /// An empty selection matches every frame.
    pub fn matches(&self, selection: &KeywordMap) -> bool {
        selection.iter().all(|(keyword, expected)| {
            self.exposure_meta
                .get(keyword)
                .or_else(|| self.signature_values.get(keyword))
                == Some(expected)
        })
    }
}

/// Source of raw frame descriptors.
pub trait FrameIndex {
    /// All night labels known to the index, sorted.
    fn nights(&self) -> Vec<Night>;

    /// Frames of one night in their natural order; empty if the night is unknown.
    fn frames(&self, night: &str) -> Vec<RawFrame>;

    /// Location of the raw file of `frame`, handed to the combiner.
    fn frame_path(&self, frame: &RawFrame) -> Utf8PathBuf;
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
    basename: String,
    #[serde(default)]
    mjd: Option<f64>,
    #[serde(default)]
    jd: Option<f64>,
    #[serde(default)]
    date_obs: Option<String>,
    #[serde(default)]
    signature: KeywordMap,
    #[serde(default)]
    meta: KeywordMap,
}

#[derive(Debug, Deserialize)]
struct IndexDocument {
    raw_root: Utf8PathBuf,
    nights: BTreeMap<Night, Vec<FrameEntry>>,
}

/// Frame index backed by a JSON document or an in-memory frame list.
///
/// Raw files are expected at `<raw_root>/<night>/<basename>`.
#[derive(Debug, Clone, Default)]
pub struct JsonFrameIndex {
    raw_root: Utf8PathBuf,
    nights: BTreeMap<Night, Vec<RawFrame>>,
}

impl JsonFrameIndex {
    /// Load and validate an index document.
    ///
    /// Arguments
    /// -----------------
    /// * `path`: location of the JSON document.
    ///
    /// Return
    /// ----------
    /// * The index, or [`RedcalError::InvalidFrameIndex`] on a bad night label, a frame without
    ///   epoch, or a duplicated basename; I/O and JSON errors are propagated.
    pub fn load(path: &Utf8Path) -> Result<Self, RedcalError> {
        let text = std::fs::read_to_string(path)?;
        let document: IndexDocument = serde_json::from_str(&text)?;

        let mut frames = Vec::new();
        for (night, entries) in document.nights {
            for entry in entries {
                let timestamp = entry_timestamp(&entry, &night)?;
                frames.push(RawFrame {
                    basename: entry.basename,
                    night: night.clone(),
                    timestamp,
                    signature_values: entry.signature,
                    exposure_meta: entry.meta,
                });
            }
        }
        Self::from_frames(document.raw_root, frames)
    }

    /// Build an index from frames already in memory, grouped by their `night` field.
    pub fn from_frames(
        raw_root: impl Into<Utf8PathBuf>,
        frames: Vec<RawFrame>,
    ) -> Result<Self, RedcalError> {
        let mut nights: BTreeMap<Night, Vec<RawFrame>> = BTreeMap::new();
        for frame in frames {
            night_to_mjd(&frame.night).map_err(|_| {
                RedcalError::InvalidFrameIndex(format!("invalid night label '{}'", frame.night))
            })?;
            nights.entry(frame.night.clone()).or_default().push(frame);
        }

        for (night, frames) in &nights {
            let mut seen = HashSet::with_capacity(frames.len());
            for frame in frames {
                if !seen.insert(frame.basename.as_str()) {
                    return Err(RedcalError::InvalidFrameIndex(format!(
                        "basename {} appears twice on night {night}",
                        frame.basename
                    )));
                }
            }
        }

        Ok(JsonFrameIndex {
            raw_root: raw_root.into(),
            nights,
        })
    }

    pub fn len(&self) -> usize {
        self.nights.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn entry_timestamp(entry: &FrameEntry, night: &str) -> Result<MJD, RedcalError> {
    if let Some(mjd) = entry.mjd {
        return Ok(mjd);
    }
    if let Some(jd) = entry.jd {
        return Ok(jd_to_mjd(jd));
    }
    match &entry.date_obs {
        Some(date) => date_to_mjd(date),
        None => Err(RedcalError::InvalidFrameIndex(format!(
            "frame {} of night {night} has no mjd, jd or date_obs",
            entry.basename
        ))),
    }
}

impl FrameIndex for JsonFrameIndex {
    fn nights(&self) -> Vec<Night> {
        self.nights.keys().cloned().collect()
    }

    fn frames(&self, night: &str) -> Vec<RawFrame> {
        self.nights.get(night).cloned().unwrap_or_default()
    }

    fn frame_path(&self, frame: &RawFrame) -> Utf8PathBuf {
        self.raw_root.join(&frame.night).join(&frame.basename)
    }
}
