//! # Artifact records
//!
//! One [`ArtifactRecord`] is persisted per combined batch. It carries everything a later run or a
//! downstream reduction needs without reopening the artifact: where the files are, which raw
//! frames went in, the propagated header snapshot, and summary statistics.
//!
//! Records are never edited in place. A record is created when its batch is committed and
//! disappears when a conflicting regrouping supersedes it.
use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::batching::Batch;
use crate::constants::{KeywordMap, Night, StatMap, MJD, NAXIS1, NAXIS2};
use crate::signature::Signature;

/// Persisted result of combining one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub night: Night,
    pub signature: Signature,
    pub mean_timestamp: MJD,
    pub artifact_path: Utf8PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_path: Option<Utf8PathBuf>,
    pub log_path: Utf8PathBuf,
    #[serde(default)]
    pub stat_summary: StatMap,
    #[serde(default)]
    pub master_keywords: KeywordMap,
    pub origin_count: usize,
    /// Contributing basenames, sorted
    pub originf: Vec<String>,
    /// Step-specific diagnostics (e.g. the bias used to reduce a flat)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub diagnostics: BTreeMap<String, serde_json::Value>,
}

impl ArtifactRecord {
    /// Start a record for `batch`; the provenance fields are copied from the batch so that
    /// `originf` always equals the batch membership.
    pub fn for_batch(
        batch: &Batch,
        artifact_path: Utf8PathBuf,
        mask_path: Option<Utf8PathBuf>,
        log_path: Utf8PathBuf,
    ) -> Self {
        let originf = batch.originf();
        ArtifactRecord {
            night: batch.night.clone(),
            signature: batch.signature.clone(),
            mean_timestamp: batch.mean_timestamp,
            artifact_path,
            mask_path,
            log_path,
            stat_summary: StatMap::new(),
            master_keywords: KeywordMap::new(),
            origin_count: originf.len(),
            originf,
            diagnostics: BTreeMap::new(),
        }
    }

    /// Dimensions declared by the artifact header, if both axes are recorded.
    pub fn naxis(&self) -> Option<(i64, i64)> {
        let n1 = self.master_keywords.get(NAXIS1)?.as_i64()?;
        let n2 = self.master_keywords.get(NAXIS2)?.as_i64()?;
        Some((n1, n2))
    }

    /// Files owned by the record.
    pub fn files(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        std::iter::once(&self.artifact_path).chain(self.mask_path.iter())
    }
}
