//! # Artifact database
//!
//! Provenance index of every calibration artifact produced so far, organised as
//!
//! ```text
//! redustep → signature key → timestamp key → ArtifactRecord
//! ```
//!
//! plus, per redustep, the keyword list defining that step's signature.
//!
//! Modules
//! -----------------
//! * [`record`](crate::database::record) – The persisted [`ArtifactRecord`].
//! * [`storage`](crate::database::storage) – Whole-file JSON load and atomic save.
//! * [`display`](crate::database::display) – Table rendering and CSV listing.
//!
//! Invariants
//! -----------------
//! * Within one (redustep, signature key), no two records share a contributing basename. The
//!   database does not enforce it on [`insert`](ArtifactDatabase::insert); callers run
//!   [`find_conflicts`](ArtifactDatabase::find_conflicts) and
//!   [`invalidate`](ArtifactDatabase::invalidate) first.
//! * A key is inserted at most once between two invalidations.
//! * The signature keyword list of a step never changes once recorded.
//!
//! All maps are ordered so that the serialized document is deterministic and diffable.
//!
//! Concurrency
//! -----------------
//! The database is plain process-local state without locking. At most one scheduler process
//! may work on a given database file at a time.
use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::str::FromStr;

use ahash::{HashSet, HashSetExt};
use camino::Utf8Path;
use log::{debug, warn};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{Redustep, SignatureKey, MJD, TIMESTAMP_KEY_DECIMALS};
use crate::redcal_errors::RedcalError;
use crate::signature::Signature;

pub mod display;
pub mod record;
pub mod storage;

pub use record::ArtifactRecord;

/// Timestamp component of an artifact key.
///
/// The batch mean MJD rounded to [`TIMESTAMP_KEY_DECIMALS`] decimals. Rounding happens at
/// construction, so a key survives the JSON round trip unchanged and a rerun over the same
/// frames recomputes the very same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimestampKey(OrderedFloat<f64>);

impl TimestampKey {
    pub fn from_mjd(mjd: MJD) -> Self {
        let scale = 10f64.powi(TIMESTAMP_KEY_DECIMALS as i32);
        TimestampKey(OrderedFloat((mjd * scale).round() / scale))
    }

    pub fn mjd(&self) -> MJD {
        self.0 .0
    }
}

impl fmt::Display for TimestampKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}", TIMESTAMP_KEY_DECIMALS, self.mjd())
    }
}

impl FromStr for TimestampKey {
    type Err = std::num::ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<f64>().map(TimestampKey::from_mjd)
    }
}

impl Serialize for TimestampKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimestampKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Full address of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub redustep: Redustep,
    pub signature_key: SignatureKey,
    pub timestamp: TimestampKey,
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.redustep, self.signature_key, self.timestamp
        )
    }
}

/// Records of one signature, ordered by timestamp.
pub type SignatureRecords = BTreeMap<TimestampKey, ArtifactRecord>;

static NO_RECORDS: SignatureRecords = BTreeMap::new();

/// Everything recorded for one reduction step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepTable {
    /// Keywords defining the signature of the step, sorted
    #[serde(default)]
    pub signaturekeys: Vec<String>,
    #[serde(default)]
    pub artifacts: BTreeMap<SignatureKey, SignatureRecords>,
}

/// The whole provenance index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactDatabase {
    steps: BTreeMap<Redustep, StepTable>,
}

impl ArtifactDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of `signature` under `redustep`; empty if either is unseen.
    pub fn lookup(&self, redustep: &str, signature: &Signature) -> &SignatureRecords {
        self.lookup_key(redustep, &signature.canonical_key())
    }

    /// Same as [`lookup`](Self::lookup) with an already canonical key.
    pub fn lookup_key(&self, redustep: &str, signature_key: &str) -> &SignatureRecords {
        self.steps
            .get(redustep)
            .and_then(|step| step.artifacts.get(signature_key))
            .unwrap_or(&NO_RECORDS)
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<&ArtifactRecord> {
        self.lookup_key(&key.redustep, &key.signature_key)
            .get(&key.timestamp)
    }

    /// Timestamp keys of every record of (`redustep`, `signature_key`) sharing at least one
    /// basename with `candidate_originf`.
    ///
    /// A non-empty result means committing the candidate would account some raw frame twice.
    ///
    /// Arguments
    /// -----------------
    /// * `redustep`: the reduction step.
    /// * `signature_key`: canonical key of the candidate batch.
    /// * `candidate_originf`: basenames of the candidate batch.
    ///
    /// Return
    /// ----------
    /// * The conflicting keys in timestamp order.
    pub fn find_conflicts(
        &self,
        redustep: &str,
        signature_key: &str,
        candidate_originf: &[String],
    ) -> Vec<TimestampKey> {
        let mut candidate = HashSet::with_capacity(candidate_originf.len());
        candidate.extend(candidate_originf.iter().map(String::as_str));

        self.lookup_key(redustep, signature_key)
            .iter()
            .filter(|(_, record)| {
                record
                    .originf
                    .iter()
                    .any(|name| candidate.contains(name.as_str()))
            })
            .map(|(timestamp, _)| *timestamp)
            .collect()
    }

    /// Delete a record and, best effort, its artifact and mask files.
    ///
    /// Files that are already gone are reported with a warning. Any other I/O failure is
    /// returned and leaves the record in place.
    ///
    /// Return
    /// ----------
    /// * The removed record, `None` if the key was unknown.
    pub fn invalidate(
        &mut self,
        redustep: &str,
        signature_key: &str,
        timestamp: TimestampKey,
    ) -> Result<Option<ArtifactRecord>, RedcalError> {
        let Some(step) = self.steps.get_mut(redustep) else {
            return Ok(None);
        };
        let Some(records) = step.artifacts.get_mut(signature_key) else {
            return Ok(None);
        };
        let Some(record) = records.get(&timestamp) else {
            return Ok(None);
        };

        for path in record.files() {
            remove_file_best_effort(path)?;
        }

        let removed = records.remove(&timestamp);
        if records.is_empty() {
            step.artifacts.remove(signature_key);
        }
        debug!("invalidated {redustep}/{signature_key}/{timestamp}");
        Ok(removed)
    }

    /// Add a record under a fresh key.
    ///
    /// Return
    /// ----------
    /// * `Ok(())`, or [`RedcalError::DuplicateKey`] if the key is already taken.
    pub fn insert(
        &mut self,
        redustep: &str,
        signature_key: &str,
        timestamp: TimestampKey,
        record: ArtifactRecord,
    ) -> Result<(), RedcalError> {
        let records = self
            .steps
            .entry(redustep.to_string())
            .or_default()
            .artifacts
            .entry(signature_key.to_string())
            .or_default();

        if records.contains_key(&timestamp) {
            return Err(RedcalError::DuplicateKey {
                redustep: redustep.to_string(),
                signature: signature_key.to_string(),
                timestamp: timestamp.to_string(),
            });
        }
        records.insert(timestamp, record);
        Ok(())
    }

    /// Store the signature keywords of `redustep` on first use, check them afterwards.
    ///
    /// The list is compared as a set: reordering keywords does not change any canonical key.
    ///
    /// Return
    /// ----------
    /// * `Ok(())`, or [`RedcalError::SignatureDrift`] if a different list was stored before.
    pub fn record_signature_keywords(
        &mut self,
        redustep: &str,
        signature_keywords: &[String],
    ) -> Result<(), RedcalError> {
        let mut requested = signature_keywords.to_vec();
        requested.sort();
        requested.dedup();

        let step = self.steps.entry(redustep.to_string()).or_default();
        if step.signaturekeys.is_empty() {
            step.signaturekeys = requested;
            return Ok(());
        }
        if step.signaturekeys != requested {
            return Err(RedcalError::SignatureDrift {
                redustep: redustep.to_string(),
                stored: step.signaturekeys.clone(),
                requested,
            });
        }
        Ok(())
    }

    /// Keywords recorded for `redustep`.
    pub fn signature_keywords(&self, redustep: &str) -> Option<&[String]> {
        self.steps
            .get(redustep)
            .map(|step| step.signaturekeys.as_slice())
    }

    /// Drop every record of `redustep` (files best effort) and its keyword list.
    ///
    /// Return
    /// ----------
    /// * The number of removed records.
    pub fn remove_step(&mut self, redustep: &str) -> Result<usize, RedcalError> {
        let Some(step) = self.steps.get(redustep) else {
            return Ok(0);
        };
        for record in step.artifacts.values().flat_map(BTreeMap::values) {
            for path in record.files() {
                remove_file_best_effort(path)?;
            }
        }
        let removed: usize = self
            .steps
            .remove(redustep)
            .map(|step| step.artifacts.values().map(BTreeMap::len).sum())
            .unwrap_or(0);
        Ok(removed)
    }

    /// Reduction steps present in the database, sorted.
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    /// Every record with its key, ordered by step, signature key and timestamp.
    pub fn records(&self) -> impl Iterator<Item = (ArtifactKey, &ArtifactRecord)> {
        self.steps.iter().flat_map(|(redustep, step)| {
            step.artifacts.iter().flat_map(move |(signature_key, records)| {
                records.iter().map(move |(timestamp, record)| {
                    (
                        ArtifactKey {
                            redustep: redustep.clone(),
                            signature_key: signature_key.clone(),
                            timestamp: *timestamp,
                        },
                        record,
                    )
                })
            })
        })
    }

    pub fn len(&self) -> usize {
        self.records().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn remove_file_best_effort(path: &Utf8Path) -> Result<(), RedcalError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("deleted {path}");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("{path} was already missing while invalidating its record");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
