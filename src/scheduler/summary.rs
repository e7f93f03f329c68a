//! Run-level accounting of the scheduler.
use std::fmt;

use crate::constants::{Night, Redustep, SignatureKey};
use crate::redcal_errors::RedcalError;

/// A batch whose combine failed.
#[derive(Debug, PartialEq)]
pub struct BatchFailure {
    pub redustep: Redustep,
    pub night: Night,
    pub signature_key: SignatureKey,
    pub originf: Vec<String>,
    pub error: RedcalError,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} [{}]: {}",
            self.redustep,
            self.night,
            self.signature_key,
            self.originf.join(", "),
            self.error
        )
    }
}

/// Outcome counts of one or several scheduler runs.
#[derive(Debug, Default, PartialEq)]
pub struct RunSummary {
    /// Batches combined and committed
    pub built: usize,
    /// Batches whose artifact already existed
    pub skipped: usize,
    /// Prior records superseded by a regrouping
    pub invalidated: usize,
    /// Skipped batches with an artifact on disk but no record
    pub orphans: usize,
    pub failures: Vec<BatchFailure>,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// `true` when no batch failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Accumulate the counts of `other` into `self`.
    pub fn merge(&mut self, other: RunSummary) {
        self.built += other.built;
        self.skipped += other.skipped;
        self.invalidated += other.invalidated;
        self.orphans += other.orphans;
        self.failures.extend(other.failures);
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "built: {}, skipped: {}, invalidated: {}, failed: {}, orphans: {}",
            self.built,
            self.skipped,
            self.invalidated,
            self.failed(),
            self.orphans
        )?;
        for failure in &self.failures {
            write!(f, "\n  FAILED {failure}")?;
        }
        Ok(())
    }
}
