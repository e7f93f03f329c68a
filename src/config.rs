//! # Instrument and reduction step configuration
//!
//! This module defines the tunable inputs of the scheduler and of the resolver:
//!
//! * [`StepConfig`] – what a reduction step consumes (frame selection), how its frames are
//!   compared (signature keywords), grouped in time (`max_timespan_hours`) and named on disk
//!   (suffixes). Build it with [`StepConfig::builder`], which validates the values.
//! * [`ResolverConfig`] – probe budget of the cross-night search and fill values of synthetic
//!   placeholders per artifact kind.
//! * [`InstrumentConfig`] – the serialized bundle of both, as shipped with an instrument.
//!
//! ## Example
//! -----------------
//! ```rust
//! use redcal::config::StepConfig;
//!
//! let bias = StepConfig::builder("bias")
//!     .signature_keywords(["CCDSEC", "BINX", "BINY"])
//!     .max_timespan_hours(12.0)
//!     .select("IMAGETYP", "bias")
//!     .build()
//!     .unwrap();
//! assert_eq!(bias.artifact_suffix, "_master.fits");
//! ```
//!
//! ## JSON layout of an instrument file
//! -----------------
//! ```json
//! {
//!   "name": "t120",
//!   "steps": [
//!     { "redustep": "bias", "signature_keywords": ["CCDSEC", "BINX"],
//!       "max_timespan_hours": 12, "selection": { "IMAGETYP": "bias" } },
//!     { "redustep": "flat", "signature_keywords": ["CCDSEC", "BINX", "FILTER"],
//!       "max_timespan_hours": 0, "mask_suffix": "_mask.fits" }
//!   ],
//!   "resolver": { "max_search": 10, "fill_values": { "bias": 0.0, "flat": 1.0 } }
//! }
//! ```
use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::constants::{
    Hours, KeywordMap, Redustep, DEFAULT_ARTIFACT_SUFFIX, DEFAULT_LOG_SUFFIX, DEFAULT_MAX_SEARCH,
};
use crate::redcal_errors::RedcalError;
use crate::signature::KeywordValue;

fn default_artifact_suffix() -> String {
    DEFAULT_ARTIFACT_SUFFIX.to_string()
}

fn default_log_suffix() -> String {
    DEFAULT_LOG_SUFFIX.to_string()
}

/// Configuration of one reduction step.
///
/// Fields
/// -----------------
/// * `redustep` – step name, first level of the artifact database.
/// * `signature_keywords` – keywords whose values must match inside a batch.
/// * `max_timespan_hours` – fixed window width of a batch; `0` reduces every frame alone.
/// * `artifact_suffix` – appended to the first member basename to name the artifact.
/// * `mask_suffix` – when set, the combiner also produces a mask named with this suffix.
/// * `log_suffix` – appended to the artifact name to name the batch log.
/// * `selection` – keyword/value pairs a frame must carry to be consumed by the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub redustep: Redustep,
    pub signature_keywords: Vec<String>,
    pub max_timespan_hours: Hours,
    #[serde(default = "default_artifact_suffix")]
    pub artifact_suffix: String,
    #[serde(default)]
    pub mask_suffix: Option<String>,
    #[serde(default = "default_log_suffix")]
    pub log_suffix: String,
    #[serde(default)]
    pub selection: KeywordMap,
}

impl StepConfig {
    /// Start a [`StepConfigBuilder`] for `redustep`.
    pub fn builder(redustep: impl Into<Redustep>) -> StepConfigBuilder {
        StepConfigBuilder::new(redustep)
    }

    /// Check the invariants enforced by [`StepConfigBuilder::build`].
    ///
    /// Validation rules
    /// -----------------
    /// * `redustep` is not empty.
    /// * `signature_keywords` is not empty and holds no duplicate.
    /// * `max_timespan_hours` is finite and `>= 0`.
    /// * `artifact_suffix` is not empty, and differs from `mask_suffix`.
    pub fn validate(&self) -> Result<(), RedcalError> {
        let invalid = |msg: String| Err(RedcalError::InvalidStepConfig(msg));

        if self.redustep.trim().is_empty() {
            return invalid("redustep must not be empty".into());
        }
        if self.signature_keywords.is_empty() {
            return invalid(format!(
                "step '{}' needs at least one signature keyword",
                self.redustep
            ));
        }
        let mut sorted = self.signature_keywords.clone();
        sorted.sort();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return invalid(format!(
                "step '{}' lists a signature keyword twice",
                self.redustep
            ));
        }
        if !self.max_timespan_hours.is_finite() || self.max_timespan_hours < 0.0 {
            return invalid(format!(
                "step '{}': max_timespan_hours must be finite and non-negative, got {}",
                self.redustep, self.max_timespan_hours
            ));
        }
        if self.artifact_suffix.is_empty() {
            return invalid(format!(
                "step '{}': artifact_suffix must not be empty",
                self.redustep
            ));
        }
        if self.mask_suffix.as_deref() == Some(self.artifact_suffix.as_str()) {
            return invalid(format!(
                "step '{}': mask_suffix must differ from artifact_suffix",
                self.redustep
            ));
        }
        Ok(())
    }
}

/// Builder for [`StepConfig`], with validation.
#[derive(Debug, Clone)]
pub struct StepConfigBuilder {
    config: StepConfig,
}

impl StepConfigBuilder {
    pub fn new(redustep: impl Into<Redustep>) -> Self {
        Self {
            config: StepConfig {
                redustep: redustep.into(),
                signature_keywords: Vec::new(),
                max_timespan_hours: 0.0,
                artifact_suffix: default_artifact_suffix(),
                mask_suffix: None,
                log_suffix: default_log_suffix(),
                selection: KeywordMap::new(),
            },
        }
    }

    pub fn signature_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.signature_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_timespan_hours(mut self, v: Hours) -> Self {
        self.config.max_timespan_hours = v;
        self
    }

    pub fn artifact_suffix(mut self, v: impl Into<String>) -> Self {
        self.config.artifact_suffix = v.into();
        self
    }

    pub fn mask_suffix(mut self, v: impl Into<String>) -> Self {
        self.config.mask_suffix = Some(v.into());
        self
    }

    pub fn log_suffix(mut self, v: impl Into<String>) -> Self {
        self.config.log_suffix = v.into();
        self
    }

    /// Only consume frames whose `keyword` equals `value`.
    pub fn select(mut self, keyword: impl Into<String>, value: impl Into<KeywordValue>) -> Self {
        self.config.selection.insert(keyword.into(), value.into());
        self
    }

    /// Finalize the builder.
    ///
    /// Return
    /// ----------
    /// * The [`StepConfig`], or [`RedcalError::InvalidStepConfig`] if a rule of
    ///   [`StepConfig::validate`] is broken.
    pub fn build(self) -> Result<StepConfig, RedcalError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn default_max_search() -> usize {
    DEFAULT_MAX_SEARCH
}

fn default_fill_values() -> BTreeMap<String, f64> {
    BTreeMap::from([("bias".to_string(), 0.0), ("flat".to_string(), 1.0)])
}

/// Settings of the nearest-match resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Outward probe steps of the cross-night search
    #[serde(default = "default_max_search")]
    pub max_search: usize,
    /// Artifact kind → value filling a synthetic placeholder
    #[serde(default = "default_fill_values")]
    pub fill_values: BTreeMap<String, f64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            max_search: default_max_search(),
            fill_values: default_fill_values(),
        }
    }
}

impl ResolverConfig {
    /// Fill value for `kind`; neutral `0.0` if the kind is not configured.
    pub fn fill_value(&self, kind: &str) -> f64 {
        self.fill_values.get(kind).copied().unwrap_or(0.0)
    }
}

/// Everything the instrument configuration collaborator provides.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstrumentConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl InstrumentConfig {
    /// Read and validate an instrument file.
    ///
    /// Return
    /// ----------
    /// * The configuration, or [`RedcalError::InvalidStepConfig`] if a step is invalid or two
    ///   steps share a name; I/O and JSON errors are propagated.
    pub fn load(path: &Utf8Path) -> Result<Self, RedcalError> {
        let text = std::fs::read_to_string(path)?;
        let config: InstrumentConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RedcalError> {
        for (i, step) in self.steps.iter().enumerate() {
            step.validate()?;
            if self.steps[..i].iter().any(|s| s.redustep == step.redustep) {
                return Err(RedcalError::InvalidStepConfig(format!(
                    "step '{}' is defined twice",
                    step.redustep
                )));
            }
        }
        Ok(())
    }

    pub fn step(&self, redustep: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.redustep == redustep)
    }
}
