//! # Constants and type definitions for Redcal
//!
//! This module centralizes the **fixed conventions**, **unit conversions**, and **common type
//! definitions** shared by the batching, database, scheduling and resolution layers.
//!
//! ## Overview
//!
//! - Time conversions (hours ↔ days, MJD ↔ JD)
//! - Naming conventions for produced artifacts
//! - Core type aliases used across the crate
//!
//! Changing any of the naming constants changes the deterministic output paths and the
//! canonical signature keys, which invalidates every database produced before the change.

use std::collections::BTreeMap;

use crate::signature::KeywordValue;

// -------------------------------------------------------------------------------------------------
// Time conventions
// -------------------------------------------------------------------------------------------------

/// Number of hours in a day
pub const HOURS_PER_DAY: f64 = 24.0;

/// Conversion factor between Julian Date and Modified Julian Date
pub const JDTOMJD: f64 = 2400000.5;

/// Number of decimals kept in a timestamp key (1e-6 d ≈ 0.09 s)
pub const TIMESTAMP_KEY_DECIMALS: usize = 6;

// -------------------------------------------------------------------------------------------------
// Naming conventions
// -------------------------------------------------------------------------------------------------

/// Separator joining signature values into a canonical key
pub const SIGNATURE_SEPARATOR: &str = "__";

/// Default suffix appended to the first member basename to name a combined artifact
pub const DEFAULT_ARTIFACT_SUFFIX: &str = "_master.fits";

/// Default suffix of the per-batch log artifact
pub const DEFAULT_LOG_SUFFIX: &str = ".log";

/// Default number of outward probe steps of the cross-night search
pub const DEFAULT_MAX_SEARCH: usize = 10;

/// Header keywords holding the artifact dimensions
pub const NAXIS1: &str = "NAXIS1";
pub const NAXIS2: &str = "NAXIS2";

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Modified Julian Date (days)
pub type MJD = f64;

/// Duration in hours
pub type Hours = f64;

/// Name of a reduction step (e.g. `"bias"`, `"flat"`)
pub type Redustep = String;

/// Night label, `YYYY-MM-DD`
pub type Night = String;

/// Canonical string form of a signature
pub type SignatureKey = String;

/// Header keyword → value mapping
pub type KeywordMap = BTreeMap<String, KeywordValue>;

/// Statistic name → scalar value
pub type StatMap = BTreeMap<String, f64>;
