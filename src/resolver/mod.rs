//! # Nearest-match resolution of calibration artifacts
//!
//! Read-only retrieval of the artifact to apply to a frame, in two flavours:
//!
//! Modules
//! -----------------
//! * [`by_name`](crate::resolver::by_name) – Expected file name, searched across nights by
//!   increasing distance, with a synthetic fallback.
//! * [`by_timestamp`](crate::resolver::by_timestamp) – Exact signature in the
//!   [`ArtifactDatabase`](crate::database::ArtifactDatabase), closest timestamp.
pub mod by_name;
pub mod by_timestamp;

pub use by_name::{
    probe_order, ArtifactLocator, CalibrationQuery, DirectoryLocator, NightSearch, Resolved,
};
pub use by_timestamp::nearest_by_timestamp;
