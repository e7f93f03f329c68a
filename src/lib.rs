//! # Redcal
//!
//! Calibration artifact cache and scheduler for the reduction of astronomical CCD frames.
//!
//! Raw calibration frames are grouped into batches sharing a signature and a time window
//! ([`batching`]), each batch is combined once into a master artifact recorded in an
//! [`ArtifactDatabase`] ([`scheduler`]), and later reductions fetch the closest matching artifact
//! ([`resolver`]).
pub mod batching;
pub mod config;
pub mod constants;
pub mod database;
pub mod frames;
pub mod redcal_errors;
pub mod resolver;
pub mod scheduler;
pub mod signature;
pub mod time;

pub use config::{InstrumentConfig, StepConfig};
pub use database::{ArtifactDatabase, ArtifactKey, ArtifactRecord, TimestampKey};
pub use redcal_errors::RedcalError;
pub use scheduler::{ReductionScheduler, RunSummary, SchedulerOptions};
pub use signature::{KeywordValue, Signature};
