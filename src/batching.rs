//! # Time-windowed batching of raw calibration frames
//!
//! Calibration frames of one night are combined in **batches**: frames sharing one
//! [`Signature`] and taken close enough in time. This module partitions a night into such batches.
//!
//! ## Algorithm
//! -----------------
//! Frames are first bucketed by canonical signature key. Within a bucket, in input order:
//!
//! 1. the first unassigned frame opens a batch and fixes its **anchor** `t0`;
//! 2. every other unassigned frame with `|t - t0| < max_timespan_hours / 24` joins it;
//! 3. the batch is closed and the loop restarts until no frame is left.
//!
//! The anchor never moves. With `t = [0.0, 0.4, 0.9]` d and a 12 h span, the third frame starts a
//! new batch although it lies within 0.5 d of the second: windows are **fixed**, not chained.
//!
//! A span of `0` disables temporal grouping; every frame then forms its own batch.
//!
//! ## Guarantees
//! -----------------
//! * Every frame lands in exactly one batch (partition).
//! * Batch members are sorted lexically by basename; the first one names the artifact.
//! * The output order is deterministic: buckets by canonical key, then batches by creation.
use std::collections::BTreeMap;

use crate::constants::{Hours, Night, SignatureKey, MJD};
use crate::frames::RawFrame;
use crate::redcal_errors::RedcalError;
use crate::signature::Signature;
use crate::time::hours_to_days;

/// Non-empty set of frames of one night sharing one signature, combined into one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub night: Night,
    pub signature: Signature,
    /// Members, sorted by basename
    pub members: Vec<RawFrame>,
    /// Arithmetic mean of the member timestamps
    pub mean_timestamp: MJD,
}

impl Batch {
    /// Create a batch from its members; returns `None` if `members` is empty.
    pub fn new(night: Night, signature: Signature, mut members: Vec<RawFrame>) -> Option<Self> {
        if members.is_empty() {
            return None;
        }
        members.sort_by(|a, b| a.basename.cmp(&b.basename));
        let mean_timestamp =
            members.iter().map(|f| f.timestamp).sum::<f64>() / members.len() as f64;
        Some(Batch {
            night,
            signature,
            members,
            mean_timestamp,
        })
    }

    /// Contributing basenames, sorted.
    pub fn originf(&self) -> Vec<String> {
        self.members.iter().map(|f| f.basename.clone()).collect()
    }

    /// Lexically smallest member basename.
    pub fn first_basename(&self) -> &str {
        &self.members[0].basename
    }

    pub fn signature_key(&self) -> SignatureKey {
        self.signature.canonical_key()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Split frames sharing one signature into fixed-window batches.
///
/// Arguments
/// -----------------
/// * `night`: the night the frames belong to.
/// * `signature`: their common signature.
/// * `frames`: the frames, in natural order.
/// * `max_timespan_hours`: window width; `0` yields singleton batches.
///
/// Return
/// ----------
/// * The batches in creation order.
pub fn group_by_time(
    night: &str,
    signature: &Signature,
    frames: Vec<RawFrame>,
    max_timespan_hours: Hours,
) -> Vec<Batch> {
    let make = |members: Vec<RawFrame>| Batch::new(night.to_string(), signature.clone(), members);

    if max_timespan_hours == 0.0 {
        return frames.into_iter().filter_map(|f| make(vec![f])).collect();
    }

    let span = hours_to_days(max_timespan_hours);
    let mut pending: Vec<Option<RawFrame>> = frames.into_iter().map(Some).collect();
    let mut batches = Vec::new();

    for i in 0..pending.len() {
        let Some(anchor) = pending[i].take() else {
            continue;
        };
        let t0 = anchor.timestamp;
        let mut members = vec![anchor];

        for slot in pending.iter_mut().skip(i + 1) {
            if slot
                .as_ref()
                .is_some_and(|frame| (frame.timestamp - t0).abs() < span)
            {
                members.extend(slot.take());
            }
        }
        batches.extend(make(members));
    }
    batches
}

/// Partition the frames of one night into batches.
///
/// Frames are bucketed by the canonical key of their signature over `signature_keywords`, then
/// each bucket goes through [`group_by_time`].
///
/// Arguments
/// -----------------
/// * `night`: the night label.
/// * `frames`: the frames of that night to reduce, in natural order.
/// * `signature_keywords`: keywords defining the step signature.
/// * `max_timespan_hours`: window width of the step.
///
/// Return
/// ----------
/// * The batches, or [`RedcalError::MissingKeyword`] if a frame lacks a signature keyword.
pub fn partition_night(
    night: &str,
    frames: &[RawFrame],
    signature_keywords: &[String],
    max_timespan_hours: Hours,
) -> Result<Vec<Batch>, RedcalError> {
    let mut buckets: BTreeMap<SignatureKey, (Signature, Vec<RawFrame>)> = BTreeMap::new();
    for frame in frames {
        let signature = Signature::compute(frame, signature_keywords)?;
        buckets
            .entry(signature.canonical_key())
            .or_insert_with(|| (signature, Vec::new()))
            .1
            .push(frame.clone());
    }

    Ok(buckets
        .into_values()
        .flat_map(|(signature, frames)| {
            group_by_time(night, &signature, frames, max_timespan_hours)
        })
        .collect())
}
