//! Closest artifact in time for a fully specified signature.
use log::debug;

use crate::constants::{MJD, NAXIS1, NAXIS2};
use crate::database::{ArtifactDatabase, ArtifactRecord, TimestampKey};
use crate::redcal_errors::RedcalError;
use crate::signature::Signature;

/// Record of `signature` under `redustep` whose timestamp is closest to `mjd`.
///
/// The signature must match a stored one exactly. Ties go to the earlier record. When the
/// signature carries `NAXIS1`/`NAXIS2`, the dimensions declared by the record must agree.
///
/// Arguments
/// -----------------
/// * `db`: the artifact database.
/// * `redustep`: the reduction step, e.g. `"bias"`.
/// * `signature`: the complete signature of the wanted artifact.
/// * `mjd`: the epoch the artifact should be closest to.
///
/// Return
/// ----------
/// * The timestamp key and the record.
/// * [`RedcalError::SignatureNotFound`] if nothing is recorded for the signature.
/// * [`RedcalError::DimensionMismatch`] if the record contradicts the signature dimensions.
///
/// See also
/// ------------
/// * [`NightSearch::resolve`](crate::resolver::by_name::NightSearch::resolve) – Search by
///   expected file name across nights.
pub fn nearest_by_timestamp<'a>(
    db: &'a ArtifactDatabase,
    redustep: &str,
    signature: &Signature,
    mjd: MJD,
) -> Result<(TimestampKey, &'a ArtifactRecord), RedcalError> {
    let signature_key = signature.canonical_key();
    let (timestamp, record) = db
        .lookup_key(redustep, &signature_key)
        .iter()
        .min_by(|(a, _), (b, _)| (a.mjd() - mjd).abs().total_cmp(&(b.mjd() - mjd).abs()))
        .ok_or_else(|| RedcalError::SignatureNotFound {
            redustep: redustep.to_string(),
            signature: signature_key.clone(),
        })?;

    let expected = signature
        .get(NAXIS1)
        .and_then(|v| v.as_i64())
        .zip(signature.get(NAXIS2).and_then(|v| v.as_i64()));
    if let (Some(expected), Some(found)) = (expected, record.naxis()) {
        if expected != found {
            return Err(RedcalError::DimensionMismatch {
                path: record.artifact_path.to_string(),
                signature: signature_key,
                expected,
                found,
            });
        }
    }

    debug!(
        "{redustep}/{signature_key}: {timestamp} is closest to {mjd} ({})",
        record.artifact_path
    );
    Ok((*timestamp, record))
}

#[cfg(test)]
mod by_timestamp_test {
    use super::*;
    use crate::batching::Batch;
    use crate::constants::KeywordMap;
    use crate::frames::RawFrame;
    use crate::signature::KeywordValue;

    fn signature() -> Signature {
        Signature::from_pairs([
            ("NAXIS1", KeywordValue::Int(2048)),
            ("NAXIS2", KeywordValue::Int(2048)),
            ("FILTER", KeywordValue::from("R")),
        ])
    }

    fn db_with(mjds: &[MJD], naxis: (i64, i64)) -> ArtifactDatabase {
        let mut db = ArtifactDatabase::new();
        for (i, mjd) in mjds.iter().enumerate() {
            let frame = RawFrame {
                basename: format!("f{i}.fits"),
                night: "2023-03-01".into(),
                timestamp: *mjd,
                signature_values: KeywordMap::new(),
                exposure_meta: KeywordMap::new(),
            };
            let batch = Batch::new("2023-03-01".into(), signature(), vec![frame]).unwrap();
            let mut record = ArtifactRecord::for_batch(
                &batch,
                format!("out/f{i}_master.fits").into(),
                None,
                format!("out/f{i}_master.fits.log").into(),
            );
            record
                .master_keywords
                .insert(NAXIS1.into(), KeywordValue::Int(naxis.0));
            record
                .master_keywords
                .insert(NAXIS2.into(), KeywordValue::Int(naxis.1));
            db.insert(
                "flat",
                &signature().canonical_key(),
                TimestampKey::from_mjd(*mjd),
                record,
            )
            .unwrap();
        }
        db
    }

    #[test]
    fn test_nearest_record() {
        let db = db_with(&[100.0, 100.5, 101.2], (2048, 2048));
        let (ts, record) = nearest_by_timestamp(&db, "flat", &signature(), 100.6).unwrap();
        assert_eq!(ts, TimestampKey::from_mjd(100.5));
        assert_eq!(record.originf, ["f1.fits"]);

        let (ts, _) = nearest_by_timestamp(&db, "flat", &signature(), 250.0).unwrap();
        assert_eq!(ts, TimestampKey::from_mjd(101.2));
    }

    #[test]
    fn test_tie_goes_to_earlier() {
        let db = db_with(&[100.0, 101.0], (2048, 2048));
        let (ts, _) = nearest_by_timestamp(&db, "flat", &signature(), 100.5).unwrap();
        assert_eq!(ts, TimestampKey::from_mjd(100.0));
    }

    #[test]
    fn test_unknown_signature() {
        let db = db_with(&[100.0], (2048, 2048));
        let other = Signature::from_pairs([("FILTER", "V")]);
        let err = nearest_by_timestamp(&db, "flat", &other, 100.0).unwrap_err();
        assert_eq!(
            err,
            RedcalError::SignatureNotFound {
                redustep: "flat".into(),
                signature: "V".into()
            }
        );
        assert!(nearest_by_timestamp(&db, "bias", &signature(), 100.0).is_err());
    }

    #[test]
    fn test_dimension_mismatch() {
        let db = db_with(&[100.0], (1024, 2048));
        let err = nearest_by_timestamp(&db, "flat", &signature(), 100.0).unwrap_err();
        assert_eq!(
            err,
            RedcalError::DimensionMismatch {
                path: "out/f0_master.fits".into(),
                signature: signature().canonical_key(),
                expected: (2048, 2048),
                found: (1024, 2048),
            }
        );
        assert!(err.is_fatal());
    }
}
