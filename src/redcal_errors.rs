use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedcalError {
    #[error("Missing signature keyword '{keyword}' in frame {basename}")]
    MissingKeyword { keyword: String, basename: String },

    #[error(
        "Signature keywords drifted for step '{redustep}': stored {stored:?}, requested {requested:?}"
    )]
    SignatureDrift {
        redustep: String,
        stored: Vec<String>,
        requested: Vec<String>,
    },

    #[error("Corrupt artifact database at {path}: {reason}")]
    CorruptDatabase { path: String, reason: String },

    #[error("Duplicate artifact key ({redustep}, {signature}, {timestamp})")]
    DuplicateKey {
        redustep: String,
        signature: String,
        timestamp: String,
    },

    #[error("No artifact recorded for step '{redustep}' and signature '{signature}'")]
    SignatureNotFound { redustep: String, signature: String },

    #[error(
        "Artifact {path} declares {found:?} (NAXIS1, NAXIS2) but signature '{signature}' expects {expected:?}"
    )]
    DimensionMismatch {
        path: String,
        signature: String,
        expected: (i64, i64),
        found: (i64, i64),
    },

    #[error("No frames found for step '{redustep}' on night {night}")]
    NoFrames { redustep: String, night: String },

    #[error("Combine failed for batch starting at {basename}: {reason}")]
    CombineFailed { basename: String, reason: String },

    #[error("Invalid step configuration: {0}")]
    InvalidStepConfig(String),

    #[error("Invalid date '{0}'")]
    InvalidDate(String),

    #[error("Invalid frame index: {0}")]
    InvalidFrameIndex(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

impl RedcalError {
    /// Whether the error aborts the whole invocation.
    ///
    /// Combine failures and key collisions are recoverable at the batch level,
    /// everything that questions the integrity of the inputs or of the database is not.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RedcalError::CombineFailed { .. } | RedcalError::DuplicateKey { .. }
        )
    }
}

impl PartialEq for RedcalError {
    fn eq(&self, other: &Self) -> bool {
        use RedcalError::*;
        match (self, other) {
            (
                MissingKeyword {
                    keyword: a,
                    basename: b,
                },
                MissingKeyword {
                    keyword: c,
                    basename: d,
                },
            ) => a == c && b == d,
            (
                SignatureDrift {
                    redustep: a,
                    stored: b,
                    requested: c,
                },
                SignatureDrift {
                    redustep: d,
                    stored: e,
                    requested: f,
                },
            ) => a == d && b == e && c == f,
            (CorruptDatabase { path: a, .. }, CorruptDatabase { path: b, .. }) => a == b,
            (
                DuplicateKey {
                    redustep: a,
                    signature: b,
                    timestamp: c,
                },
                DuplicateKey {
                    redustep: d,
                    signature: e,
                    timestamp: f,
                },
            ) => a == d && b == e && c == f,
            (
                SignatureNotFound {
                    redustep: a,
                    signature: b,
                },
                SignatureNotFound {
                    redustep: c,
                    signature: d,
                },
            ) => a == c && b == d,
            (
                DimensionMismatch {
                    expected: a,
                    found: b,
                    ..
                },
                DimensionMismatch {
                    expected: c,
                    found: d,
                    ..
                },
            ) => a == c && b == d,
            (
                NoFrames {
                    redustep: a,
                    night: b,
                },
                NoFrames {
                    redustep: c,
                    night: d,
                },
            ) => a == c && b == d,
            (CombineFailed { basename: a, .. }, CombineFailed { basename: b, .. }) => a == b,
            (InvalidStepConfig(a), InvalidStepConfig(b)) => a == b,
            (InvalidDate(a), InvalidDate(b)) => a == b,
            (InvalidFrameIndex(a), InvalidFrameIndex(b)) => a == b,

            // Wrapped errors are not comparable: same variant means equal
            (IoError(_), IoError(_)) => true,
            (JsonError(_), JsonError(_)) => true,
            (CsvError(_), CsvError(_)) => true,

            _ => false,
        }
    }
}

#[cfg(test)]
mod redcal_errors_test {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let combine = RedcalError::CombineFailed {
            basename: "b001.fits".into(),
            reason: "empty stack".into(),
        };
        assert!(!combine.is_fatal());
        assert!(!RedcalError::DuplicateKey {
            redustep: "flat".into(),
            signature: "R".into(),
            timestamp: "60004.800000".into()
        }
        .is_fatal());

        let missing = RedcalError::MissingKeyword {
            keyword: "FILTER".into(),
            basename: "b001.fits".into(),
        };
        assert!(missing.is_fatal());
        assert!(RedcalError::CorruptDatabase {
            path: "db.json".into(),
            reason: "eof".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_message_names_offender() {
        let err = RedcalError::NoFrames {
            redustep: "bias".into(),
            night: "2023-03-01".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("bias"));
        assert!(msg.contains("2023-03-01"));
    }
}
