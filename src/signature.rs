//! # Observational signatures
//!
//! A **signature** is the set of configuration keyword values (filter, CCD section, binning,
//! readout mode…) that a raw frame must share with the other members of a batch before they can
//! be combined into one calibration artifact.
//!
//! Two representations coexist:
//!
//! * [`Signature`] – the structured mapping keyword → [`KeywordValue`], kept sorted by keyword
//!   name so that it serializes deterministically.
//! * [`SignatureKey`] – the canonical string, the values joined by
//!   [`SIGNATURE_SEPARATOR`](crate::constants::SIGNATURE_SEPARATOR) in keyword order, **without**
//!   keyword names. Every index of the crate is keyed by this string.
//!
//! Equality
//! -----------------
//! Signatures are always compared through [`Signature::canonical_key`]. The structured mapping is
//! only carried along for provenance (it is stored verbatim in every
//! [`ArtifactRecord`](crate::database::record::ArtifactRecord)).
//!
//! Volatile keywords
//! -----------------
//! Values are compared **exactly**. A float keyword that jitters between exposures (e.g. a CCD
//! temperature) splits otherwise identical frames into separate signatures; round it in the frame
//! index before it reaches this module.
//!
//! The canonical key holds the display text of each value and drops its type: `"2"`, `2` and
//! `2.0` all render as `2`. A frame index must report a keyword with one type across nights.
use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::constants::{SignatureKey, SIGNATURE_SEPARATOR};
use crate::frames::RawFrame;
use crate::redcal_errors::RedcalError;

/// Scalar value of a header keyword.
///
/// Serialized untagged, so a JSON document reads naturally (`"FILTER": "R"`, `"BINX": 2`).
/// Floats are wrapped in [`OrderedFloat`] to provide a total order and a hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeywordValue {
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Text(String),
}

impl KeywordValue {
    /// Integer view of the value, accepting integral floats and numeric strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            KeywordValue::Int(v) => Some(*v),
            KeywordValue::Float(v) if v.fract() == 0.0 => Some(v.0 as i64),
            KeywordValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for KeywordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeywordValue::Bool(b) => write!(f, "{b}"),
            KeywordValue::Int(i) => write!(f, "{i}"),
            KeywordValue::Float(x) => write!(f, "{}", x.0),
            KeywordValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for KeywordValue {
    fn from(s: &str) -> Self {
        KeywordValue::Text(s.to_string())
    }
}

impl From<String> for KeywordValue {
    fn from(s: String) -> Self {
        KeywordValue::Text(s)
    }
}

impl From<i64> for KeywordValue {
    fn from(v: i64) -> Self {
        KeywordValue::Int(v)
    }
}

impl From<f64> for KeywordValue {
    fn from(v: f64) -> Self {
        KeywordValue::Float(OrderedFloat(v))
    }
}

impl From<bool> for KeywordValue {
    fn from(v: bool) -> Self {
        KeywordValue::Bool(v)
    }
}

/// Sorted keyword → value mapping identifying a calibration configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(BTreeMap<String, KeywordValue>);

impl Signature {
    /// Build a signature from any keyword/value pairs; the insertion order is irrelevant.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<KeywordValue>,
    {
        Signature(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Extract the signature of `frame` for the given keyword list.
    ///
    /// Keywords are looked up in the frame's signature values first, then in its exposure
    /// metadata.
    ///
    /// Arguments
    /// -----------------
    /// * `frame`: the raw frame descriptor.
    /// * `signature_keywords`: the keywords defining the signature of the reduction step.
    ///
    /// Return
    /// ----------
    /// * The [`Signature`], or [`RedcalError::MissingKeyword`] naming the first absent keyword
    ///   and the frame.
    pub fn compute(
        frame: &RawFrame,
        signature_keywords: &[String],
    ) -> Result<Signature, RedcalError> {
        let mut values = BTreeMap::new();
        for keyword in signature_keywords {
            let value = frame
                .signature_values
                .get(keyword)
                .or_else(|| frame.exposure_meta.get(keyword))
                .ok_or_else(|| RedcalError::MissingKeyword {
                    keyword: keyword.clone(),
                    basename: frame.basename.clone(),
                })?;
            values.insert(keyword.clone(), value.clone());
        }
        Ok(Signature(values))
    }

    /// Canonical string form: the values in keyword order joined by `"__"`.
    pub fn canonical_key(&self) -> SignatureKey {
        self.0.values().join(SIGNATURE_SEPARATOR)
    }

    pub fn get(&self, keyword: &str) -> Option<&KeywordValue> {
        self.0.get(keyword)
    }

    /// Keyword names, sorted.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_key())
    }
}

/// Shorthand for [`Signature::compute`].
pub fn compute_signature(
    frame: &RawFrame,
    signature_keywords: &[String],
) -> Result<Signature, RedcalError> {
    Signature::compute(frame, signature_keywords)
}

/// Shorthand for [`Signature::canonical_key`].
pub fn canonical_key(signature: &Signature) -> SignatureKey {
    signature.canonical_key()
}

#[cfg(test)]
mod signature_test {
    use super::*;
    use crate::constants::KeywordMap;

    fn frame(values: &[(&str, KeywordValue)]) -> RawFrame {
        let signature_values: KeywordMap = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        RawFrame {
            basename: "r0001.fits".into(),
            night: "2023-03-01".into(),
            timestamp: 60004.1,
            signature_values,
            exposure_meta: KeywordMap::from([("IMAGETYP".into(), "bias".into())]),
        }
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = Signature::from_pairs([("FILTER", "R"), ("CCDSEC", "[1:2048,1:2048]")]);
        let b = Signature::from_pairs([("CCDSEC", "[1:2048,1:2048]"), ("FILTER", "R")]);
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert_eq!(a.canonical_key(), "[1:2048,1:2048]__R");
    }

    #[test]
    fn test_key_omits_keyword_names() {
        let sig = Signature::from_pairs([
            ("BINX", KeywordValue::from(2_i64)),
            ("BINY", KeywordValue::from(2_i64)),
            ("GAIN", KeywordValue::from(1.5)),
        ]);
        assert_eq!(canonical_key(&sig), "2__2__1.5");
    }

    #[test]
    fn test_compute_signature() {
        let f = frame(&[("FILTER", "V".into()), ("BINX", 1_i64.into())]);
        let keywords = vec!["FILTER".to_string(), "BINX".to_string(), "IMAGETYP".to_string()];
        let sig = compute_signature(&f, &keywords).unwrap();
        assert_eq!(sig.keywords().collect::<Vec<_>>(), ["BINX", "FILTER", "IMAGETYP"]);
        assert_eq!(sig.canonical_key(), "1__V__bias");
    }

    #[test]
    fn test_missing_keyword() {
        let f = frame(&[("FILTER", "V".into())]);
        let err = compute_signature(&f, &["FILTER".into(), "CCDSEC".into()]).unwrap_err();
        assert_eq!(
            err,
            RedcalError::MissingKeyword {
                keyword: "CCDSEC".into(),
                basename: "r0001.fits".into()
            }
        );
    }

    #[test]
    fn test_keyword_value_json() {
        let sig: Signature =
            serde_json::from_str(r#"{"FILTER": "R", "BINX": 2, "TEMP": -10.5, "OVERSCAN": true}"#)
                .unwrap();
        assert_eq!(sig.get("BINX"), Some(&KeywordValue::Int(2)));
        assert_eq!(sig.get("TEMP"), Some(&KeywordValue::from(-10.5)));
        assert_eq!(sig.get("OVERSCAN"), Some(&KeywordValue::Bool(true)));
        assert_eq!(sig.canonical_key(), "2__R__true__-10.5");
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(KeywordValue::from(2048_i64).as_i64(), Some(2048));
        assert_eq!(KeywordValue::from(2048.0).as_i64(), Some(2048));
        assert_eq!(KeywordValue::from(" 512 ").as_i64(), Some(512));
        assert_eq!(KeywordValue::from(1.5).as_i64(), None);
    }

    #[test]
    fn test_canonical_key_ignores_value_type() {
        let keys: Vec<_> = [
            KeywordValue::from("2"),
            KeywordValue::Int(2),
            KeywordValue::from(2.0),
        ]
        .into_iter()
        .map(|v| Signature::from_pairs([("BINX", v)]).canonical_key())
        .collect();
        assert_eq!(keys, ["2", "2", "2"]);

        // the structured signatures still differ
        assert_ne!(
            Signature::from_pairs([("BINX", KeywordValue::Int(2))]),
            Signature::from_pairs([("BINX", KeywordValue::from(2.0))])
        );
    }
}
