//! # Cross-night search by expected file name
//!
//! A science frame needs a bias and a flat matching its geometry, binning and filter. The
//! expected file name is known ([`CalibrationQuery::file_name`]); the question is which night to
//! take it from.
//!
//! ## Search order
//! -----------------
//! 1. The target night itself.
//! 2. Outward in the sorted night list, alternating earlier and later nights:
//!    `p-1, p+1, p-2, p+2, …` for at most `max_search` steps.
//!
//! A direction that leaves the night list is simply exhausted; the search never wraps around.
//! When the target night is not in the list, `p` is its insertion point: the earlier nights are
//! `p-1, p-2, …` and the later ones `p, p+1, …`.
//!
//! The first hit wins, the earlier night being probed first at equal distance. Without any hit,
//! a constant-filled placeholder of the requested dimensions is returned instead of an error.
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, warn};
use nalgebra::DMatrix;

use crate::config::ResolverConfig;
use crate::constants::Night;

/// Description of the calibration artifact a frame needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationQuery {
    /// Artifact kind, e.g. `"bias"` or `"flat"`; selects the placeholder fill value
    pub kind: String,
    pub naxis1: usize,
    pub naxis2: usize,
    pub binning: (u32, u32),
    pub filter: Option<String>,
}

impl CalibrationQuery {
    pub fn new(kind: impl Into<String>, naxis1: usize, naxis2: usize, binning: (u32, u32)) -> Self {
        CalibrationQuery {
            kind: kind.into(),
            naxis1,
            naxis2,
            binning,
            filter: None,
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Expected file name for `night`, e.g. `2023-03-01_flat_2048x2048_bin1x1_R.fits`.
    pub fn file_name(&self, night: &str) -> String {
        let (bx, by) = self.binning;
        let mut name = format!(
            "{night}_{}_{}x{}_bin{bx}x{by}",
            self.kind, self.naxis1, self.naxis2
        );
        if let Some(filter) = &self.filter {
            name.push('_');
            name.push_str(filter);
        }
        name.push_str(".fits");
        name
    }
}

/// Decides whether an artifact exists for a night.
pub trait ArtifactLocator {
    fn locate(&self, night: &str, file_name: &str) -> Option<Utf8PathBuf>;
}

/// Looks for `<root>/<night>/<file_name>` on disk.
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    root: Utf8PathBuf,
}

impl DirectoryLocator {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        DirectoryLocator { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

impl ArtifactLocator for DirectoryLocator {
    fn locate(&self, night: &str, file_name: &str) -> Option<Utf8PathBuf> {
        let path = self.root.join(night).join(file_name);
        path.is_file().then_some(path)
    }
}

/// Result of a by-name search.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Found {
        path: Utf8PathBuf,
        night: Night,
        taken_from_another_night: bool,
    },
    /// Neutral calibration, `naxis2` rows by `naxis1` columns
    Synthetic { data: DMatrix<f64>, fill_value: f64 },
}

impl Resolved {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Resolved::Synthetic { .. })
    }

    pub fn taken_from_another_night(&self) -> bool {
        matches!(
            self,
            Resolved::Found {
                taken_from_another_night: true,
                ..
            }
        )
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        match self {
            Resolved::Found { path, .. } => Some(path),
            Resolved::Synthetic { .. } => None,
        }
    }
}

/// Indices of the night list to probe, in order, excluding the target night itself.
///
/// Arguments
/// -----------------
/// * `len`: length of the sorted night list.
/// * `position`: `Ok(p)` if the target night is at index `p`, `Err(p)` with its insertion
///   point otherwise (as returned by `binary_search`).
/// * `max_search`: number of outward steps.
///
/// Return
/// ----------
/// * Valid indices only; never below `0` nor beyond `len - 1`.
pub fn probe_order(len: usize, position: Result<usize, usize>, max_search: usize) -> Vec<usize> {
    let (p, later_offset) = match position {
        Ok(p) => (p, 0),
        Err(p) => (p, 1),
    };

    let mut order = Vec::with_capacity(2 * max_search);
    for i in 1..=max_search {
        if let Some(earlier) = p.checked_sub(i) {
            order.push(earlier);
        }
        let later = p + i - later_offset;
        if later < len {
            order.push(later);
        }
    }
    order
}

/// Nearest-night resolver over a [`ArtifactLocator`].
pub struct NightSearch<'a, L: ArtifactLocator> {
    locator: &'a L,
    nights: Vec<Night>,
    config: &'a ResolverConfig,
}

impl<'a, L: ArtifactLocator> NightSearch<'a, L> {
    /// `nights` are sorted and deduplicated here.
    pub fn new(locator: &'a L, mut nights: Vec<Night>, config: &'a ResolverConfig) -> Self {
        nights.sort();
        nights.dedup();
        NightSearch {
            locator,
            nights,
            config,
        }
    }

    pub fn nights(&self) -> &[Night] {
        &self.nights
    }

    /// Find the artifact described by `query` for `night`, or the closest night providing it.
    ///
    /// Return
    /// ----------
    /// * [`Resolved::Found`], flagged when taken from another night, or
    ///   [`Resolved::Synthetic`] filled with the configured value for `query.kind`.
    pub fn resolve(&self, query: &CalibrationQuery, night: &str) -> Resolved {
        let name = query.file_name(night);
        if let Some(path) = self.locator.locate(night, &name) {
            debug!("{name} found for {night}");
            return Resolved::Found {
                path,
                night: night.to_string(),
                taken_from_another_night: false,
            };
        }

        let position = self
            .nights
            .binary_search_by(|candidate| candidate.as_str().cmp(night));
        for idx in probe_order(self.nights.len(), position, self.config.max_search) {
            let other = &self.nights[idx];
            if let Some(path) = self.locator.locate(other, &query.file_name(other)) {
                warn!("no {} for {night}, using the one of {other}", query.kind);
                return Resolved::Found {
                    path,
                    night: other.clone(),
                    taken_from_another_night: true,
                };
            }
        }

        let fill_value = self.config.fill_value(&query.kind);
        warn!(
            "no {} within {} night(s) of {night}, using a synthetic {}x{} filled with {fill_value}",
            query.kind, self.config.max_search, query.naxis1, query.naxis2
        );
        Resolved::Synthetic {
            data: DMatrix::from_element(query.naxis2, query.naxis1, fill_value),
            fill_value,
        }
    }
}

#[cfg(test)]
mod by_name_test {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    /// Locator over a fixed set of (night, name) pairs that records every probe.
    struct FakeLocator {
        present: BTreeSet<(String, String)>,
        probed: RefCell<Vec<String>>,
    }

    impl FakeLocator {
        fn new(present: &[(&str, &str)]) -> Self {
            FakeLocator {
                present: present
                    .iter()
                    .map(|(n, f)| (n.to_string(), f.to_string()))
                    .collect(),
                probed: RefCell::new(Vec::new()),
            }
        }
    }

    impl ArtifactLocator for FakeLocator {
        fn locate(&self, night: &str, file_name: &str) -> Option<Utf8PathBuf> {
            self.probed.borrow_mut().push(night.to_string());
            self.present
                .contains(&(night.to_string(), file_name.to_string()))
                .then(|| Utf8PathBuf::from(format!("/calib/{night}/{file_name}")))
        }
    }

    fn nights() -> Vec<Night> {
        (1..=5).map(|d| format!("2023-03-0{d}")).collect()
    }

    fn bias() -> CalibrationQuery {
        CalibrationQuery::new("bias", 4, 3, (1, 1))
    }

    #[test]
    fn test_file_name() {
        assert_eq!(bias().file_name("2023-03-01"), "2023-03-01_bias_4x3_bin1x1.fits");
        assert_eq!(
            CalibrationQuery::new("flat", 2048, 2048, (2, 2))
                .filter("R")
                .file_name("2023-03-01"),
            "2023-03-01_flat_2048x2048_bin2x2_R.fits"
        );
    }

    #[test]
    fn test_probe_order_alternates() {
        assert_eq!(probe_order(5, Ok(2), 10), [1, 3, 0, 4]);
        assert_eq!(probe_order(5, Ok(2), 1), [1, 3]);
        assert_eq!(probe_order(5, Err(2), 10), [1, 2, 0, 3, 4]);
        assert!(probe_order(0, Err(0), 10).is_empty());
    }

    #[test]
    fn test_probe_never_wraps() {
        // target is the first night: nothing below index 0
        assert_eq!(probe_order(5, Ok(0), 10), [1, 2, 3, 4]);
        assert_eq!(probe_order(5, Ok(4), 10), [3, 2, 1, 0]);
        assert_eq!(probe_order(5, Err(5), 2), [4, 3]);
    }

    #[test]
    fn test_exact_night() {
        let locator = FakeLocator::new(&[("2023-03-03", "2023-03-03_bias_4x3_bin1x1.fits")]);
        let config = ResolverConfig::default();
        let search = NightSearch::new(&locator, nights(), &config);

        let resolved = search.resolve(&bias(), "2023-03-03");
        assert!(!resolved.taken_from_another_night());
        assert_eq!(
            resolved.path().unwrap().as_str(),
            "/calib/2023-03-03/2023-03-03_bias_4x3_bin1x1.fits"
        );
    }

    #[test]
    fn test_earlier_night_wins_at_equal_distance() {
        let locator = FakeLocator::new(&[
            ("2023-03-02", "2023-03-02_bias_4x3_bin1x1.fits"),
            ("2023-03-04", "2023-03-04_bias_4x3_bin1x1.fits"),
        ]);
        let config = ResolverConfig::default();
        let search = NightSearch::new(&locator, nights(), &config);

        match search.resolve(&bias(), "2023-03-03") {
            Resolved::Found {
                night,
                taken_from_another_night,
                ..
            } => {
                assert_eq!(night, "2023-03-02");
                assert!(taken_from_another_night);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*locator.probed.borrow(), ["2023-03-03", "2023-03-02"]);
    }

    #[test]
    fn test_first_night_probes_stay_in_list() {
        let locator = FakeLocator::new(&[]);
        let config = ResolverConfig::default();
        let search = NightSearch::new(&locator, nights(), &config);

        assert!(search.resolve(&bias(), "2023-03-01").is_synthetic());
        let probed = locator.probed.borrow();
        assert_eq!(
            *probed,
            ["2023-03-01", "2023-03-02", "2023-03-03", "2023-03-04", "2023-03-05"]
        );
    }

    #[test]
    fn test_synthetic_placeholder() {
        let locator = FakeLocator::new(&[]);
        let config = ResolverConfig::default();
        let search = NightSearch::new(&locator, Vec::new(), &config);

        let flat = CalibrationQuery::new("flat", 4, 3, (1, 1));
        match search.resolve(&flat, "2023-03-01") {
            Resolved::Synthetic { data, fill_value } => {
                assert_eq!(fill_value, 1.0);
                assert_eq!(data.shape(), (3, 4));
                assert!(data.iter().all(|v| *v == 1.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
