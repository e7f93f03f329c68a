//! # Listing the artifact database
//!
//! Two read-only views over an [`ArtifactDatabase`], used by reporting tools:
//!
//! * [`DatabaseDisplay`] – a human-readable table (`comfy-table`), obtained from
//!   [`ArtifactDatabase::table`] and printed with `{}`.
//! * [`ArtifactDatabase::write_csv`] – one CSV row per record.
//!
//! Both walk the records in key order (step, signature key, timestamp), so two listings of the
//! same database are identical.
//!
//! ```rust,no_run
//! use camino::Utf8Path;
//! use redcal::database::ArtifactDatabase;
//!
//! let db = ArtifactDatabase::load(Utf8Path::new("calib.json")).unwrap();
//! println!("{}", db.table().step("flat"));
//! db.write_csv(std::io::stdout()).unwrap();
//! ```
use std::fmt;
use std::io::Write;

use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, ContentArrangement, Row, Table};
use itertools::Itertools;
use serde::Serialize;

use super::{ArtifactDatabase, ArtifactKey, ArtifactRecord};
use crate::constants::MJD;
use crate::redcal_errors::RedcalError;

/// Display adaptor rendering database records as a table.
pub struct DatabaseDisplay<'a> {
    db: &'a ArtifactDatabase,
    step: Option<&'a str>,
}

impl<'a> DatabaseDisplay<'a> {
    /// Restrict the listing to one reduction step.
    pub fn step(mut self, redustep: &'a str) -> Self {
        self.step = Some(redustep);
        self
    }

    fn rows(&self) -> impl Iterator<Item = (ArtifactKey, &'a ArtifactRecord)> {
        let step = self.step;
        self.db
            .records()
            .filter(move |(key, _)| step.map_or(true, |step| key.redustep == step))
    }
}

impl fmt::Display for DatabaseDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Disabled);

        // rows are never wrapped, listings are usually piped to files
        table.set_header(vec![
            "Step",
            "Night",
            "Signature",
            "MJD",
            "N",
            "Artifact",
            "Inputs",
        ]);

        for (key, record) in self.rows() {
            table.add_row(Row::from(vec![
                Cell::new(&key.redustep),
                Cell::new(&record.night),
                Cell::new(&key.signature_key),
                Cell::new(key.timestamp).set_alignment(CellAlignment::Right),
                Cell::new(record.origin_count).set_alignment(CellAlignment::Right),
                Cell::new(&record.artifact_path),
                Cell::new(record.originf.join(" ")),
            ]));
        }

        write!(f, "{table}")
    }
}

#[derive(Serialize)]
struct ListingRow<'a> {
    redustep: &'a str,
    night: &'a str,
    signature: &'a str,
    mjd: MJD,
    origin_count: usize,
    artifact_path: &'a str,
    mask_path: &'a str,
    log_path: &'a str,
    originf: String,
    stats: String,
}

impl ArtifactDatabase {
    /// Table view of the whole database.
    pub fn table(&self) -> DatabaseDisplay<'_> {
        DatabaseDisplay {
            db: self,
            step: None,
        }
    }

    /// Write one CSV row per record, with a header line.
    ///
    /// `originf` is space separated; `stats` is a `name=value` list separated by `;`.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), RedcalError> {
        let mut wtr = csv::Writer::from_writer(writer);
        for (key, record) in self.records() {
            wtr.serialize(ListingRow {
                redustep: &key.redustep,
                night: &record.night,
                signature: &key.signature_key,
                mjd: key.timestamp.mjd(),
                origin_count: record.origin_count,
                artifact_path: record.artifact_path.as_str(),
                mask_path: record.mask_path.as_ref().map_or("", |p| p.as_str()),
                log_path: record.log_path.as_str(),
                originf: record.originf.join(" "),
                stats: record
                    .stat_summary
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .join(";"),
            })?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod display_test {
    use super::*;
    use crate::batching::Batch;
    use crate::constants::{KeywordMap, StatMap};
    use crate::database::TimestampKey;
    use crate::frames::RawFrame;
    use crate::signature::Signature;

    fn db() -> ArtifactDatabase {
        let mut db = ArtifactDatabase::new();
        for (step, filter, names, mjd) in [
            ("bias", "R", vec!["b1", "b2"], 60004.25),
            ("flat", "V", vec!["f1"], 60004.5),
        ] {
            let frames = names
                .iter()
                .map(|n| RawFrame {
                    basename: n.to_string(),
                    night: "2023-03-01".into(),
                    timestamp: mjd,
                    signature_values: KeywordMap::new(),
                    exposure_meta: KeywordMap::new(),
                })
                .collect();
            let batch = Batch::new(
                "2023-03-01".into(),
                Signature::from_pairs([("FILTER", filter)]),
                frames,
            )
            .unwrap();
            let mut record = ArtifactRecord::for_batch(
                &batch,
                format!("out/{}_master.fits", names[0]).into(),
                None,
                format!("out/{}_master.fits.log", names[0]).into(),
            );
            record.stat_summary =
                StatMap::from([("mean".to_string(), 10.0), ("std".to_string(), 2.5)]);
            db.insert(step, filter, TimestampKey::from_mjd(mjd), record)
                .unwrap();
        }
        db
    }

    #[test]
    fn test_table_lists_every_record() {
        let db = db();
        let text = db.table().to_string();
        assert!(text.contains("out/b1_master.fits"));
        assert!(text.contains("out/f1_master.fits"));
        assert!(text.contains("b1 b2"));

        let flat_only = db.table().step("flat").to_string();
        assert!(!flat_only.contains("out/b1_master.fits"));
        assert!(flat_only.contains("60004.500000"));
    }

    #[test]
    fn test_csv_listing() {
        let mut out = Vec::new();
        db().write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "redustep,night,signature,mjd,origin_count,artifact_path,mask_path,log_path,originf,stats"
        );
        assert_eq!(
            lines[1],
            "bias,2023-03-01,R,60004.25,2,out/b1_master.fits,,out/b1_master.fits.log,b1 b2,mean=10;std=2.5"
        );
    }
}
