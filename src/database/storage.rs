//! # Database persistence
//!
//! The database lives in one pretty-printed JSON document. Loading reads it whole; saving
//! rewrites it whole through a temporary file in the same directory which is then renamed over
//! the target, so a crash mid-write leaves either the old or the new document, never a
//! truncated one.
use std::io::{ErrorKind, Write};

use camino::Utf8Path;
use log::debug;
use tempfile::NamedTempFile;

use super::ArtifactDatabase;
use crate::redcal_errors::RedcalError;

impl ArtifactDatabase {
    /// Read a database document.
    ///
    /// Arguments
    /// -----------------
    /// * `path`: location of the JSON document.
    ///
    /// Return
    /// ----------
    /// * The database; an empty one if `path` does not exist.
    /// * [`RedcalError::CorruptDatabase`] if the document cannot be parsed.
    pub fn load(path: &Utf8Path) -> Result<Self, RedcalError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no database at {path}, starting empty");
                return Ok(ArtifactDatabase::new());
            }
            Err(err) => return Err(err.into()),
        };

        serde_json::from_str(&text).map_err(|err| RedcalError::CorruptDatabase {
            path: path.to_string(),
            reason: err.to_string(),
        })
    }

    /// Atomically replace the document at `path` with this database.
    ///
    /// Missing parent directories are created.
    pub fn save(&self, path: &Utf8Path) -> Result<(), RedcalError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| err.error)?;

        debug!("saved {} records to {path}", self.len());
        Ok(())
    }
}
