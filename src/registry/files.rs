//! Dataset file naming.
//!
//! `<dir>/<dbid>` is committed, `<dir>/<dbid>.new` was created by a session
//! that has not committed, `<dir>/<dbid>.deleted` was deleted by one. At most
//! one of the three exists for a dbid.

use crate::core::{DbError, Result};
use crate::storage::fs::COMPANION_SUFFIXES;
use std::path::{Path, PathBuf};

pub const NEW_SUFFIX: &str = ".new";
pub const DELETED_SUFFIX: &str = ".deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Stable,
    New,
    Deleted,
}

impl FileState {
    fn suffix(self) -> &'static str {
        match self {
            FileState::Stable => "",
            FileState::New => NEW_SUFFIX,
            FileState::Deleted => DELETED_SUFFIX,
        }
    }
}

pub fn dataset_path(dir: &Path, dbid: &str, state: FileState) -> PathBuf {
    dir.join(format!("{}{}", dbid, state.suffix()))
}

/// Split a directory entry into its dbid and state.
pub fn parse_file_name(name: &str) -> (&str, FileState) {
    if let Some(dbid) = name.strip_suffix(NEW_SUFFIX) {
        (dbid, FileState::New)
    } else if let Some(dbid) = name.strip_suffix(DELETED_SUFFIX) {
        (dbid, FileState::Deleted)
    } else {
        (name, FileState::Stable)
    }
}

/// A dbid must map to exactly one file name and back.
pub fn validate_dbid(dbid: &str) -> Result<()> {
    let reserved_suffix = [NEW_SUFFIX, DELETED_SUFFIX]
        .iter()
        .chain(COMPANION_SUFFIXES.iter())
        .any(|suffix| dbid.ends_with(suffix));

    if dbid.is_empty()
        || dbid == "."
        || dbid == ".."
        || dbid.contains(['/', '\\', '\0'])
        || reserved_suffix
    {
        return Err(DbError::InvalidDbid(dbid.to_string()));
    }
    Ok(())
}
