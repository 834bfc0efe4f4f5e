//! On-disk format of a dataset file.
//!
//! A dataset file is one MessagePack-encoded [`DatasetSnapshot`]. It is
//! always replaced whole through [`Filesystem::write_atomic`], so a crash
//! leaves either the previous image or the new one.

use crate::core::{DbError, Result};
use crate::storage::fs::Filesystem;
use crate::storage::image::DatasetImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub version: u32,
    pub image: DatasetImage,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub row_count: usize,
    pub table_count: usize,
    pub kv_count: usize,
}

impl DatasetSnapshot {
    pub fn new(image: DatasetImage) -> Self {
        let metadata = SnapshotMetadata {
            row_count: image.row_count(),
            table_count: image.tables().len(),
            kv_count: image.kv().len(),
        };
        Self {
            version: SNAPSHOT_VERSION,
            image,
            metadata,
        }
    }
}

pub struct SnapshotManager {
    fs: Arc<dyn Filesystem>,
    path: PathBuf,
}

impl SnapshotManager {
    pub fn new(fs: Arc<dyn Filesystem>, path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.fs.exists(&self.path)
    }

    pub fn save(&self, image: &DatasetImage) -> Result<()> {
        let snapshot = DatasetSnapshot::new(image.clone());
        let serialized = rmp_serde::to_vec(&snapshot)?;
        self.fs.write_atomic(&self.path, &serialized)?;
        Ok(())
    }

    pub fn load(&self) -> Result<DatasetImage> {
        let data = self.fs.read(&self.path)?;
        let snapshot: DatasetSnapshot = rmp_serde::from_slice(&data)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(DbError::Serialization(format!(
                "{}: unsupported snapshot version {}",
                self.path.display(),
                snapshot.version
            )));
        }
        Ok(snapshot.image)
    }
}
