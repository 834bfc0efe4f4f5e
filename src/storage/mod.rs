pub mod file_pool;
pub mod fs;
pub mod image;
pub mod persistence;
pub mod pool;

pub use file_pool::{FilePool, FilePoolOpener};
pub use fs::{Filesystem, MemoryFilesystem, OsFilesystem};
pub use image::{DatasetImage, RowKey, Table};
pub use persistence::SnapshotManager;
pub use pool::{Pool, PoolOpener, Savepoint, Session};
