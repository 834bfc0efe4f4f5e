// ============================================================================
// Change Tracking Module
// ============================================================================
//
// Turns the difference between two dataset images into a changeset and the
// changeset into a replica-independent identifier.
//
// ============================================================================

pub mod change;
pub mod changeset;

pub use change::{ChangeType, Changeset, RecordChange, SchemaChange, TableChangeset};
pub use changeset::{diff, encode_key};
