//! Errors shared by the indexed collections of this crate.

use thiserror::Error;

/// Returned when a positional accessor is asked for an index past the end.
///
/// Both [`crate::tracker::PresenceTracker::item`] and
/// [`crate::store::AssociationStore::get`] report this instead of clamping,
/// so a stale index held by a caller surfaces as a bug.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("index {index} out of range for collection of length {len}")]
pub struct IndexOutOfRange {
    pub index: usize,
    pub len: usize,
}
