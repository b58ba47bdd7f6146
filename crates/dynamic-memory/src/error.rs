//! Recoverable errors reported by the repository.

use crate::index::SlotIndex;
use thiserror::Error;

/// Client-side misuse that the repository reports instead of aborting.
///
/// Bookkeeping violations inside the repository are not represented here;
/// those panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// The handle's slot has no target.
    #[error("handle at slot {0} is null")]
    NullHandle(SlotIndex),

    /// The two handles were created by different repositories.
    #[error("handles belong to different repositories")]
    ForeignRepository,

    /// The handle was bound before the repository was cleared.
    #[error("handle at slot {0} belongs to a cleared repository")]
    Detached(SlotIndex),

    /// The slot is past the end of the handle table.
    #[error("slot {0} is out of range")]
    UnknownSlot(SlotIndex),

    /// A resolved value is still borrowed, so the tables cannot be mutated.
    #[error("repository is borrowed by a resolved value")]
    Borrowed,
}
