//! Index types for the handle table and the arena.

use std::fmt;

/// Position of a slot in the handle table.
///
/// This is the identity a [`Handle`](crate::Handle) carries. Slots are only
/// ever removed from the tail of the table, so the index of a slot that is
/// still referenced never changes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(pub(crate) usize);

impl SlotIndex {
    /// Wrap a raw handle-table position.
    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw position.
    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Debug for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a value in the arena.
///
/// Not stable: removing a value shifts every value above it down by one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueIndex(pub(crate) usize);

impl ValueIndex {
    /// Wrap a raw arena position.
    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw position.
    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    /// The index this value moves to once a lower value is removed.
    #[inline]
    pub(crate) const fn shifted_down(self) -> Self {
        Self(self.0 - 1)
    }
}

impl fmt::Debug for ValueIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self.0)
    }
}

impl fmt::Display for ValueIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremented every time a repository is cleared.
///
/// Handles remember the epoch they were bound in, so a handle that outlives
/// [`Repository::clear`](crate::Repository::clear) never touches a slot that
/// was created afterwards at the same position.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Epoch(u32);

impl Epoch {
    #[inline]
    pub(crate) const fn new() -> Self {
        Self(0)
    }

    /// Advance the epoch, wrapping on overflow.
    #[inline]
    pub(crate) fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_wrapping() {
        let mut epoch = Epoch(u32::MAX);
        epoch.increment();
        assert_eq!(epoch, Epoch::new());
    }

    #[test]
    fn test_index_formatting() {
        assert_eq!(format!("{:?}", SlotIndex::new(3)), "Slot(3)");
        assert_eq!(format!("{}", ValueIndex::new(7)), "7");
        assert_eq!(ValueIndex::new(7).shifted_down(), ValueIndex::new(6));
    }

    #[test]
    fn test_slot_ordering() {
        assert!(SlotIndex::new(1) < SlotIndex::new(2));
        assert_eq!(SlotIndex::new(4).get(), 4);
    }
}
