//! Reference-counted, retargetable handle type.

use crate::error::RepositoryError;
use crate::index::{Epoch, SlotIndex, ValueIndex};
use crate::repository::{self, Resolved, Shared};
use crate::store::Store;
use std::fmt;
use std::rc::Rc;
use tracing::warn;

/// A handle to a slot in a [`Repository`](crate::Repository).
///
/// A handle does not own a value. It owns one unit of its slot's reference
/// count: cloning increments it, dropping decrements it, and the slot (and
/// its value, if no other slot aliases it) is disposed once the count hits
/// zero.
///
/// Handles are meant to be embedded in the values they point at, which is how
/// trees and graphs are built on top of a repository:
///
/// ```
/// use dynamic_memory::{Handle, Repository};
///
/// struct Cons {
///     head: u32,
///     tail: Handle<Cons>,
/// }
///
/// let repo = Repository::new();
/// let list = repo.create(Cons { head: 1, tail: repo.create_null() });
/// let tail = list.get().unwrap().tail.clone();
/// repo.replace_with(&tail, Cons { head: 2, tail: repo.create_null() }).unwrap();
///
/// // Every copy of the tail slot sees the new node.
/// assert_eq!(list.get().unwrap().tail.get().unwrap().head, 2);
/// ```
pub struct Handle<T> {
    shared: Shared<T>,
    slot: SlotIndex,
    epoch: Epoch,
}

impl<T> Handle<T> {
    /// Bind a new handle to `slot`, taking one unit of its count.
    pub(crate) fn bind(shared: Shared<T>, slot: SlotIndex, epoch: Epoch) -> Self {
        shared.borrow().increment(slot);
        Self {
            shared,
            slot,
            epoch,
        }
    }

    pub(crate) fn belongs_to(&self, shared: &Shared<T>) -> bool {
        Rc::ptr_eq(&self.shared, shared)
    }

    /// False once the repository has been cleared after this handle was bound.
    fn attached(&self) -> bool {
        self.shared
            .try_borrow()
            .is_ok_and(|store| store.epoch() == self.epoch)
    }

    fn target_in(&self, store: &Store<T>) -> Option<ValueIndex> {
        if store.epoch() == self.epoch {
            store.target_of(self.slot)
        } else {
            None
        }
    }

    /// Get the slot index.
    #[inline]
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// The arena position this handle currently reaches, if any.
    pub fn target(&self) -> Option<ValueIndex> {
        self.target_in(&self.shared.borrow())
    }

    /// Returns true if the slot has no value.
    pub fn is_null(&self) -> bool {
        self.target().is_none()
    }

    /// Borrow the value, or `None` for a null handle.
    pub fn get(&self) -> Option<Resolved<'_, T>> {
        if !self.attached() {
            return None;
        }
        repository::resolve(&self.shared, self.slot)
    }

    /// Borrow the value, reporting why there is none.
    pub fn try_get(&self) -> Result<Resolved<'_, T>, RepositoryError> {
        if !self.attached() {
            return Err(RepositoryError::Detached(self.slot));
        }
        self.get().ok_or(RepositoryError::NullHandle(self.slot))
    }

    /// Number of handles sharing this handle's slot.
    pub fn ref_count(&self) -> usize {
        let store = self.shared.borrow();
        if store.epoch() == self.epoch {
            store.ref_count(self.slot).unwrap_or(0)
        } else {
            0
        }
    }

    /// Number of handles reaching this handle's value through any slot.
    pub fn aggregate_ref_count(&self) -> usize {
        let store = self.shared.borrow();
        if store.epoch() == self.epoch {
            store.aggregate_ref_count(self.slot)
        } else {
            0
        }
    }

    /// Point this handle's slot at `source`'s value.
    ///
    /// Every handle sharing this slot observes the change. The previous value
    /// is disposed if this slot was the last one aliasing it.
    pub fn retarget(&self, source: &Handle<T>) -> Result<&Self, RepositoryError> {
        if !Rc::ptr_eq(&self.shared, &source.shared) {
            return Err(RepositoryError::ForeignRepository);
        }
        for handle in [self, source] {
            if !handle.attached() {
                return Err(RepositoryError::Detached(handle.slot));
            }
        }
        repository::retarget(&self.shared, self.slot, source.slot)?;
        Ok(self)
    }

    /// Rebind this handle to `source`'s slot.
    ///
    /// Unlike [`retarget`](Handle::retarget) this only moves this one handle;
    /// other handles on the old slot are unaffected.
    pub fn assign(&mut self, source: &Handle<T>) -> &mut Self {
        *self = source.clone();
        self
    }
}

// Copies share the slot and take one more unit of its count.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        {
            let store = self.shared.borrow();
            if store.epoch() == self.epoch {
                store.increment(self.slot);
            }
        }
        Self {
            shared: Rc::clone(&self.shared),
            slot: self.slot,
            epoch: self.epoch,
        }
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        let queued = {
            let Ok(store) = self.shared.try_borrow() else {
                warn!(slot = %self.slot, "handle dropped while the repository is mutably borrowed");
                return;
            };
            store.epoch() == self.epoch && store.decrement(self.slot)
        };
        if queued {
            repository::collect(&self.shared);
        }
    }
}

/// Handles compare by value: two handles from the same repository are equal
/// when they share a slot, when both are null, or when their values are equal.
impl<T: PartialEq> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        if !Rc::ptr_eq(&self.shared, &other.shared) {
            return false;
        }
        if self.slot == other.slot && self.epoch == other.epoch {
            return true;
        }
        let store = self.shared.borrow();
        store.values_equal(self.target_in(&store), other.target_in(&store))
    }
}

impl<T: Eq> Eq for Handle<T> {}

impl<T: fmt::Display> fmt::Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Display::fmt(&*value, f),
            None => f.write_str("null"),
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.slot)
            .field("target", &self.target())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Repository, RepositoryError};

    #[test]
    fn test_clone_shares_slot() {
        let repo: Repository<i32> = Repository::new();
        let h1 = repo.create(42);
        let h2 = h1.clone();

        assert_eq!(h1.slot(), h2.slot());
        assert_eq!(h1.ref_count(), 2);
        drop(h2);
        assert_eq!(h1.ref_count(), 1);
        assert_eq!(repo.value_count(), 1);
    }

    #[test]
    fn test_equality_is_value_based() {
        let repo: Repository<i32> = Repository::new();
        let a = repo.create(7);
        let b = repo.create(7);
        let c = repo.create(8);

        assert_ne!(a.slot(), b.slot());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(repo.create_null(), repo.create_null());
        assert_ne!(repo.create_null(), a);
    }

    #[test]
    fn test_equality_across_repositories() {
        let left: Repository<i32> = Repository::new();
        let right: Repository<i32> = Repository::new();
        assert_ne!(left.create(1), right.create(1));
    }

    #[test]
    fn test_try_get_null() {
        let repo: Repository<i32> = Repository::new();
        let null = repo.create_null();
        assert_eq!(
            null.try_get().err(),
            Some(RepositoryError::NullHandle(null.slot()))
        );
        assert!(null.is_null());
    }

    #[test]
    fn test_retarget_foreign_repository() {
        let left: Repository<i32> = Repository::new();
        let right: Repository<i32> = Repository::new();
        let a = left.create(1);
        let b = right.create(2);
        assert_eq!(
            a.retarget(&b).err(),
            Some(RepositoryError::ForeignRepository)
        );
    }

    #[test]
    fn test_assign_moves_one_handle() {
        let repo: Repository<i32> = Repository::new();
        let a = repo.create(1);
        let b = repo.create(2);
        let mut c = a.clone();

        assert_eq!(*c.assign(&b).get().unwrap(), 2);
        assert_eq!(*a.get().unwrap(), 1);
        assert_eq!(a.ref_count(), 1);
        assert_eq!(b.ref_count(), 2);
    }

    #[test]
    fn test_display_and_debug() {
        let repo: Repository<i32> = Repository::new();
        let a = repo.create(5);
        let null = repo.create_null();

        assert_eq!(a.to_string(), "5");
        assert_eq!(null.to_string(), "null");
        let debug = format!("{:?}", a);
        assert!(debug.contains("Handle"));
        assert!(debug.contains("slot"));
    }
}
