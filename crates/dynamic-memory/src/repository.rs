//! The storage manager clients allocate through.

use crate::config::RepositoryConfig;
use crate::error::RepositoryError;
use crate::handle::Handle;
use crate::index::{SlotIndex, ValueIndex};
use crate::store::Store;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// State shared between a repository and every handle it issued.
pub(crate) type Shared<T> = Rc<RefCell<Store<T>>>;

/// Abort an allocation or clear attempted while a value is borrowed.
#[cold]
#[track_caller]
#[allow(clippy::panic)]
fn borrowed_during(operation: &str) -> ! {
    panic!("cannot {operation} while a resolved value is borrowed")
}

fn store_mut<'a, T>(shared: &'a RefCell<Store<T>>, operation: &str) -> RefMut<'a, Store<T>> {
    match shared.try_borrow_mut() {
        Ok(store) => store,
        Err(_) => borrowed_during(operation),
    }
}

/// A compacting arena of values addressed through reference-counted handles.
///
/// Values live contiguously in an arena. Clients never see arena positions;
/// they hold [`Handle`]s, which name a slot in a separate handle table, and
/// each slot names (at most) one value. Several slots may name the same value
/// after [`Handle::retarget`], and retargeting a slot rebinds every copy of the
/// handle that shares it.
///
/// When the last handle on a slot is dropped the slot is disposed, together
/// with its value if no other slot names it. Disposal only ever removes the
/// last slot of the table; earlier slots wait until everything above them is
/// gone, which keeps the index carried by every live handle valid.
///
/// Dropping the repository clears it: every value is dropped and surviving
/// handles become null.
///
/// # Example
///
/// ```
/// use dynamic_memory::Repository;
///
/// let repo: Repository<u32> = Repository::new();
/// let answer = repo.create(42);
/// let empty = repo.create_null();
///
/// empty.retarget(&answer).unwrap();
/// assert_eq!(*empty.get().unwrap(), 42);
/// assert_eq!(answer.aggregate_ref_count(), 2);
///
/// drop(answer);
/// drop(empty);
/// assert!(repo.is_empty());
/// ```
pub struct Repository<T> {
    shared: Shared<T>,
}

impl<T> Repository<T> {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::with_config(RepositoryConfig::default())
    }

    /// Create an empty repository sized by `config`.
    pub fn with_config(config: RepositoryConfig) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Store::with_capacity(
                config.value_capacity,
                config.slot_capacity,
            ))),
        }
    }

    /// Store `value` and return the first handle on it.
    ///
    /// # Panics
    ///
    /// Panics if a [`Resolved`] value from this repository is still alive.
    pub fn create(&self, value: T) -> Handle<T> {
        let (slot, epoch) = {
            let mut store = store_mut(&self.shared, "create a value");
            (store.push_value(value), store.epoch())
        };
        trace!(%slot, "created value");
        Handle::bind(Rc::clone(&self.shared), slot, epoch)
    }

    /// Allocate a fresh slot with no value.
    ///
    /// Every call yields a distinct slot, so retargeting one null handle never
    /// affects another.
    ///
    /// # Panics
    ///
    /// Panics if a [`Resolved`] value from this repository is still alive.
    pub fn create_null(&self) -> Handle<T> {
        let (slot, epoch) = {
            let mut store = store_mut(&self.shared, "create a null slot");
            (store.push_null(), store.epoch())
        };
        trace!(%slot, "created null slot");
        Handle::bind(Rc::clone(&self.shared), slot, epoch)
    }

    /// Store `value` and retarget `handle` onto it.
    ///
    /// Returns `handle` so the call can be chained.
    pub fn replace_with<'h>(
        &self,
        handle: &'h Handle<T>,
        value: T,
    ) -> Result<&'h Handle<T>, RepositoryError> {
        if !handle.belongs_to(&self.shared) {
            return Err(RepositoryError::ForeignRepository);
        }
        let fresh = self.create(value);
        handle.retarget(&fresh)
    }

    /// Resolve a raw slot to its value.
    ///
    /// Returns `None` when the slot is out of range, when it is null, or when
    /// its target lies past the end of the arena.
    pub fn resolve(&self, slot: SlotIndex) -> Option<Resolved<'_, T>> {
        resolve(&self.shared, slot)
    }

    /// The arena position `slot` currently targets.
    pub fn target_of(&self, slot: SlotIndex) -> Option<ValueIndex> {
        self.shared.borrow().target_of(slot)
    }

    /// Point `slot` at whatever `source` targets.
    ///
    /// This is the raw form of [`Handle::retarget`].
    pub fn retarget(&self, slot: SlotIndex, source: SlotIndex) -> Result<(), RepositoryError> {
        retarget(&self.shared, slot, source)
    }

    /// Number of handles bound to `slot`.
    pub fn ref_count(&self, slot: SlotIndex) -> Option<usize> {
        self.shared.borrow().ref_count(slot)
    }

    /// Number of handles reaching the value behind `slot` through any slot.
    ///
    /// Zero for null and out-of-range slots.
    pub fn aggregate_ref_count(&self, slot: SlotIndex) -> usize {
        self.shared.borrow().aggregate_ref_count(slot)
    }

    /// The slots currently targeting `value`, in ascending order.
    pub fn alias_group(&self, value: ValueIndex) -> Vec<SlotIndex> {
        self.shared.borrow().alias_group(value)
    }

    /// Value-based equality of two slots, see [`Handle`]'s `PartialEq`.
    pub fn slots_equal(&self, left: SlotIndex, right: SlotIndex) -> bool
    where
        T: PartialEq,
    {
        let store = self.shared.borrow();
        left == right || store.values_equal(store.target_of(left), store.target_of(right))
    }

    /// Number of values in the arena.
    pub fn value_count(&self) -> usize {
        self.shared.borrow().value_count()
    }

    /// Number of slots in the handle table.
    pub fn slot_count(&self) -> usize {
        self.shared.borrow().slot_count()
    }

    /// Number of released slots waiting to reach the tail of the table.
    pub fn pending_count(&self) -> usize {
        self.shared.borrow().pending_count()
    }

    /// Returns true if the repository holds neither values nor slots.
    pub fn is_empty(&self) -> bool {
        let store = self.shared.borrow();
        store.value_count() == 0 && store.slot_count() == 0
    }

    /// Run any disposal that was deferred while a value was borrowed.
    ///
    /// Returns the number of values this sweep removed. Values freed by the
    /// handles those values owned are swept by their own drops and are not
    /// counted here. Returns 0 while a value is still borrowed.
    pub fn collect(&self) -> usize {
        collect(&self.shared)
    }

    /// Drop every value and empty all tables.
    ///
    /// Handles that survive the call resolve to `None`, and cloning or dropping
    /// them no longer touches the repository.
    ///
    /// # Panics
    ///
    /// Panics if a [`Resolved`] value from this repository is still alive.
    pub fn clear(&self) {
        let values = store_mut(&self.shared, "clear the repository").clear();
        debug!(values = values.len(), "cleared repository");
        drop(values);
    }

    /// Walk every bookkeeping invariant.
    ///
    /// # Panics
    ///
    /// Panics on the first violation found.
    pub fn check_invariants(&self) {
        self.shared.borrow().check_invariants();
    }

    /// A listing of the arena and the handle table, for diagnostics.
    ///
    /// ```text
    /// [0] --> |{23}| == 1
    /// (0) --> 0
    /// (1) --> null
    /// ```
    pub fn debug_dump(&self) -> String
    where
        T: fmt::Display,
    {
        self.to_string()
    }
}

impl<T> Default for Repository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Repository<T> {
    fn drop(&mut self) {
        // Values may own handles back into this repository; clearing breaks
        // that cycle.
        let values = {
            let Ok(mut store) = self.shared.try_borrow_mut() else {
                warn!("repository dropped while a value is borrowed, values leak");
                return;
            };
            store.clear()
        };
        drop(values);
    }
}

impl<T: fmt::Display> fmt::Display for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.shared.borrow().write_dump(f)
    }
}

impl<T> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.shared.borrow();
        f.debug_struct("Repository")
            .field("values", &store.value_count())
            .field("slots", &store.slot_count())
            .field("pending", &store.pending_count())
            .finish()
    }
}

/// A borrowed value from a repository.
///
/// While any `Resolved` is alive the arena cannot move, so allocation and
/// retargeting are refused and disposal is postponed. The postponed disposal
/// runs when the last `Resolved` is dropped.
pub struct Resolved<'a, T> {
    value: Ref<'a, T>,
    // Declared after `value` so the borrow is released before the sweep runs.
    _sweep: SweepOnDrop<'a, T>,
}

struct SweepOnDrop<'a, T>(&'a RefCell<Store<T>>);

impl<T> Drop for SweepOnDrop<'_, T> {
    fn drop(&mut self) {
        collect(self.0);
    }
}

impl<T> Deref for Resolved<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolved<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

impl<T: fmt::Display> fmt::Display for Resolved<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.value, f)
    }
}

// Shared operations used by both `Repository` and `Handle`.

pub(crate) fn resolve<T>(shared: &RefCell<Store<T>>, slot: SlotIndex) -> Option<Resolved<'_, T>> {
    let store = shared.try_borrow().ok()?;
    let value = Ref::filter_map(store, |store| store.resolve(slot)).ok()?;
    Some(Resolved {
        value,
        _sweep: SweepOnDrop(shared),
    })
}

pub(crate) fn retarget<T>(
    shared: &RefCell<Store<T>>,
    slot: SlotIndex,
    source: SlotIndex,
) -> Result<(), RepositoryError> {
    let (orphan, graveyard) = {
        let mut store = shared
            .try_borrow_mut()
            .map_err(|_| RepositoryError::Borrowed)?;
        for index in [slot, source] {
            if !store.contains_slot(index) {
                return Err(RepositoryError::UnknownSlot(index));
            }
        }
        let orphan = store.retarget(slot, source);
        (orphan, store.sweep())
    };
    drop(orphan);
    drop(graveyard);
    Ok(())
}

/// Sweep pending slots and drop the disposed values outside the borrow.
///
/// Dropping a value may release nested handles, which re-enter this function
/// and continue the cascade.
pub(crate) fn collect<T>(shared: &RefCell<Store<T>>) -> usize {
    let graveyard = {
        let Ok(mut store) = shared.try_borrow_mut() else {
            debug!("repository is borrowed, deferring disposal");
            return 0;
        };
        store.sweep()
    };
    let disposed = graveyard.len();
    drop(graveyard);
    disposed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_release() {
        let repo: Repository<u32> = Repository::new();
        {
            let handle = repo.create(23);
            assert_eq!(repo.value_count(), 1);
            assert_eq!(repo.slot_count(), 1);
            assert_eq!(handle.aggregate_ref_count(), 1);
        }
        assert!(repo.is_empty());
    }

    #[test]
    fn test_resolve_raw_slot() {
        let repo: Repository<&str> = Repository::new();
        let handle = repo.create("leaf");
        let null = repo.create_null();

        assert_eq!(repo.resolve(handle.slot()).as_deref(), Some(&"leaf"));
        assert!(repo.resolve(null.slot()).is_none());
        assert!(repo.resolve(SlotIndex::new(40)).is_none());
        assert_eq!(repo.target_of(handle.slot()), Some(ValueIndex::new(0)));
        assert_eq!(repo.target_of(null.slot()), None);
    }

    #[test]
    fn test_disposal_deferred_while_borrowed() {
        let repo: Repository<u32> = Repository::new();
        let keep = repo.create(1);
        let temp = repo.create(2);

        let guard = keep.get().unwrap();
        drop(temp);
        assert_eq!(*guard, 1);
        assert_eq!(repo.pending_count(), 1);
        assert_eq!(repo.value_count(), 2);

        drop(guard);
        assert_eq!(repo.pending_count(), 0);
        assert_eq!(repo.value_count(), 1);
        repo.check_invariants();
    }

    #[test]
    fn test_retarget_refused_while_borrowed() {
        let repo: Repository<u32> = Repository::new();
        let a = repo.create(1);
        let b = repo.create(2);

        let guard = b.get().unwrap();
        assert_eq!(a.retarget(&b).err(), Some(RepositoryError::Borrowed));
        drop(guard);
        assert!(a.retarget(&b).is_ok());
        assert_eq!(*a.get().unwrap(), 2);
    }

    #[test]
    fn test_retarget_unknown_slot() {
        let repo: Repository<u32> = Repository::new();
        let a = repo.create(1);
        assert_eq!(
            repo.retarget(a.slot(), SlotIndex::new(5)),
            Err(RepositoryError::UnknownSlot(SlotIndex::new(5)))
        );
    }

    #[test]
    #[should_panic(expected = "cannot create a value while a resolved value is borrowed")]
    fn test_create_while_borrowed_panics() {
        let repo: Repository<u32> = Repository::new();
        let parent = repo.create(1);
        let _guard = parent.get().unwrap();
        let _child = repo.create(2);
    }

    #[test]
    fn test_collect_counts_its_own_sweep() {
        struct Chain(Option<Handle<Chain>>);

        let repo: Repository<Chain> = Repository::new();
        let inner = repo.create(Chain(None));
        let outer = repo.create(Chain(Some(inner)));

        // Release the outer slot without running its drop, so nothing sweeps it.
        assert!(repo.shared.borrow().decrement(outer.slot()));
        std::mem::forget(outer);
        assert_eq!(repo.pending_count(), 1);

        // The inner value goes with the cascade but is not counted here.
        assert_eq!(repo.collect(), 1);
        assert!(repo.is_empty());
    }

    #[test]
    fn test_debug_format() {
        let repo: Repository<u32> = Repository::new();
        let _a = repo.create(1);
        let debug = format!("{:?}", repo);
        assert!(debug.contains("Repository"));
        assert!(debug.contains("values: 1"));
    }

    #[test]
    fn test_with_config() {
        let repo: Repository<u8> =
            Repository::with_config(RepositoryConfig::default().with_slot_capacity(8));
        assert!(repo.is_empty());
        let _h = repo.create(1);
        assert_eq!(repo.slot_count(), 1);
    }
}
