//! Backing tables and the disposal/compaction protocol.
//!
//! The store owns four parallel structures:
//!
//! ```text
//! values   [v0, v1, v2]                 arena, no holes
//! targets  [Some(0), None, Some(2), Some(0)]   handle table
//! counts   [1, 1, 2, 0]                 live handles per slot
//! aliases  {0: {0, 3}, 2: {2}}          value -> slots targeting it
//! ```
//!
//! Slots are removed only from the tail of the handle table. A slot whose
//! count drops to zero while a higher slot is still alive waits in the pending
//! set until it becomes the tail, so removing a slot never shifts the index of
//! another slot that is still referenced or still waiting. Values can be
//! removed from anywhere; every slot targeting a value above the removed one
//! is repaired through the alias sets.

use crate::index::{Epoch, SlotIndex, ValueIndex};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::trace;

pub(crate) struct Store<T> {
    values: Vec<T>,
    targets: Vec<Option<ValueIndex>>,
    /// Interior-mutable so handles can be copied while a value is borrowed.
    counts: Vec<Cell<usize>>,
    aliases: BTreeMap<ValueIndex, BTreeSet<SlotIndex>>,
    pending: RefCell<BTreeSet<SlotIndex>>,
    epoch: Epoch,
}

/// Abort on a broken bookkeeping invariant.
#[cold]
#[track_caller]
#[allow(clippy::panic)]
fn invariant_violated(message: fmt::Arguments<'_>) -> ! {
    panic!("repository invariant violated: {message}")
}

impl<T> Store<T> {
    pub(crate) fn with_capacity(values: usize, slots: usize) -> Self {
        Self {
            values: Vec::with_capacity(values),
            targets: Vec::with_capacity(slots),
            counts: Vec::with_capacity(slots),
            aliases: BTreeMap::new(),
            pending: RefCell::new(BTreeSet::new()),
            epoch: Epoch::new(),
        }
    }

    #[inline]
    pub(crate) fn epoch(&self) -> Epoch {
        self.epoch
    }

    #[inline]
    pub(crate) fn value_count(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub(crate) fn slot_count(&self) -> usize {
        self.targets.len()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    #[inline]
    pub(crate) fn contains_slot(&self, slot: SlotIndex) -> bool {
        slot.0 < self.targets.len()
    }

    fn assert_aligned(&self) {
        if self.counts.len() != self.targets.len() {
            invariant_violated(format_args!(
                "{} reference counts for {} slots",
                self.counts.len(),
                self.targets.len()
            ));
        }
    }

    // Allocation ---------------------------------------------------------------

    /// Append `value` to the arena together with a slot targeting it.
    pub(crate) fn push_value(&mut self, value: T) -> SlotIndex {
        let target = ValueIndex(self.values.len());
        self.values.push(value);
        let slot = self.push_slot(Some(target));
        self.aliases.entry(target).or_default().insert(slot);
        slot
    }

    /// Append a slot with no target.
    pub(crate) fn push_null(&mut self) -> SlotIndex {
        self.push_slot(None)
    }

    fn push_slot(&mut self, target: Option<ValueIndex>) -> SlotIndex {
        self.assert_aligned();
        let slot = SlotIndex(self.targets.len());
        self.targets.push(target);
        self.counts.push(Cell::new(0));
        slot
    }

    // Resolution ---------------------------------------------------------------

    /// The raw table entry; `None` for null and out-of-range slots.
    #[inline]
    pub(crate) fn target_of(&self, slot: SlotIndex) -> Option<ValueIndex> {
        self.targets.get(slot.0).copied().flatten()
    }

    pub(crate) fn resolve(&self, slot: SlotIndex) -> Option<&T> {
        self.target_of(slot)
            .and_then(|target| self.values.get(target.0))
    }

    pub(crate) fn ref_count(&self, slot: SlotIndex) -> Option<usize> {
        self.counts.get(slot.0).map(Cell::get)
    }

    /// Total live handles on the value behind `slot`, across every alias.
    pub(crate) fn aggregate_ref_count(&self, slot: SlotIndex) -> usize {
        match self.target_of(slot) {
            Some(target) => {
                if !self.aliases.contains_key(&target) {
                    invariant_violated(format_args!(
                        "slot {slot} targets value {target} which has no alias set"
                    ));
                }
                self.value_ref_count(target)
            }
            None => 0,
        }
    }

    fn value_ref_count(&self, target: ValueIndex) -> usize {
        self.aliases
            .get(&target)
            .map(|group| group.iter().map(|slot| self.counts[slot.0].get()).sum())
            .unwrap_or(0)
    }

    pub(crate) fn alias_group(&self, target: ValueIndex) -> Vec<SlotIndex> {
        self.aliases
            .get(&target)
            .map(|group| group.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn values_equal(&self, left: Option<ValueIndex>, right: Option<ValueIndex>) -> bool
    where
        T: PartialEq,
    {
        match (left, right) {
            (None, None) => true,
            (Some(left), Some(right)) => {
                left == right
                    || matches!(
                        (self.values.get(left.0), self.values.get(right.0)),
                        (Some(a), Some(b)) if a == b
                    )
            }
            _ => false,
        }
    }

    // Counting -----------------------------------------------------------------

    /// Out-of-range slots are ignored.
    pub(crate) fn increment(&self, slot: SlotIndex) {
        self.assert_aligned();
        if let Some(count) = self.counts.get(slot.0) {
            count.set(count.get() + 1);
        }
    }

    /// Returns `true` when the count reached zero and the slot was queued for
    /// disposal. The caller is expected to run [`Store::sweep`] afterwards.
    pub(crate) fn decrement(&self, slot: SlotIndex) -> bool {
        self.assert_aligned();
        let Some(count) = self.counts.get(slot.0) else {
            return false;
        };
        let current = count.get();
        if current == 0 {
            invariant_violated(format_args!("decrementing the zero count of slot {slot}"));
        }
        count.set(current - 1);
        if current == 1 {
            self.pending.borrow_mut().insert(slot);
            true
        } else {
            false
        }
    }

    // Retargeting --------------------------------------------------------------

    /// Point `slot` at whatever `source` targets.
    ///
    /// The previous target of `slot` is disposed when `slot` was its last
    /// alias; the removed value is returned so it can be dropped once the
    /// caller has released the store. A held slot leaves the pending set, a
    /// slot with a zero count stays queued. Both slots must be in range.
    pub(crate) fn retarget(&mut self, slot: SlotIndex, source: SlotIndex) -> Option<T> {
        let previous = self.target_of(slot);
        let mut orphan = None;

        if previous != self.target_of(source) {
            if let Some(old) = previous {
                let Some(group) = self.aliases.get_mut(&old) else {
                    invariant_violated(format_args!(
                        "slot {slot} targets value {old} which has no alias set"
                    ));
                };
                group.remove(&slot);
                if group.is_empty() {
                    self.aliases.remove(&old);
                    self.targets[slot.0] = None;
                    orphan = Some(self.remove_value(old));
                }
            }

            // Re-read: removing the old value may have shifted the source's target.
            let next = self.target_of(source);
            self.targets[slot.0] = next;
            if let Some(target) = next {
                self.aliases.entry(target).or_default().insert(slot);
            }
            trace!(%slot, %source, ?next, "retargeted slot");
        }

        // A slot with no live handle stays queued, nothing else would release it.
        if self.counts.get(slot.0).is_some_and(|count| count.get() > 0) {
            self.pending.get_mut().remove(&slot);
        }
        orphan
    }

    // Disposal -----------------------------------------------------------------

    /// Dispose pending slots from the tail of the handle table downwards.
    ///
    /// Each iteration removes exactly one slot and at most one value. The loop
    /// stops as soon as the highest pending slot is not the tail. Removed values
    /// are returned rather than dropped, since dropping them may release nested
    /// handles that need to re-enter the store.
    pub(crate) fn sweep(&mut self) -> Vec<T> {
        let mut graveyard = Vec::new();

        loop {
            let tail = self.targets.len().checked_sub(1);
            let pending = self.pending.get_mut();
            let left = match pending.last() {
                Some(&left) if Some(left.0) == tail => left,
                _ => break,
            };
            pending.remove(&left);

            self.assert_aligned();
            let count = self.counts[left.0].get();
            if count != 0 {
                invariant_violated(format_args!(
                    "slot {left} queued for disposal with {count} live handles"
                ));
            }

            let orphan = match self.targets[left.0] {
                Some(target) => {
                    let Some(group) = self.aliases.get_mut(&target) else {
                        invariant_violated(format_args!(
                            "slot {left} targets value {target} which has no alias set"
                        ));
                    };
                    group.remove(&left);
                    if group.is_empty() {
                        self.aliases.remove(&target);
                        Some(target)
                    } else {
                        None
                    }
                }
                None => None,
            };

            self.remove_slot(left);
            if let Some(target) = orphan {
                graveyard.push(self.remove_value(target));
            }
        }

        graveyard
    }

    /// Remove one slot and shift every alias entry above it down by one.
    fn remove_slot(&mut self, left: SlotIndex) {
        self.targets.remove(left.0);
        self.counts.remove(left.0);

        for group in self.aliases.values_mut() {
            if group.range(left..).next().is_none() {
                continue;
            }
            *group = group
                .iter()
                .filter(|&&slot| slot != left)
                .map(|&slot| if slot > left { SlotIndex(slot.0 - 1) } else { slot })
                .collect();
        }
        self.aliases.retain(|_, group| !group.is_empty());

        trace!(slot = %left, "disposed slot");
    }

    /// Remove an unaliased value and repair every target above it.
    fn remove_value(&mut self, target: ValueIndex) -> T {
        if let Some(group) = self.aliases.get(&target) {
            invariant_violated(format_args!(
                "disposing value {target} still aliased by {group:?}"
            ));
        }
        if target.0 >= self.values.len() {
            invariant_violated(format_args!(
                "disposing value {target} past the arena end {}",
                self.values.len()
            ));
        }

        let removed = self.values.remove(target.0);

        let above = self.aliases.split_off(&target);
        for (old, group) in above {
            let new = old.shifted_down();
            for slot in &group {
                match self.targets.get_mut(slot.0) {
                    Some(entry) if *entry == Some(old) => *entry = Some(new),
                    _ => invariant_violated(format_args!(
                        "slot {slot} is aliased to value {old} but does not target it"
                    )),
                }
            }
            self.aliases.insert(new, group);
        }

        trace!(value = %target, "disposed value");
        removed
    }

    /// Empty every table and start a new epoch. The values are returned so the
    /// caller can drop them after releasing the store.
    pub(crate) fn clear(&mut self) -> Vec<T> {
        self.aliases.clear();
        self.targets.clear();
        self.counts.clear();
        self.pending.get_mut().clear();
        self.epoch.increment();
        std::mem::take(&mut self.values)
    }

    // Diagnostics --------------------------------------------------------------

    pub(crate) fn check_invariants(&self) {
        self.assert_aligned();

        for (index, target) in self.targets.iter().enumerate() {
            let slot = SlotIndex(index);
            let Some(target) = *target else { continue };
            if target.0 >= self.values.len() {
                invariant_violated(format_args!(
                    "slot {slot} targets value {target} past the arena end {}",
                    self.values.len()
                ));
            }
            if !self.aliases.get(&target).is_some_and(|group| group.contains(&slot)) {
                invariant_violated(format_args!(
                    "slot {slot} is missing from the alias set of value {target}"
                ));
            }
        }

        for (target, group) in &self.aliases {
            if group.is_empty() {
                invariant_violated(format_args!("empty alias set for value {target}"));
            }
            for &slot in group {
                if self.target_of(slot) != Some(*target) {
                    invariant_violated(format_args!(
                        "alias set of value {target} lists slot {slot} targeting {:?}",
                        self.target_of(slot)
                    ));
                }
            }
        }

        if self.aliases.len() != self.values.len() {
            invariant_violated(format_args!(
                "{} values but {} alias sets",
                self.values.len(),
                self.aliases.len()
            ));
        }

        let pending = self.pending.borrow();
        for &slot in pending.iter() {
            if self.ref_count(slot) != Some(0) {
                invariant_violated(format_args!(
                    "pending slot {slot} has count {:?}",
                    self.ref_count(slot)
                ));
            }
        }
        for (index, count) in self.counts.iter().enumerate() {
            let slot = SlotIndex(index);
            if count.get() == 0 && !pending.contains(&slot) {
                invariant_violated(format_args!(
                    "slot {slot} has no live handles but is not queued"
                ));
            }
        }
    }

    pub(crate) fn write_dump(&self, out: &mut impl fmt::Write) -> fmt::Result
    where
        T: fmt::Display,
    {
        for (index, value) in self.values.iter().enumerate() {
            let refs = self.value_ref_count(ValueIndex(index));
            writeln!(out, "[{index}] --> |{{{value}}}| == {refs}")?;
        }
        for (index, target) in self.targets.iter().enumerate() {
            match target {
                Some(target) => writeln!(out, "({index}) --> {target}")?,
                None => writeln!(out, "({index}) --> null")?,
            }
        }
        Ok(())
    }
}
