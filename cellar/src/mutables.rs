//! Global table of mutable objects, a sparse list keyed by handle that is swapped
//! in with compare-and-swap. Everything stored in it is a collection root.
use std::sync::atomic::Ordering;

use crate::{Context, SpaceInner, SparseList, Value};

/// Key of a mutable object. Only the space hands these out, so every handle fits
/// the table's small integer keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutableHandle(i64);

impl MutableHandle {
    #[inline]
    pub fn id(self) -> i64 {
        self.0
    }
}

impl SpaceInner {
    /// Reserves a fresh handle, handles are never reused.
    pub fn allocate_mutable_handle(&self) -> MutableHandle {
        MutableHandle(self.next_mutable.fetch_add(1, Ordering::Relaxed))
    }

    /// Current snapshot of the table.
    pub fn mutable_table(&self) -> SparseList {
        let raw = self.mutable_root.load(Ordering::Acquire);
        SparseList::from_value(Value::from_raw(raw)).unwrap_or_default()
    }

    pub fn load_mutable(&self, handle: MutableHandle) -> Value {
        self.mutable_table().get_at(self, handle.0)
    }

    pub fn mutable_count(&self) -> usize {
        self.mutable_table().size(self)
    }
}

impl Context<'_> {
    /// Applies `edit` to the current table and installs the result, retrying on
    /// contention. The loaded table stays pinned while `edit` runs.
    fn swap_mutables<R>(
        &mut self,
        mut edit: impl FnMut(&mut Self, SparseList) -> (SparseList, R),
    ) -> R {
        let slot = self.push_local(Value::NONE);
        let result = loop {
            let current = self.mutable_table();
            self.set_local(slot, current.as_value());
            let (updated, result) = edit(self, current);
            if updated == current {
                break result;
            }
            let swapped = self.mutable_root.compare_exchange(
                current.as_value().raw(),
                updated.as_value().raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            if swapped.is_ok() {
                break result;
            }
            log::trace!(
                target: "gc",
                "mutable table changed under thread {}, retrying",
                self.thread_id()
            );
        };
        self.truncate_locals(slot);
        result
    }

    pub fn new_mutable(&mut self, value: Value) -> MutableHandle {
        let handle = self.allocate_mutable_handle();
        self.store_mutable(handle, value);
        handle
    }

    pub fn store_mutable(&mut self, handle: MutableHandle, value: Value) {
        self.swap_mutables(|ctx, table| (table.set_at(ctx, handle.0, value), ()));
    }

    /// Drops the entry and returns what it held.
    pub fn remove_mutable(&mut self, handle: MutableHandle) -> Value {
        self.swap_mutables(|ctx, table| {
            let previous = table.get_at(ctx, handle.0);
            (table.remove_at(ctx, handle.0), previous)
        })
    }

    /// Replaces the entry with `f(current)`. `f` runs again for every retry, so it
    /// must not have side effects beyond allocation.
    pub fn update_mutable(
        &mut self,
        handle: MutableHandle,
        mut f: impl FnMut(&mut Self, Value) -> Value,
    ) -> Value {
        self.swap_mutables(|ctx, table| {
            let updated = f(ctx, table.get_at(ctx, handle.0));
            (table.set_at(ctx, handle.0, updated), updated)
        })
    }
}
