//! Cells: the fixed-size unit every heap value lives in.
//!
//! A slot is the chain link, the generation of the slot and the payload. The payload
//! is a closed enum, the collector and the finalizer dispatch on it with `match`.
use std::{
    cell::UnsafeCell,
    mem,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{
    ByteChunk, ExternalCell, IteratorCell, MethodCell, ObjectCell, ParentLink, ThreadCell,
    TreeNode, TupleIndirect, TupleLeaf,
};

/// Chain terminator. Index 0 is never handed out by the arena.
pub const NO_CELL: u32 = 0;

/// Upper bound for a slot, link and generation included.
pub const CELL_SIZE: usize = 64;

/// Cell payload. The zero bit pattern is `Free`, freshly mapped memory is valid as is.
#[repr(C, u8)]
#[derive(Debug, Clone, Copy)]
pub enum CellData {
    Free = 0,
    Node(TreeNode),
    TupleLeaf(TupleLeaf),
    TupleIndirect(TupleIndirect),
    Chunk(ByteChunk),
    Object(ObjectCell),
    ParentLink(ParentLink),
    Method(MethodCell),
    External(ExternalCell),
    Iterator(IteratorCell),
    Thread(ThreadCell),
}

impl CellData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            CellData::Free => "free",
            CellData::Node(_) => "tree node",
            CellData::TupleLeaf(_) => "tuple leaf",
            CellData::TupleIndirect(_) => "indirect tuple",
            CellData::Chunk(_) => "byte chunk",
            CellData::Object(_) => "object",
            CellData::ParentLink(_) => "parent link",
            CellData::Method(_) => "method",
            CellData::External(_) => "external pointer",
            CellData::Iterator(_) => "iterator",
            CellData::Thread(_) => "thread",
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        matches!(self, CellData::Free)
    }
}

#[repr(C)]
pub struct CellSlot {
    /// Link to the next cell of whatever chain owns this one: free list,
    /// thread cache, context chain, dirty segment or retained survivors.
    pub next: AtomicU32,
    pub generation: AtomicU32,
    pub data: UnsafeCell<CellData>,
}

const _: () = assert!(mem::size_of::<CellSlot>() <= CELL_SIZE);
const _: () = assert!(mem::align_of::<CellSlot>() <= 8);

// SAFETY: the payload is written once by the allocating thread before the handle is
// published, and only reclaimed by the sweep once nothing can reach it
unsafe impl Sync for CellSlot {}
// SAFETY: see above, a slot carries no thread affine state
unsafe impl Send for CellSlot {}

impl CellSlot {
    /// # Safety
    /// the slot must hold a constructed cell that is not being reclaimed
    #[inline]
    pub unsafe fn data(&self) -> &CellData {
        // SAFETY: by contract
        unsafe { &*self.data.get() }
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Tag, Value};

    #[test]
    fn slot_fits_in_one_cell() {
        assert!(mem::size_of::<CellSlot>() <= CELL_SIZE);
        assert!(mem::size_of::<CellData>() <= CELL_SIZE - 8);
    }

    #[test]
    fn zeroed_payload_reads_as_free() {
        // SAFETY: Free is discriminant 0 and carries no fields
        let data: CellData = unsafe { mem::zeroed() };
        assert!(data.is_free());
        assert_eq!(data.kind_name(), "free");
    }

    #[test]
    fn node_payload_is_copy_and_names_its_kind() {
        let node = CellData::Node(TreeNode {
            previous: Value::empty(Tag::List),
            next: Value::empty(Tag::List),
            key: Value::NONE,
            value: Value::from_i64(3),
            count: 1,
            height: 1,
        });
        let copy = node;
        assert_eq!(copy.kind_name(), "tree node");
        assert!(!node.is_free());
    }
}
