use crate::{
    CellData, IdentityDict, List, Set, SpaceInner, SparseList, Tag, Tuple, Value, tagged::CellRef,
};

/// Something that can construct cells: in practice the innermost [`crate::Context`].
pub trait Allocator {
    fn space(&self) -> &SpaceInner;

    /// Writes `data` into a fresh cell linked into the current allocation chain.
    /// May stop at a safepoint before the cell is taken.
    fn allocate(&mut self, data: CellData) -> CellRef;

    /// Roots `value` until [`Allocator::unpin`] is called with the returned slot.
    fn pin(&mut self, value: Value) -> usize;

    fn repin(&mut self, slot: usize, value: Value);

    /// Drops the pin in `slot` and every pin taken after it.
    fn unpin(&mut self, slot: usize);

    #[inline]
    fn allocate_value(&mut self, tag: Tag, data: CellData) -> Value {
        Value::reference(tag, self.allocate(data))
    }

    fn new_list(&mut self) -> List {
        List::new()
    }

    fn new_sparse_list(&mut self) -> SparseList {
        SparseList::new()
    }

    fn new_tuple(&mut self) -> Tuple {
        Tuple::empty()
    }

    fn new_set(&mut self) -> Set {
        Set::new()
    }

    fn new_dict(&mut self) -> IdentityDict {
        IdentityDict::new()
    }
}
