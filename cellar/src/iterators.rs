//! Cursor cells over lists, sparse lists and tuples. A cursor is immutable like
//! everything else, advancing it allocates the next cursor.
use crate::{Allocator, CellData, List, SpaceInner, Tag, Tuple, Value, tree};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IteratorCell {
    pub source: Value,
    pub position: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellIterator(Value);

impl CellIterator {
    /// Cursor at the first element of `source`. `None` for values that cannot be iterated.
    pub fn new<A: Allocator>(alloc: &mut A, source: Value) -> Option<Self> {
        let tag = match source.tag() {
            Tag::List => Tag::ListIterator,
            Tag::SparseList => Tag::SparseListIterator,
            Tag::Tuple => Tag::TupleIterator,
            _ => return None,
        };
        Some(Self::at(alloc, tag, source, 0))
    }

    fn at<A: Allocator>(alloc: &mut A, tag: Tag, source: Value, position: u64) -> Self {
        let cell = IteratorCell { source, position };
        Self(alloc.allocate_value(tag, CellData::Iterator(cell)))
    }

    pub fn from_value(value: Value) -> Option<Self> {
        matches!(
            value.tag(),
            Tag::ListIterator | Tag::SparseListIterator | Tag::TupleIterator
        )
        .then_some(Self(value))
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0
    }

    fn cell(self, space: &SpaceInner) -> IteratorCell {
        let data = self.0.cell().map(|cell| space.cell(cell));
        match data {
            Some(CellData::Iterator(iterator)) => *iterator,
            _ => panic!("{:?} is not an iterator cell", self.0),
        }
    }

    pub fn position(self, space: &SpaceInner) -> u64 {
        self.cell(space).position
    }

    fn source_len(space: &SpaceInner, source: Value) -> usize {
        match source.tag() {
            Tag::Tuple => Tuple::from_value(source).map_or(0, |t| t.size(space)),
            _ => tree::count(space, source),
        }
    }

    pub fn is_done(self, space: &SpaceInner) -> bool {
        let cell = self.cell(space);
        cell.position as usize >= Self::source_len(space, cell.source)
    }

    /// Element under the cursor, `NONE` once done.
    pub fn current(self, space: &SpaceInner) -> Value {
        let cell = self.cell(space);
        match self.0.tag() {
            Tag::ListIterator => List::from_value(cell.source)
                .map_or(Value::NONE, |list| list.get_at(space, cell.position as i64)),
            Tag::TupleIterator => Tuple::from_value(cell.source)
                .map_or(Value::NONE, |tuple| tuple.get_at(space, cell.position as i64)),
            _ => tree::nth(space, cell.source, cell.position as usize)
                .map_or(Value::NONE, |node| node.value),
        }
    }

    /// Position for lists and tuples, the key for sparse lists. `NONE` once done.
    pub fn current_key(self, space: &SpaceInner) -> Value {
        if self.is_done(space) {
            return Value::NONE;
        }
        let cell = self.cell(space);
        match self.0.tag() {
            Tag::SparseListIterator => tree::nth(space, cell.source, cell.position as usize)
                .map_or(Value::NONE, |node| node.key),
            _ => Value::from_i64(cell.position as i64),
        }
    }

    /// Cursor one element further. A finished cursor is returned as is.
    pub fn advance<A: Allocator>(self, alloc: &mut A) -> Self {
        if self.is_done(alloc.space()) {
            return self;
        }
        let cell = self.cell(alloc.space());
        Self::at(alloc, self.0.tag(), cell.source, cell.position + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SparseList, testing::test_space};

    fn drain<A: Allocator>(alloc: &mut A, mut cursor: CellIterator) -> Vec<(Value, Value)> {
        let mut seen = Vec::new();
        while !cursor.is_done(alloc.space()) {
            let space = alloc.space();
            seen.push((cursor.current_key(space), cursor.current(space)));
            cursor = cursor.advance(alloc);
        }
        seen
    }

    #[test]
    fn walks_lists_and_tuples_by_position() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let values: Vec<Value> = (0..12).map(Value::from_i64).collect();
        let list = List::from_values(&mut ctx, &values);
        let tuple = Tuple::from_values(&mut ctx, &values);

        for source in [list.as_value(), tuple.as_value()] {
            let cursor = CellIterator::new(&mut ctx, source).unwrap();
            let seen = drain(&mut ctx, cursor);
            let expected: Vec<(Value, Value)> = values
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::from_i64(i as i64), *v))
                .collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn sparse_cursors_report_keys() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let sparse = SparseList::new()
            .set_at(&mut ctx, 40, Value::TRUE)
            .set_at(&mut ctx, -2, Value::FALSE);
        let cursor = CellIterator::new(&mut ctx, sparse.as_value()).unwrap();
        assert_eq!(cursor.as_value().tag(), Tag::SparseListIterator);
        assert_eq!(
            drain(&mut ctx, cursor),
            vec![
                (Value::from_i64(-2), Value::FALSE),
                (Value::from_i64(40), Value::TRUE)
            ]
        );
    }

    #[test]
    fn finished_and_unsupported_cursors() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        assert!(CellIterator::new(&mut ctx, Value::from_i64(3)).is_none());

        let cursor = CellIterator::new(&mut ctx, List::new().as_value()).unwrap();
        assert!(cursor.is_done(&ctx));
        assert_eq!(cursor.current(&ctx), Value::NONE);
        assert_eq!(cursor.current_key(&ctx), Value::NONE);
        assert_eq!(cursor.advance(&mut ctx), cursor);
    }
}
