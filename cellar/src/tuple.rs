//! Immutable tuples and their interning table.
//!
//! Up to five elements live in a single leaf cell. Longer tuples are a tree of
//! indirect cells of fan-out five over full leaves, filled left to right, so every
//! child but the last of an indirect cell is full. Tuples built through
//! [`Tuple::from_values`] are interned: equal contents yield the identical value.
use std::{cmp::Ordering, sync::atomic::Ordering as AtomicOrdering};

use crate::{
    Allocator, CellData, List, SpaceInner, Tag, TreeNode, Value, Visitable, Visitor, mix, tree,
};

pub const TUPLE_WIDTH: usize = 5;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleLeaf {
    pub len: u8,
    pub items: [Value; TUPLE_WIDTH],
}

impl Visitable for TupleLeaf {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        for item in &self.items[..self.len as usize] {
            visitor.visit(*item);
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleIndirect {
    /// elements below this cell
    pub count: u32,
    /// 1 for a cell over leaves
    pub depth: u16,
    pub width: u16,
    pub children: [Value; TUPLE_WIDTH],
}

impl Visitable for TupleIndirect {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        for child in &self.children[..self.width as usize] {
            visitor.visit(*child);
        }
    }
}

/// Elements a child of an indirect cell at `depth` holds when full.
fn child_capacity(depth: u16) -> usize {
    TUPLE_WIDTH.pow(depth as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuple(Value);

impl Tuple {
    pub const fn empty() -> Self {
        Self(Value::empty(Tag::Tuple))
    }

    pub fn from_value(value: Value) -> Option<Self> {
        (value.tag() == Tag::Tuple).then_some(Self(value))
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0.cell().is_none()
    }

    /// Interned tuple holding `values`.
    pub fn from_values<A: Allocator>(alloc: &mut A, values: &[Value]) -> Self {
        if values.is_empty() {
            return Self::empty();
        }
        let candidate = Self::build(alloc, values);
        Self::intern(alloc, candidate)
    }

    /// Returns the interned tuple equal to `candidate`, installing `candidate` if there
    /// is none. The candidate and each loaded table root stay pinned while the table
    /// is searched and extended.
    fn intern<A: Allocator>(alloc: &mut A, candidate: Tuple) -> Tuple {
        let candidate_slot = alloc.pin(candidate.as_value());
        let root_slot = alloc.pin(Value::NONE);
        let interned = loop {
            let current = alloc.space().tuple_table();
            alloc.repin(root_slot, current.as_value());
            if let Some(existing) = current.find(alloc.space(), candidate) {
                break existing;
            }
            let updated = current.insert(alloc, candidate);
            let swapped = alloc.space().tuple_root.compare_exchange(
                current.as_value().raw(),
                updated.as_value().raw(),
                AtomicOrdering::AcqRel,
                AtomicOrdering::Acquire,
            );
            if swapped.is_ok() {
                break candidate;
            }
        };
        alloc.unpin(candidate_slot);
        interned
    }

    pub fn from_list<A: Allocator>(alloc: &mut A, list: List) -> Self {
        let values = list.to_vec(alloc.space());
        Self::from_values(alloc, &values)
    }

    /// Builds a tuple without interning it.
    pub fn build<A: Allocator>(alloc: &mut A, values: &[Value]) -> Self {
        if values.is_empty() {
            return Self::empty();
        }
        let mut level: Vec<Value> = values
            .chunks(TUPLE_WIDTH)
            .map(|chunk| {
                let mut items = [Value::NONE; TUPLE_WIDTH];
                items[..chunk.len()].copy_from_slice(chunk);
                let leaf = TupleLeaf {
                    len: chunk.len() as u8,
                    items,
                };
                alloc.allocate_value(Tag::Internal, CellData::TupleLeaf(leaf))
            })
            .collect();

        let mut depth = 0u16;
        let mut remaining = values.len();
        while level.len() > 1 {
            depth += 1;
            let full = child_capacity(depth + 1);
            level = level
                .chunks(TUPLE_WIDTH)
                .map(|chunk| {
                    let count = remaining.min(full);
                    remaining -= count;
                    let mut children = [Value::NONE; TUPLE_WIDTH];
                    children[..chunk.len()].copy_from_slice(chunk);
                    let indirect = TupleIndirect {
                        count: count as u32,
                        depth,
                        width: chunk.len() as u16,
                        children,
                    };
                    alloc.allocate_value(Tag::Internal, CellData::TupleIndirect(indirect))
                })
                .collect();
            remaining = values.len();
        }
        Self(level[0].with_tag(Tag::Tuple))
    }

    pub fn size(self, space: &SpaceInner) -> usize {
        let Some(cell) = self.0.cell() else {
            return 0;
        };
        match space.cell(cell) {
            CellData::TupleLeaf(leaf) => leaf.len as usize,
            CellData::TupleIndirect(indirect) => indirect.count as usize,
            other => panic!("tuple points at a {}", other.kind_name()),
        }
    }

    /// Indirect levels above the leaves.
    pub fn depth(self, space: &SpaceInner) -> u16 {
        match self.0.cell().map(|cell| space.cell(cell)) {
            Some(CellData::TupleIndirect(indirect)) => indirect.depth,
            _ => 0,
        }
    }

    /// Element at `index`, negative indexes count from the end. `NONE` when out of range.
    pub fn get_at(self, space: &SpaceInner, index: i64) -> Value {
        let len = self.size(space) as i64;
        let index = if index < 0 { len + index } else { index };
        if !(0..len).contains(&index) {
            return Value::NONE;
        }
        let mut index = index as usize;
        let mut current = self.0;
        loop {
            let Some(cell) = current.cell() else {
                return Value::NONE;
            };
            match space.cell(cell) {
                CellData::TupleLeaf(leaf) => return leaf.items[index],
                CellData::TupleIndirect(indirect) => {
                    let capacity = child_capacity(indirect.depth);
                    current = indirect.children[index / capacity];
                    index %= capacity;
                }
                other => panic!("tuple points at a {}", other.kind_name()),
            }
        }
    }

    pub fn process_values(self, space: &SpaceInner, mut visit: impl FnMut(Value)) {
        fn walk(space: &SpaceInner, value: Value, visit: &mut impl FnMut(Value)) {
            let Some(cell) = value.cell() else {
                return;
            };
            match space.cell(cell) {
                CellData::TupleLeaf(leaf) => leaf.items[..leaf.len as usize]
                    .iter()
                    .for_each(|item| visit(*item)),
                CellData::TupleIndirect(indirect) => {
                    for child in &indirect.children[..indirect.width as usize] {
                        walk(space, *child, visit);
                    }
                }
                other => panic!("tuple points at a {}", other.kind_name()),
            }
        }
        walk(space, self.0, &mut visit);
    }

    pub fn to_vec(self, space: &SpaceInner) -> Vec<Value> {
        let mut values = Vec::with_capacity(self.size(space));
        self.process_values(space, |v| values.push(v));
        values
    }

    pub fn to_list<A: Allocator>(self, alloc: &mut A) -> List {
        let values = self.to_vec(alloc.space());
        List::from_values(alloc, &values)
    }

    /// Hash over the length and the identity of every element.
    pub fn structural_hash(self, space: &SpaceInner) -> u64 {
        let mut hash = mix(self.size(space) as u64);
        self.process_values(space, |v| hash = mix(hash ^ v.identity_hash()));
        hash
    }

    /// Orders by length, then element identities.
    fn compare_contents(self, space: &SpaceInner, other: Tuple) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        let mine = self.to_vec(space);
        let theirs = other.to_vec(space);
        mine.len().cmp(&theirs.len()).then_with(|| {
            mine.iter()
                .map(|v| v.raw())
                .cmp(theirs.iter().map(|v| v.raw()))
        })
    }
}

/// Interning table: a tree keyed by structural hash, ties broken by contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleDictionary(Value);

impl Default for TupleDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl TupleDictionary {
    pub const fn new() -> Self {
        Self(Value::empty(Tag::TupleDictionary))
    }

    pub fn from_value(value: Value) -> Option<Self> {
        (value.tag() == Tag::TupleDictionary).then_some(Self(value))
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0
    }

    pub fn size(self, space: &SpaceInner) -> usize {
        tree::count(space, self.0)
    }

    /// Hash as stored in node keys, small enough to embed.
    fn hash_key(space: &SpaceInner, tuple: Tuple) -> i64 {
        (tuple.structural_hash(space) >> 9) as i64
    }

    fn ordering(hash: i64, tuple: Tuple) -> impl Fn(&SpaceInner, &TreeNode) -> Ordering {
        move |space, node| {
            hash.cmp(&node.key.as_i64().unwrap_or_default())
                .then_with(|| tuple.compare_contents(space, Tuple(node.value)))
        }
    }

    /// Interned tuple with the same contents as `tuple`.
    pub fn find(self, space: &SpaceInner, tuple: Tuple) -> Option<Tuple> {
        let hash = Self::hash_key(space, tuple);
        tree::find(space, self.0, Self::ordering(hash, tuple)).map(|node| Tuple(node.value))
    }

    pub fn insert<A: Allocator>(self, alloc: &mut A, tuple: Tuple) -> Self {
        let hash = Self::hash_key(alloc.space(), tuple);
        Self(tree::insert(
            alloc,
            self.0,
            Value::from_i64(hash),
            tuple.as_value(),
            &Self::ordering(hash, tuple),
        ))
    }

    pub fn tuples(self, space: &SpaceInner) -> Vec<Tuple> {
        let mut tuples = Vec::with_capacity(self.size(space));
        tree::for_each(space, self.0, |node| tuples.push(Tuple(node.value)));
        tuples
    }
}

impl SpaceInner {
    pub fn tuple_table(&self) -> TupleDictionary {
        TupleDictionary(Value::from_raw(self.tuple_root.load(AtomicOrdering::Acquire)))
    }

    pub fn interned_tuples(&self) -> usize {
        self.tuple_table().size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_space;
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    fn ints(range: std::ops::Range<i64>) -> Vec<Value> {
        range.map(Value::from_i64).collect()
    }

    #[test]
    fn equal_lists_intern_to_the_same_tuple() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let first = List::from_values(&mut ctx, &ints(0..6));
        let second = List::new();
        let second = (0..6).fold(second, |list, i| list.append(&mut ctx, Value::from_i64(i)));
        assert_ne!(first, second);

        let a = Tuple::from_list(&mut ctx, first);
        let b = Tuple::from_list(&mut ctx, second);
        assert_eq!(a, b);
        assert_eq!(a.depth(&ctx), 1);
        assert_eq!(a.size(&ctx), 6);
        assert_eq!(a.get_at(&ctx, 5), Value::from_i64(5));
        assert_eq!(a.get_at(&ctx, -6), Value::from_i64(0));
        assert_eq!(a.get_at(&ctx, 6), Value::NONE);
        assert_eq!(ctx.interned_tuples(), 1);
    }

    #[test]
    fn different_contents_stay_distinct() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let a = Tuple::from_values(&mut ctx, &ints(0..6));
        let mut changed = ints(0..6);
        changed[3] = Value::from_i64(-3);
        let b = Tuple::from_values(&mut ctx, &changed);
        let shorter = Tuple::from_values(&mut ctx, &ints(0..5));

        assert_ne!(a, b);
        assert_ne!(a, shorter);
        assert_eq!(shorter.depth(&ctx), 0);
        assert_eq!(ctx.interned_tuples(), 3);
        assert_eq!(Tuple::from_values(&mut ctx, &[]), Tuple::empty());
    }

    #[test]
    fn deep_tuples_index_through_every_level() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let values = ints(0..200);
        let tuple = Tuple::build(&mut ctx, &values);
        assert_eq!(tuple.size(&ctx), 200);
        assert_eq!(tuple.depth(&ctx), 3);
        for (i, value) in values.iter().enumerate() {
            assert_eq!(tuple.get_at(&ctx, i as i64), *value);
        }
        assert_eq!(tuple.to_vec(&ctx), values);
        assert_eq!(tuple.to_list(&mut ctx).to_vec(&ctx), values);

        let rebuilt = Tuple::build(&mut ctx, &values);
        assert_ne!(rebuilt, tuple);
        assert_eq!(rebuilt.structural_hash(&ctx), tuple.structural_hash(&ctx));
    }

    #[test]
    fn concurrent_interning_agrees_on_one_tuple() {
        let space = test_space(false);
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mut thread = space.register_thread();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut ctx = thread.enter();
                    barrier.wait();
                    (0..50)
                        .map(|n| {
                            Tuple::from_values(&mut ctx, &ints(n..n + 7))
                                .as_value()
                                .raw()
                        })
                        .collect::<Vec<u64>>()
                })
            })
            .collect();
        let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for other in &results[1..] {
            assert_eq!(other, &results[0]);
        }
        assert_eq!(space.interned_tuples(), 50);
    }
}
