//! Persistent identity set. Elements are kept in the order of their raw words.
use crate::{Allocator, List, SpaceInner, Tag, Value, tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Set(Value);

impl Default for Set {
    fn default() -> Self {
        Self::new()
    }
}

impl Set {
    pub const fn new() -> Self {
        Self(Value::empty(Tag::Set))
    }

    pub fn from_value(value: Value) -> Option<Self> {
        (value.tag() == Tag::Set).then_some(Self(value))
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0
    }

    pub fn size(self, space: &SpaceInner) -> usize {
        tree::count(space, self.0)
    }

    pub fn is_empty(self) -> bool {
        self.0.cell().is_none()
    }

    pub fn has(self, space: &SpaceInner, element: Value) -> bool {
        tree::find(space, self.0, tree::by_identity(element)).is_some()
    }

    /// Adding an element that is already present returns the same set.
    pub fn add<A: Allocator>(self, alloc: &mut A, element: Value) -> Self {
        Self(tree::insert(
            alloc,
            self.0,
            element,
            Value::NONE,
            &tree::by_identity(element),
        ))
    }

    pub fn remove<A: Allocator>(self, alloc: &mut A, element: Value) -> Self {
        Self(tree::remove(alloc, self.0, &tree::by_identity(element)))
    }

    pub fn process_elements(self, space: &SpaceInner, mut visit: impl FnMut(Value)) {
        tree::for_each(space, self.0, |node| visit(node.key));
    }

    /// Elements in identity order.
    pub fn elements(self, space: &SpaceInner) -> Vec<Value> {
        let mut elements = Vec::with_capacity(self.size(space));
        self.process_elements(space, |e| elements.push(e));
        elements
    }

    pub fn to_list<A: Allocator>(self, alloc: &mut A) -> List {
        let elements = self.elements(alloc.space());
        List::from_values(alloc, &elements)
    }

    /// Builds a set from elements already sorted and deduplicated.
    fn from_sorted<A: Allocator>(alloc: &mut A, elements: &[Value]) -> Self {
        let entries: Vec<(Value, Value)> = elements.iter().map(|&e| (e, Value::NONE)).collect();
        Self(tree::build(alloc, Tag::Set, &entries))
    }

    pub fn union<A: Allocator>(self, alloc: &mut A, other: Set) -> Self {
        let (mut larger, smaller) = if self.size(alloc.space()) >= other.size(alloc.space()) {
            (self, other)
        } else {
            (other, self)
        };
        for element in smaller.elements(alloc.space()) {
            larger = larger.add(alloc, element);
        }
        larger
    }

    pub fn intersection<A: Allocator>(self, alloc: &mut A, other: Set) -> Self {
        let space = alloc.space();
        let (smaller, larger) = if self.size(space) <= other.size(space) {
            (self, other)
        } else {
            (other, self)
        };
        let kept: Vec<Value> = smaller
            .elements(space)
            .into_iter()
            .filter(|&e| larger.has(space, e))
            .collect();
        if kept.len() == smaller.size(space) {
            return smaller;
        }
        Self::from_sorted(alloc, &kept)
    }

    /// Elements of `self` that are not in `other`.
    pub fn difference<A: Allocator>(self, alloc: &mut A, other: Set) -> Self {
        let space = alloc.space();
        let kept: Vec<Value> = self
            .elements(space)
            .into_iter()
            .filter(|&e| !other.has(space, e))
            .collect();
        if kept.len() == self.size(space) {
            return self;
        }
        Self::from_sorted(alloc, &kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_space;
    use std::collections::BTreeSet;

    fn set_of<A: Allocator>(alloc: &mut A, values: impl IntoIterator<Item = i64>) -> Set {
        let mut set = Set::new();
        for v in values {
            set = set.add(alloc, Value::from_i64(v));
        }
        set
    }

    fn as_ints(space: &SpaceInner, set: Set) -> BTreeSet<i64> {
        set.elements(space)
            .into_iter()
            .map(|v| v.as_i64().unwrap())
            .collect()
    }

    #[test]
    fn add_has_remove() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let set = set_of(&mut ctx, [3, 1, 4, 1, 5, 9, 2, 6]);
        assert_eq!(set.size(&ctx), 7);
        assert!(set.has(&ctx, Value::from_i64(9)));
        assert!(!set.has(&ctx, Value::from_i64(7)));
        assert_eq!(set.add(&mut ctx, Value::from_i64(4)), set);

        let smaller = set.remove(&mut ctx, Value::from_i64(4));
        assert!(!smaller.has(&ctx, Value::from_i64(4)));
        assert!(set.has(&ctx, Value::from_i64(4)));
        assert_eq!(tree::assert_invariants(&ctx, smaller.as_value()), 6);
    }

    #[test]
    fn references_are_compared_by_identity() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let a = List::new().append(&mut ctx, Value::from_i64(1));
        let b = List::new().append(&mut ctx, Value::from_i64(1));
        let set = Set::new()
            .add(&mut ctx, a.as_value())
            .add(&mut ctx, b.as_value());
        assert_eq!(set.size(&ctx), 2);
        assert!(set.has(&ctx, a.as_value()));
    }

    #[test]
    fn set_algebra() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let evens = set_of(&mut ctx, (0..40).step_by(2));
        let thirds = set_of(&mut ctx, (0..40).step_by(3));

        let union = evens.union(&mut ctx, thirds);
        let both = evens.intersection(&mut ctx, thirds);
        let only_evens = evens.difference(&mut ctx, thirds);

        let e: BTreeSet<i64> = (0..40).step_by(2).collect();
        let t: BTreeSet<i64> = (0..40).step_by(3).collect();
        assert_eq!(as_ints(&ctx, union), &e | &t);
        assert_eq!(as_ints(&ctx, both), &e & &t);
        assert_eq!(as_ints(&ctx, only_evens), &e - &t);
        for set in [union, both, only_evens] {
            tree::assert_invariants(&ctx, set.as_value());
        }
        assert_eq!(evens.difference(&mut ctx, Set::new()), evens);
        assert!(evens.intersection(&mut ctx, Set::new()).is_empty());
    }

    #[test]
    fn to_list_follows_identity_order() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let set = set_of(&mut ctx, [30, 10, 20]);
        let list = set.to_list(&mut ctx);
        assert_eq!(list.to_vec(&ctx), set.elements(&ctx));
        assert_eq!(list.size(&ctx), 3);
    }
}
