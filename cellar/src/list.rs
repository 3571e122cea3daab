//! Persistent vector. Positions are resolved through subtree counts, node keys are unused.
use std::ops::ControlFlow;

use crate::{Allocator, SpaceInner, Tag, Value, tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct List(Value);

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl List {
    pub const fn new() -> Self {
        Self(Value::empty(Tag::List))
    }

    pub fn from_value(value: Value) -> Option<Self> {
        (value.tag() == Tag::List).then_some(Self(value))
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0
    }

    pub fn from_values<A: Allocator>(alloc: &mut A, values: &[Value]) -> Self {
        let entries: Vec<(Value, Value)> = values.iter().map(|&v| (Value::NONE, v)).collect();
        Self(tree::build(alloc, Tag::List, &entries))
    }

    pub fn size(self, space: &SpaceInner) -> usize {
        tree::count(space, self.0)
    }

    pub fn is_empty(self) -> bool {
        self.0.cell().is_none()
    }

    /// Maps a possibly negative index onto `0..len`.
    fn position(index: i64, len: usize) -> Option<usize> {
        let resolved = if index < 0 { len as i64 + index } else { index };
        (0..len as i64).contains(&resolved).then_some(resolved as usize)
    }

    /// Element at `index`, negative indexes count from the end. `NONE` when out of range.
    pub fn get_at(self, space: &SpaceInner, index: i64) -> Value {
        Self::position(index, self.size(space))
            .and_then(|i| tree::nth(space, self.0, i))
            .map_or(Value::NONE, |node| node.value)
    }

    pub fn has(self, space: &SpaceInner, value: Value) -> bool {
        self.index_of(space, value).is_some()
    }

    /// Position of the first element identical to `value`.
    pub fn index_of(self, space: &SpaceInner, value: Value) -> Option<usize> {
        let mut position = 0;
        match tree::try_for_each(space, self.0, &mut |node| {
            if node.value == value {
                return ControlFlow::Break(position);
            }
            position += 1;
            ControlFlow::Continue(())
        }) {
            ControlFlow::Break(found) => Some(found),
            ControlFlow::Continue(()) => None,
        }
    }

    /// Replaces the element at `index`. Out of range leaves the list unchanged.
    pub fn set_at<A: Allocator>(self, alloc: &mut A, index: i64, value: Value) -> Self {
        match Self::position(index, self.size(alloc.space())) {
            Some(i) => Self(tree::replace_nth(alloc, self.0, i, Value::NONE, value)),
            None => self,
        }
    }

    /// Inserts before `index`, so the new element ends up at `index`. Indexes past
    /// either end are clamped.
    pub fn insert_at<A: Allocator>(self, alloc: &mut A, index: i64, value: Value) -> Self {
        let len = self.size(alloc.space()) as i64;
        let resolved = if index < 0 { len + index } else { index };
        let position = resolved.clamp(0, len) as usize;
        Self(tree::insert_nth(alloc, self.0, position, Value::NONE, value))
    }

    pub fn append<A: Allocator>(self, alloc: &mut A, value: Value) -> Self {
        let len = self.size(alloc.space());
        Self(tree::insert_nth(alloc, self.0, len, Value::NONE, value))
    }

    /// Removes the element at `index`. Out of range leaves the list unchanged.
    pub fn remove_at<A: Allocator>(self, alloc: &mut A, index: i64) -> Self {
        match Self::position(index, self.size(alloc.space())) {
            Some(i) => Self(tree::remove_nth(alloc, self.0, i)),
            None => self,
        }
    }

    /// New balanced list with the elements of `self` followed by those of `other`.
    pub fn concat<A: Allocator>(self, alloc: &mut A, other: List) -> Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }
        let mut values = self.to_vec(alloc.space());
        values.extend(other.to_vec(alloc.space()));
        Self::from_values(alloc, &values)
    }

    /// In-order visit of every element.
    pub fn process_values(self, space: &SpaceInner, mut visit: impl FnMut(Value)) {
        tree::for_each(space, self.0, |node| visit(node.value));
    }

    pub fn to_vec(self, space: &SpaceInner) -> Vec<Value> {
        let mut values = Vec::with_capacity(self.size(space));
        self.process_values(space, |v| values.push(v));
        values
    }
}
