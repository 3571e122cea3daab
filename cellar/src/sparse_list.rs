//! Persistent map from i64 keys to values, ordered by key.
use std::cmp::Ordering;

use crate::{
    Allocator, List, SpaceInner, Tag, TreeNode, Value,
    tagged::{SMALL_INT_MAX, SMALL_INT_MIN},
    tree,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseList(Value);

impl Default for SparseList {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn key_of(node: &TreeNode) -> i64 {
    node.key.as_i64().unwrap_or_default()
}

fn by_key(key: i64) -> impl Fn(&SpaceInner, &TreeNode) -> Ordering {
    move |_, node| key.cmp(&key_of(node))
}

impl SparseList {
    pub const fn new() -> Self {
        Self(Value::empty(Tag::SparseList))
    }

    pub fn from_value(value: Value) -> Option<Self> {
        (value.tag() == Tag::SparseList).then_some(Self(value))
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

    /// Value stored under `key`, `NONE` when absent.
    pub fn get_at(self, space: &SpaceInner, key: i64) -> Value {
        if !Self::holds_key(key) {
            return Value::NONE;
        }
        tree::find(space, self.0, by_key(key)).map_or(Value::NONE, |node| node.value)
    }

    pub fn has(self, space: &SpaceInner, key: i64) -> bool {
        Self::holds_key(key) && tree::find(space, self.0, by_key(key)).is_some()
    }

    /// Keys are stored as small integers, anything wider can never be present.
    #[inline]
    pub fn holds_key(key: i64) -> bool {
        (SMALL_INT_MIN..=SMALL_INT_MAX).contains(&key)
    }

    /// Returns the list unchanged when `key` does not fit a small integer.
    pub fn set_at<A: Allocator>(self, alloc: &mut A, key: i64, value: Value) -> Self {
        let Some(stored) = Value::try_from_i64(key) else {
            return self;
        };
        Self(tree::insert(alloc, self.0, stored, value, &by_key(key)))
    }

    pub fn remove_at<A: Allocator>(self, alloc: &mut A, key: i64) -> Self {
        if !Self::holds_key(key) {
            return self;
        }
        Self(tree::remove(alloc, self.0, &by_key(key)))
    }

    pub fn process_values(self, space: &SpaceInner, mut visit: impl FnMut(i64, Value)) {
        tree::for_each(space, self.0, |node| visit(key_of(node), node.value));
    }

    pub fn keys(self, space: &SpaceInner) -> Vec<i64> {
        let mut keys = Vec::with_capacity(self.size(space));
        self.process_values(space, |key, _| keys.push(key));
        keys
    }

    pub fn values(self, space: &SpaceInner) -> Vec<Value> {
        let mut values = Vec::with_capacity(self.size(space));
        self.process_values(space, |_, value| values.push(value));
        values
    }

    pub fn entries(self, space: &SpaceInner) -> Vec<(i64, Value)> {
        let mut entries = Vec::with_capacity(self.size(space));
        self.process_values(space, |key, value| entries.push((key, value)));
        entries
    }

    /// Values in key order.
    pub fn to_list<A: Allocator>(self, alloc: &mut A) -> List {
        let values = self.values(alloc.space());
        List::from_values(alloc, &values)
    }
}
