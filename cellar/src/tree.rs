//! Persistent AVL trees shared by every tree-shaped collection.
//!
//! A tree is a [`Value`] carrying the collection's tag: either the empty sentinel of
//! that tag or a reference to a [`TreeNode`]. Children are trees of the same tag, so
//! any subtree is itself a valid collection value. Nodes are never written after
//! construction, every update rebuilds the path to a new root.
use std::{cmp::Ordering, ops::ControlFlow};

use crate::{Allocator, CellData, SpaceInner, Tag, Value, Visitable, Visitor};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeNode {
    pub previous: Value,
    pub next: Value,
    pub key: Value,
    pub value: Value,
    /// payloads in this subtree
    pub count: u32,
    pub height: u32,
}

impl Visitable for TreeNode {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit(self.previous);
        visitor.visit(self.key);
        visitor.visit(self.value);
        visitor.visit(self.next);
    }
}

/// Node behind a non-empty tree, `None` for the empty sentinel.
#[inline]
pub fn node(space: &SpaceInner, tree: Value) -> Option<TreeNode> {
    let cell = tree.cell()?;
    match space.cell(cell) {
        CellData::Node(node) => Some(*node),
        other => panic!("{:?} points at a {} instead of a tree node", tree.tag(), other.kind_name()),
    }
}

#[inline]
pub fn count(space: &SpaceInner, tree: Value) -> usize {
    node(space, tree).map_or(0, |node| node.count as usize)
}

#[inline]
pub fn height(space: &SpaceInner, tree: Value) -> u32 {
    node(space, tree).map_or(0, |node| node.height)
}

/// Allocates a node over two subtrees that already satisfy the balance invariant
/// relative to each other.
pub fn make<A: Allocator>(
    alloc: &mut A,
    tag: Tag,
    previous: Value,
    key: Value,
    value: Value,
    next: Value,
) -> Value {
    let space = alloc.space();
    let (left, right) = (node(space, previous), node(space, next));
    let count = 1 + left.map_or(0, |n| n.count) + right.map_or(0, |n| n.count);
    let height = 1 + left.map_or(0, |n| n.height).max(right.map_or(0, |n| n.height));
    alloc.allocate_value(
        tag,
        CellData::Node(TreeNode {
            previous,
            next,
            key,
            value,
            count,
            height,
        }),
    )
}

/// Builds a node over subtrees whose heights differ by at most two, rotating as needed.
/// Rotations allocate new nodes, the rotated inputs stay valid for older roots.
pub fn balance<A: Allocator>(
    alloc: &mut A,
    tag: Tag,
    previous: Value,
    key: Value,
    value: Value,
    next: Value,
) -> Value {
    let space = alloc.space();
    let left_height = height(space, previous);
    let right_height = height(space, next);

    if left_height > right_height + 1 {
        let Some(left) = node(space, previous) else {
            unreachable!("taller subtree is never empty")
        };
        if height(space, left.previous) >= height(space, left.next) {
            // left-left: single right rotation
            let right = make(alloc, tag, left.next, key, value, next);
            make(alloc, tag, left.previous, left.key, left.value, right)
        } else {
            // left-right: double rotation through the inner grandchild
            let Some(inner) = node(space, left.next) else {
                unreachable!("taller subtree is never empty")
            };
            let new_left = make(alloc, tag, left.previous, left.key, left.value, inner.previous);
            let new_right = make(alloc, tag, inner.next, key, value, next);
            make(alloc, tag, new_left, inner.key, inner.value, new_right)
        }
    } else if right_height > left_height + 1 {
        let Some(right) = node(space, next) else {
            unreachable!("taller subtree is never empty")
        };
        if height(space, right.next) >= height(space, right.previous) {
            // right-right: single left rotation
            let left = make(alloc, tag, previous, key, value, right.previous);
            make(alloc, tag, left, right.key, right.value, right.next)
        } else {
            // right-left
            let Some(inner) = node(space, right.previous) else {
                unreachable!("taller subtree is never empty")
            };
            let new_left = make(alloc, tag, previous, key, value, inner.previous);
            let new_right = make(alloc, tag, inner.next, right.key, right.value, right.next);
            make(alloc, tag, new_left, inner.key, inner.value, new_right)
        }
    } else {
        make(alloc, tag, previous, key, value, next)
    }
}

// ── Keyed access ──

/// Orders nodes by the raw word of their key, the identity order of sets and dicts.
pub fn by_identity(key: Value) -> impl Fn(&SpaceInner, &TreeNode) -> Ordering {
    move |_, node| key.raw().cmp(&node.key.raw())
}

/// Finds the node `order` reports as equal. `order` compares the search key against a node.
pub fn find(
    space: &SpaceInner,
    mut tree: Value,
    order: impl Fn(&SpaceInner, &TreeNode) -> Ordering,
) -> Option<TreeNode> {
    while let Some(current) = node(space, tree) {
        match order(space, &current) {
            Ordering::Less => tree = current.previous,
            Ordering::Greater => tree = current.next,
            Ordering::Equal => return Some(current),
        }
    }
    None
}

/// Inserts or replaces the payload `order` reports as equal. Replacing a payload with
/// identical words returns `tree` itself.
pub fn insert<A: Allocator>(
    alloc: &mut A,
    tree: Value,
    key: Value,
    value: Value,
    order: &impl Fn(&SpaceInner, &TreeNode) -> Ordering,
) -> Value {
    let tag = tree.tag();
    let Some(current) = node(alloc.space(), tree) else {
        let empty = Value::empty(tag);
        return make(alloc, tag, empty, key, value, empty);
    };
    match order(alloc.space(), &current) {
        Ordering::Less => {
            let previous = insert(alloc, current.previous, key, value, order);
            if previous == current.previous {
                return tree;
            }
            balance(alloc, tag, previous, current.key, current.value, current.next)
        }
        Ordering::Greater => {
            let next = insert(alloc, current.next, key, value, order);
            if next == current.next {
                return tree;
            }
            balance(alloc, tag, current.previous, current.key, current.value, next)
        }
        Ordering::Equal => {
            if current.key == key && current.value == value {
                return tree;
            }
            make(alloc, tag, current.previous, key, value, current.next)
        }
    }
}

/// Removes the payload `order` reports as equal, `tree` itself if there is none.
pub fn remove<A: Allocator>(
    alloc: &mut A,
    tree: Value,
    order: &impl Fn(&SpaceInner, &TreeNode) -> Ordering,
) -> Value {
    let tag = tree.tag();
    let Some(current) = node(alloc.space(), tree) else {
        return tree;
    };
    match order(alloc.space(), &current) {
        Ordering::Less => {
            let previous = remove(alloc, current.previous, order);
            if previous == current.previous {
                return tree;
            }
            balance(alloc, tag, previous, current.key, current.value, current.next)
        }
        Ordering::Greater => {
            let next = remove(alloc, current.next, order);
            if next == current.next {
                return tree;
            }
            balance(alloc, tag, current.previous, current.key, current.value, next)
        }
        Ordering::Equal => merge(alloc, tag, current.previous, current.next),
    }
}

/// Joins the two children of a removed node, promoting the in-order successor.
fn merge<A: Allocator>(alloc: &mut A, tag: Tag, previous: Value, next: Value) -> Value {
    if node(alloc.space(), previous).is_none() {
        return next;
    }
    if node(alloc.space(), next).is_none() {
        return previous;
    }
    let (successor, rest) = remove_first(alloc, next);
    balance(alloc, tag, previous, successor.key, successor.value, rest)
}

/// Splits off the leftmost node. `tree` must not be empty.
pub fn remove_first<A: Allocator>(alloc: &mut A, tree: Value) -> (TreeNode, Value) {
    let tag = tree.tag();
    let Some(current) = node(alloc.space(), tree) else {
        unreachable!("remove_first on an empty tree")
    };
    if node(alloc.space(), current.previous).is_none() {
        return (current, current.next);
    }
    let (first, previous) = remove_first(alloc, current.previous);
    let rest = balance(alloc, tag, previous, current.key, current.value, current.next);
    (first, rest)
}

// ── Positional access ──

/// Node at in-order position `index`.
pub fn nth(space: &SpaceInner, mut tree: Value, mut index: usize) -> Option<TreeNode> {
    while let Some(current) = node(space, tree) {
        let left = count(space, current.previous);
        match index.cmp(&left) {
            Ordering::Less => tree = current.previous,
            Ordering::Equal => return Some(current),
            Ordering::Greater => {
                index -= left + 1;
                tree = current.next;
            }
        }
    }
    None
}

/// Inserts a payload so that it ends up at position `index` (`index <= count`).
pub fn insert_nth<A: Allocator>(
    alloc: &mut A,
    tree: Value,
    index: usize,
    key: Value,
    value: Value,
) -> Value {
    let tag = tree.tag();
    let Some(current) = node(alloc.space(), tree) else {
        let empty = Value::empty(tag);
        return make(alloc, tag, empty, key, value, empty);
    };
    let left = count(alloc.space(), current.previous);
    if index <= left {
        let previous = insert_nth(alloc, current.previous, index, key, value);
        balance(alloc, tag, previous, current.key, current.value, current.next)
    } else {
        let next = insert_nth(alloc, current.next, index - left - 1, key, value);
        balance(alloc, tag, current.previous, current.key, current.value, next)
    }
}

/// Replaces the payload at position `index` (`index < count`).
pub fn replace_nth<A: Allocator>(
    alloc: &mut A,
    tree: Value,
    index: usize,
    key: Value,
    value: Value,
) -> Value {
    let tag = tree.tag();
    let Some(current) = node(alloc.space(), tree) else {
        return tree;
    };
    let left = count(alloc.space(), current.previous);
    match index.cmp(&left) {
        Ordering::Less => {
            let previous = replace_nth(alloc, current.previous, index, key, value);
            if previous == current.previous {
                return tree;
            }
            make(alloc, tag, previous, current.key, current.value, current.next)
        }
        Ordering::Equal => {
            if current.key == key && current.value == value {
                return tree;
            }
            make(alloc, tag, current.previous, key, value, current.next)
        }
        Ordering::Greater => {
            let next = replace_nth(alloc, current.next, index - left - 1, key, value);
            if next == current.next {
                return tree;
            }
            make(alloc, tag, current.previous, current.key, current.value, next)
        }
    }
}

/// Removes the payload at position `index` (`index < count`).
pub fn remove_nth<A: Allocator>(alloc: &mut A, tree: Value, index: usize) -> Value {
    let tag = tree.tag();
    let Some(current) = node(alloc.space(), tree) else {
        return tree;
    };
    let left = count(alloc.space(), current.previous);
    match index.cmp(&left) {
        Ordering::Less => {
            let previous = remove_nth(alloc, current.previous, index);
            balance(alloc, tag, previous, current.key, current.value, current.next)
        }
        Ordering::Equal => merge(alloc, tag, current.previous, current.next),
        Ordering::Greater => {
            let next = remove_nth(alloc, current.next, index - left - 1);
            balance(alloc, tag, current.previous, current.key, current.value, next)
        }
    }
}

// ── Bulk ──

/// Perfectly balanced tree over `entries` in the given order.
pub fn build<A: Allocator>(alloc: &mut A, tag: Tag, entries: &[(Value, Value)]) -> Value {
    if entries.is_empty() {
        return Value::empty(tag);
    }
    let middle = entries.len() / 2;
    let previous = build(alloc, tag, &entries[..middle]);
    let next = build(alloc, tag, &entries[middle + 1..]);
    let (key, value) = entries[middle];
    make(alloc, tag, previous, key, value, next)
}

/// In-order traversal, stops early when `visit` breaks.
pub fn try_for_each<B>(
    space: &SpaceInner,
    tree: Value,
    visit: &mut impl FnMut(&TreeNode) -> ControlFlow<B>,
) -> ControlFlow<B> {
    if let Some(current) = node(space, tree) {
        try_for_each(space, current.previous, visit)?;
        visit(&current)?;
        try_for_each(space, current.next, visit)?;
    }
    ControlFlow::Continue(())
}

pub fn for_each(space: &SpaceInner, tree: Value, mut visit: impl FnMut(&TreeNode)) {
    let _ = try_for_each::<()>(space, tree, &mut |node| {
        visit(node);
        ControlFlow::Continue(())
    });
}

/// Checks height, count and balance of every node, returning the payload count.
#[cfg(test)]
pub(crate) fn assert_invariants(space: &SpaceInner, tree: Value) -> usize {
    fn check(space: &SpaceInner, tree: Value) -> (u32, u32) {
        let Some(current) = node(space, tree) else {
            return (0, 0);
        };
        assert_eq!(current.previous.tag(), tree.tag(), "child carries another tag");
        assert_eq!(current.next.tag(), tree.tag(), "child carries another tag");
        let (left_count, left_height) = check(space, current.previous);
        let (right_count, right_height) = check(space, current.next);
        assert!(
            left_height.abs_diff(right_height) <= 1,
            "unbalanced node: {left_height} vs {right_height}"
        );
        assert_eq!(current.height, 1 + left_height.max(right_height));
        assert_eq!(current.count, 1 + left_count + right_count);
        (current.count, current.height)
    }
    check(space, tree).0 as usize
}
