//! Cells of the object model that sit on top of the collections: prototype objects,
//! methods, external pointers and thread objects.
use std::sync::atomic::Ordering;

use crate::{
    Allocator, CellData, Context, IdentityDict, SpaceInner, Tag, Value, Visitable, Visitor,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectCell {
    pub id: u64,
    /// newest parent link, `NONE` without parents
    pub parents: Value,
    pub attributes: Value,
}

impl Visitable for ObjectCell {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit(self.parents);
        visitor.visit(self.attributes);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    pub previous: Value,
    pub object: Value,
}

impl Visitable for ParentLink {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit(self.previous);
        visitor.visit(self.object);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodCell {
    pub selector: Value,
    pub body: Value,
    pub arity: u32,
}

impl Visitable for MethodCell {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit(self.selector);
        visitor.visit(self.body);
    }
}

// opaque to the collector
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalCell {
    pub address: usize,
    pub kind: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadCell {
    pub thread_id: u64,
}

fn read_cell(space: &SpaceInner, value: Value) -> &CellData {
    match value.cell() {
        Some(cell) => space.cell(cell),
        None => panic!("{value:?} is not a cell reference"),
    }
}

// ── Objects ──

/// Immutable prototype object. "Changing" an object yields a new cell with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Object(Value);

impl Object {
    pub fn from_value(value: Value) -> Option<Self> {
        (value.tag() == Tag::Object && value.cell().is_some()).then_some(Self(value))
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0
    }

    /// Fresh object with its own id, no parents and no attributes.
    pub fn new<A: Allocator>(alloc: &mut A) -> Self {
        let id = alloc.space().next_object_id.fetch_add(1, Ordering::Relaxed);
        Self::from_parts(alloc, id, Value::NONE, IdentityDict::new())
    }

    fn from_parts<A: Allocator>(
        alloc: &mut A,
        id: u64,
        parents: Value,
        attributes: IdentityDict,
    ) -> Self {
        let cell = ObjectCell {
            id,
            parents,
            attributes: attributes.as_value(),
        };
        Self(alloc.allocate_value(Tag::Object, CellData::Object(cell)))
    }

    fn cell(self, space: &SpaceInner) -> ObjectCell {
        match read_cell(space, self.0) {
            CellData::Object(object) => *object,
            other => panic!("object points at a {}", other.kind_name()),
        }
    }

    pub fn id(self, space: &SpaceInner) -> u64 {
        self.cell(space).id
    }

    pub fn attributes(self, space: &SpaceInner) -> IdentityDict {
        IdentityDict::from_value(self.cell(space).attributes).unwrap_or_default()
    }

    /// Parents in the order they were added.
    pub fn parents(self, space: &SpaceInner) -> Vec<Object> {
        let mut parents = Vec::new();
        let mut link = self.cell(space).parents;
        while link.cell().is_some() {
            let CellData::ParentLink(current) = read_cell(space, link) else {
                panic!("parent chain of {:?} is broken", self.0);
            };
            parents.push(Object(current.object));
            link = current.previous;
        }
        parents.reverse();
        parents
    }

    pub fn get_own(self, space: &SpaceInner, key: Value) -> Value {
        self.attributes(space).get_at(space, key)
    }

    /// Own attribute, else the first hit in a depth first search of the parents in
    /// the order they were added. `NONE` when nothing defines `key`.
    pub fn lookup(self, space: &SpaceInner, key: Value) -> Value {
        let attributes = self.attributes(space);
        if attributes.has(space, key) {
            return attributes.get_at(space, key);
        }
        // parents are always older than their children, the graph has no cycles
        for parent in self.parents(space) {
            let found = parent.lookup(space, key);
            if !found.is_none() {
                return found;
            }
        }
        Value::NONE
    }

    pub fn with_attribute<A: Allocator>(self, alloc: &mut A, key: Value, value: Value) -> Self {
        let cell = self.cell(alloc.space());
        let attributes = self.attributes(alloc.space()).set_at(alloc, key, value);
        if attributes.as_value() == cell.attributes {
            return self;
        }
        Self::from_parts(alloc, cell.id, cell.parents, attributes)
    }

    pub fn without_attribute<A: Allocator>(self, alloc: &mut A, key: Value) -> Self {
        let cell = self.cell(alloc.space());
        let attributes = self.attributes(alloc.space()).remove_at(alloc, key);
        if attributes.as_value() == cell.attributes {
            return self;
        }
        Self::from_parts(alloc, cell.id, cell.parents, attributes)
    }

    pub fn with_parent<A: Allocator>(self, alloc: &mut A, parent: Object) -> Self {
        let cell = self.cell(alloc.space());
        let link = ParentLink {
            previous: cell.parents,
            object: parent.as_value(),
        };
        let parents = alloc.allocate_value(Tag::Internal, CellData::ParentLink(link));
        let attributes = IdentityDict::from_value(cell.attributes).unwrap_or_default();
        Self::from_parts(alloc, cell.id, parents, attributes)
    }
}

// ── Methods ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Method(Value);

impl Method {
    pub fn new<A: Allocator>(alloc: &mut A, selector: Value, body: Value, arity: u32) -> Self {
        let cell = MethodCell {
            selector,
            body,
            arity,
        };
        Self(alloc.allocate_value(Tag::Method, CellData::Method(cell)))
    }

    pub fn from_value(value: Value) -> Option<Self> {
        (value.tag() == Tag::Method && value.cell().is_some()).then_some(Self(value))
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0
    }

    fn cell(self, space: &SpaceInner) -> MethodCell {
        match read_cell(space, self.0) {
            CellData::Method(method) => *method,
            other => panic!("method points at a {}", other.kind_name()),
        }
    }

    pub fn selector(self, space: &SpaceInner) -> Value {
        self.cell(space).selector
    }

    pub fn body(self, space: &SpaceInner) -> Value {
        self.cell(space).body
    }

    pub fn arity(self, space: &SpaceInner) -> u32 {
        self.cell(space).arity
    }
}

// ── External pointers ──

/// Address owned outside the space. The collector never follows it, the finalizer
/// hook is where the owner learns that the cell went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalPointer(Value);

impl ExternalPointer {
    pub fn new<A: Allocator>(alloc: &mut A, address: usize, kind: u32) -> Self {
        let cell = ExternalCell { address, kind };
        Self(alloc.allocate_value(Tag::ExternalPointer, CellData::External(cell)))
    }

    pub fn from_value(value: Value) -> Option<Self> {
        (value.tag() == Tag::ExternalPointer && value.cell().is_some()).then_some(Self(value))
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0
    }

    fn cell(self, space: &SpaceInner) -> ExternalCell {
        match read_cell(space, self.0) {
            CellData::External(external) => *external,
            other => panic!("external pointer points at a {}", other.kind_name()),
        }
    }

    pub fn address(self, space: &SpaceInner) -> usize {
        self.cell(space).address
    }

    pub fn kind(self, space: &SpaceInner) -> u32 {
        self.cell(space).kind
    }
}

// ── Thread objects ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadObject(Value);

impl ThreadObject {
    pub fn new<A: Allocator>(alloc: &mut A, thread_id: u64) -> Self {
        let cell = ThreadCell { thread_id };
        Self(alloc.allocate_value(Tag::Internal, CellData::Thread(cell)))
    }

    /// Object for the thread running `ctx`.
    pub fn current(ctx: &mut Context<'_>) -> Self {
        let id = ctx.thread_id();
        Self::new(ctx, id)
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0
    }

    pub fn thread_id(self, space: &SpaceInner) -> u64 {
        match read_cell(space, self.0) {
            CellData::Thread(thread) => thread.thread_id,
            other => panic!("thread object points at a {}", other.kind_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VMString, testing::test_space};

    #[test]
    fn attributes_are_found_on_self_then_parents() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let color = Value::from_char('c');
        let size = Value::from_char('s');
        let weight = Value::from_char('w');

        let base = Object::new(&mut ctx)
            .with_attribute(&mut ctx, color, Value::from_i64(1))
            .with_attribute(&mut ctx, size, Value::from_i64(2));
        let mixin = Object::new(&mut ctx).with_attribute(&mut ctx, weight, Value::from_i64(3));
        let child = Object::new(&mut ctx)
            .with_parent(&mut ctx, base)
            .with_parent(&mut ctx, mixin)
            .with_attribute(&mut ctx, color, Value::from_i64(10));

        assert_eq!(child.parents(&ctx), vec![base, mixin]);
        assert_eq!(child.get_own(&ctx, size), Value::NONE);
        assert_eq!(child.lookup(&ctx, color), Value::from_i64(10));
        assert_eq!(child.lookup(&ctx, size), Value::from_i64(2));
        assert_eq!(child.lookup(&ctx, weight), Value::from_i64(3));
        assert_eq!(child.lookup(&ctx, Value::from_char('x')), Value::NONE);
    }

    #[test]
    fn new_versions_keep_the_identity() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let key = Value::from_char('k');
        let object = Object::new(&mut ctx);
        let updated = object.with_attribute(&mut ctx, key, Value::TRUE);
        assert_ne!(object, updated);
        assert_eq!(object.id(&ctx), updated.id(&ctx));
        assert_eq!(object.get_own(&ctx, key), Value::NONE);
        assert_eq!(updated.with_attribute(&mut ctx, key, Value::TRUE), updated);

        let removed = updated.without_attribute(&mut ctx, key);
        assert!(removed.attributes(&ctx).is_empty());
        assert_ne!(Object::new(&mut ctx).id(&ctx), object.id(&ctx));
    }

    #[test]
    fn each_space_numbers_its_own_objects() {
        let first = test_space(false);
        let second = test_space(false);
        let mut a = first.register_thread();
        let mut b = second.register_thread();
        let mut ctx_a = a.enter();
        let mut ctx_b = b.enter();

        let ids_a: Vec<u64> = (0..3).map(|_| Object::new(&mut ctx_a).id(&ctx_a)).collect();
        let ids_b: Vec<u64> = (0..3).map(|_| Object::new(&mut ctx_b).id(&ctx_b)).collect();
        assert_eq!(ids_a, vec![1, 2, 3]);
        assert_eq!(ids_b, vec![1, 2, 3]);
    }

    #[test]
    fn methods_externals_and_threads_read_back() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let selector = VMString::from_str(&mut ctx, "at:put:");
        let body = crate::Tuple::from_values(&mut ctx, &[Value::from_i64(1), Value::from_i64(2)]);
        let method = Method::new(&mut ctx, selector.as_value(), body.as_value(), 2);
        assert_eq!(method.arity(&ctx), 2);
        assert_eq!(method.body(&ctx), body.as_value());
        let selector = VMString::from_value(method.selector(&ctx)).unwrap();
        assert_eq!(selector.to_string_lossy(&ctx), "at:put:");

        let external = ExternalPointer::new(&mut ctx, 0xdead_b000, 7);
        assert_eq!(external.address(&ctx), 0xdead_b000);
        assert_eq!(external.kind(&ctx), 7);

        let me = ThreadObject::current(&mut ctx);
        assert_eq!(me.thread_id(&ctx), ctx.thread_id());
    }

    #[test]
    fn object_graphs_survive_collection() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let key = Value::from_char('v');
        let child = ctx.call_with(|callee| {
            let list = crate::List::new().append(callee, Value::from_i64(77));
            let parent = Object::new(callee).with_attribute(callee, key, list.as_value());
            Object::new(callee).with_parent(callee, parent).as_value()
        });
        ctx.collect();

        let child = Object::from_value(child).unwrap();
        let inherited = crate::List::from_value(child.lookup(&ctx, key)).unwrap();
        assert_eq!(inherited.get_at(&ctx, 0), Value::from_i64(77));
    }
}
