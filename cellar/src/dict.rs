//! Persistent association map keyed by value identity. Backs object attributes.
use crate::{Allocator, SpaceInner, Tag, Value, tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityDict(Value);

impl Default for IdentityDict {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityDict {
    pub const fn new() -> Self {
        Self(Value::empty(Tag::Dict))
    }

    pub fn from_value(value: Value) -> Option<Self> {
        (value.tag() == Tag::Dict).then_some(Self(value))
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

    pub fn get_at(self, space: &SpaceInner, key: Value) -> Value {
        tree::find(space, self.0, tree::by_identity(key)).map_or(Value::NONE, |node| node.value)
    }

    pub fn has(self, space: &SpaceInner, key: Value) -> bool {
        tree::find(space, self.0, tree::by_identity(key)).is_some()
    }

    /// Binding a key to the value it already has returns the same dict.
    pub fn set_at<A: Allocator>(self, alloc: &mut A, key: Value, value: Value) -> Self {
        Self(tree::insert(alloc, self.0, key, value, &tree::by_identity(key)))
    }

    pub fn remove_at<A: Allocator>(self, alloc: &mut A, key: Value) -> Self {
        Self(tree::remove(alloc, self.0, &tree::by_identity(key)))
    }

    pub fn process_entries(self, space: &SpaceInner, mut visit: impl FnMut(Value, Value)) {
        tree::for_each(space, self.0, |node| visit(node.key, node.value));
    }

    pub fn keys(self, space: &SpaceInner) -> Vec<Value> {
        let mut keys = Vec::with_capacity(self.size(space));
        self.process_entries(space, |key, _| keys.push(key));
        keys
    }

    pub fn values(self, space: &SpaceInner) -> Vec<Value> {
        let mut values = Vec::with_capacity(self.size(space));
        self.process_entries(space, |_, value| values.push(value));
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_space;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::collections::HashMap;

    #[test]
    fn bind_lookup_unbind() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let name = Value::from_char('n');
        let size = Value::from_char('s');
        let dict = IdentityDict::new()
            .set_at(&mut ctx, name, Value::from_i64(1))
            .set_at(&mut ctx, size, Value::from_i64(2));

        assert_eq!(dict.get_at(&ctx, name), Value::from_i64(1));
        assert!(dict.has(&ctx, size));
        assert_eq!(dict.get_at(&ctx, Value::from_char('x')), Value::NONE);
        assert_eq!(dict.set_at(&mut ctx, name, Value::from_i64(1)), dict);

        let without = dict.remove_at(&mut ctx, name);
        assert_eq!(without.size(&ctx), 1);
        assert_eq!(without.keys(&ctx), vec![size]);
        assert_eq!(dict.size(&ctx), 2);
    }

    #[test]
    fn every_version_keeps_its_bindings() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        let mut ctx = thread.enter();
        let mut rng = StdRng::seed_from_u64(42);
        let mut versions = vec![(IdentityDict::new(), HashMap::new())];

        for step in 0..600i64 {
            let (dict, model) = versions.last().cloned().unwrap();
            let key = Value::from_i64(rng.gen_range(0..64));
            let mut model = model;
            let dict = if rng.gen_bool(0.7) {
                model.insert(key, Value::from_i64(step));
                dict.set_at(&mut ctx, key, Value::from_i64(step))
            } else {
                model.remove(&key);
                dict.remove_at(&mut ctx, key)
            };
            versions.push((dict, model));
        }

        for (dict, model) in &versions {
            assert_eq!(tree::assert_invariants(&ctx, dict.as_value()), model.len());
            for (key, value) in model {
                assert_eq!(dict.get_at(&ctx, *key), *value);
            }
        }
    }
}
